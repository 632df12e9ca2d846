//! Build-time configuration, supplied by the caller at construction time.

use crate::error::Status;
use std::time::Duration;

/// Compile-time-ish knobs for a [`crate::api::ParamStore`] instance.
///
/// All fields must be `> 0`; validated once at construction via
/// [`Config::validate`] rather than scattered through the call paths.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Maximum number of concurrently open handles.
    pub handle_max: usize,
    /// Lock-acquisition timeout.
    pub timeout: Duration,
    /// Maximum number of registered factory-reset callbacks.
    pub factory_reset_max: usize,
    /// Maximum number of in-flight cancellable updates per handle.
    pub update_max: usize,
    /// Size, in bytes, of the shared scratch buffer used by the
    /// file-I/O path of the buffer bridge.
    pub buffer_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handle_max: 4,
            timeout: Duration::from_millis(5_000),
            factory_reset_max: 8,
            update_max: 8,
            buffer_length: 4096,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Status> {
        if self.handle_max == 0
            || self.timeout.is_zero()
            || self.factory_reset_max == 0
            || self.update_max == 0
            || self.buffer_length == 0
        {
            return Err(Status::InvalidArgument);
        }
        Ok(())
    }
}
