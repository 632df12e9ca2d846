//! Status taxonomy and small comparison utility shared by every layer.
//!
//! Mirrors the fixed enumeration of outcomes from the design: a small,
//! closed set of statuses that every public operation resolves to, plus the
//! byte-range equality helper used by the buffer bridge and the codec.

use serde::Serialize;

/// Outcome of a public or internal operation.
///
/// This is deliberately a closed, coarse taxonomy rather than one variant
/// per failure site — callers are expected to match on it, not inspect a
/// chain of sources. Where a source is useful for logging it is attached
/// via `#[source]` but callers should not depend on its shape.
#[derive(Debug, thiserror::Error, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    #[error("ok")]
    Ok,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("failed precondition")]
    FailedPrecondition,
    #[error("not found")]
    NotFound,
    #[error("out of range")]
    OutOfRange,
    #[error("permission denied")]
    PermissionDenied,
    #[error("resource exhausted")]
    ResourceExhausted,
    #[error("data loss")]
    DataLoss,
    #[error("unavailable")]
    Unavailable,
    #[error("internal error")]
    Internal,
    #[error("timed out")]
    TimedOut,
}

impl Status {
    /// Total mapping from a status to a short, stable, human-readable name.
    ///
    /// Total: every variant has a string, there is no fallback arm.
    pub const fn str_of(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::InvalidArgument => "invalid_argument",
            Status::FailedPrecondition => "failed_precondition",
            Status::NotFound => "not_found",
            Status::OutOfRange => "out_of_range",
            Status::PermissionDenied => "permission_denied",
            Status::ResourceExhausted => "resource_exhausted",
            Status::DataLoss => "data_loss",
            Status::Unavailable => "unavailable",
            Status::Internal => "internal",
            Status::TimedOut => "timed_out",
        }
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.str_of())
    }
}

/// Crate-wide result alias, matching the teacher's crate-level `Result`.
pub type Result<T> = std::result::Result<T, Status>;

/// Does `buf[0..buf_len]` at absolute offset `buf_offset` byte-equal the
/// sub-region of `cache[0..cache_len]` anchored at `cache_offset`?
///
/// Returns `false` on any out-of-bounds condition rather than panicking;
/// this is a query used on the hot path of the buffer bridge, not an
/// assertion.
pub fn range_equal(
    buf: &[u8],
    buf_offset: usize,
    cache: &[u8],
    cache_offset: usize,
) -> bool {
    let buf_len = buf.len();
    let cache_len = cache.len();

    if buf_offset < cache_offset {
        return false;
    }
    if cache_len < buf_len {
        return false;
    }
    let lead = buf_offset - cache_offset;
    if cache_len - buf_len < lead {
        return false;
    }

    let cache_slice = &cache[lead..lead + buf_len];
    cache_slice == buf
}
