//! The platform-storage backend contract (external collaborator).
//!
//! This is the "opaque byte-addressable keyed store" the design treats as
//! out of scope: a concrete driver (flash, EEPROM, a file on a host
//! filesystem) lives outside this crate and is handed in as a
//! `Box<dyn PlatformStorage>`. What belongs here is the *shape* of that
//! contract and the routing table that maps an [`ItemId`] onto a backend
//! and a backend-specific data-id.

use crate::error::Status;
use crate::item::ItemId;
use std::collections::HashMap;

/// Open mode for a backend data-id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlags {
    RdOnly,
    WrOnly,
    RdWr,
}

/// Raw outcome reported by the backend, prior to the mapping in §6:
/// `Ok -> Ok`, `Error -> DataLoss`, `{NotFound, InvalidOperation,
/// InvalidParam} -> PermissionDenied`, anything else -> `Unavailable`,
/// any unrecognized code -> `Internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Error,
    NotFound,
    InvalidOperation,
    InvalidParam,
    Other,
}

impl BackendErrorKind {
    pub fn into_status(self) -> Status {
        match self {
            BackendErrorKind::Error => Status::DataLoss,
            BackendErrorKind::NotFound
            | BackendErrorKind::InvalidOperation
            | BackendErrorKind::InvalidParam => Status::PermissionDenied,
            BackendErrorKind::Other => Status::Unavailable,
        }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendErrorKind>;

/// `written_size` as reported by `get_data_info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataInfo {
    pub written_size: usize,
}

/// Backend-global capabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendCapabilities {
    pub enable_tmp_id: bool,
}

/// Per-data-id capabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataIdCapabilities {
    pub is_read_only: bool,
    pub enable_seek: bool,
}

/// An open backend session, handed back by [`PlatformStorage::open`].
/// Opaque to callers; only the backend that produced it interprets it.
pub type BackendHandle = u64;

/// The environment-provided platform-storage driver.
///
/// Every method maps to exactly one backend-contract entry from the
/// design's §6. Implementations are expected to be safe to call from
/// any thread but are never called concurrently by this crate — the
/// storage lock in [`crate::sync`] serializes all access.
pub trait PlatformStorage: Send {
    fn open(&mut self, data_id: u32, flags: OpenFlags) -> BackendResult<BackendHandle>;
    fn close(&mut self, handle: BackendHandle) -> BackendResult<()>;
    fn seek(&mut self, handle: BackendHandle, offset: usize) -> BackendResult<usize>;
    fn read(&mut self, handle: BackendHandle, buf: &mut [u8]) -> BackendResult<usize>;
    fn write(&mut self, handle: BackendHandle, buf: &[u8]) -> BackendResult<usize>;
    fn erase(&mut self, data_id: u32) -> BackendResult<()>;
    fn get_data_info(&mut self, data_id: u32) -> BackendResult<DataInfo>;
    fn get_tmp_data_id(&mut self, data_id: u32) -> BackendResult<u32>;
    fn switch_data(&mut self, tmp_id: u32, data_id: u32) -> BackendResult<()>;
    fn get_capabilities(&mut self) -> BackendResult<BackendCapabilities>;
    fn get_id_capabilities(&mut self, data_id: u32) -> BackendResult<DataIdCapabilities>;
    fn factory_reset(&mut self, data_id: u32) -> BackendResult<()>;
    fn clean(&mut self) -> BackendResult<()>;
    fn downgrade(&mut self) -> BackendResult<()>;
}

/// Which backend family an item-id routes to. `Other` is reserved for a
/// second backend family that is not implemented: every routed call
/// against it fails (see [`crate::storage::StorageAdapter`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Pl,
    Other,
}

/// One routing entry: which backend, which backend-specific data-id, and
/// whether a factory reset must visit this item.
#[derive(Debug, Clone, Copy)]
pub struct RouteEntry {
    pub backend: Backend,
    pub data_id: u32,
    pub factory_reset_required: bool,
}

/// The build-time item-id -> backend routing table. Populated by the
/// caller (it is domain data: which item-ids exist and where they live),
/// queried by the storage adapter via pure lookups.
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: HashMap<ItemId, RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, item_id: ItemId, entry: RouteEntry) -> &mut Self {
        self.entries.insert(item_id, entry);
        self
    }

    pub fn route(&self, item_id: ItemId) -> Result<RouteEntry, Status> {
        self.entries.get(&item_id).copied().ok_or(Status::NotFound)
    }

    /// Every registered item-id with `factory_reset_required`, ascending.
    /// Walked by `invoke_factory_reset` in declaration order.
    pub fn factory_reset_item_ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.factory_reset_required)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}
