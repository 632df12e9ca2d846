//! Shared scaffolding for the integration suite: item-id seeds, a
//! `MemberDescriptor` builder, and ready-to-use `ParamStore` construction
//! backed by the crate's own in-memory mocks (plus a real file-backed
//! `PlatformStorage` for the one test that wants actual filesystem
//! behavior instead of the mock).

#![allow(dead_code)]

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use param_store::backend::{Backend, RouteEntry, RoutingTable};
use param_store::config::Config;
use param_store::item::{ItemId, ItemType, MemberDescriptor};
use param_store::mock::{FailController, MockMemory, MockStorage};
use param_store::ParamStore;

/// Every test ends up logging through the crate's `log` facade on its
/// failure/rollback paths; route it to stderr so a failing assertion's
/// surrounding log lines are visible in `cargo test -- --nocapture`.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

pub const WIFI_SSID: ItemId = 1;
pub const ITEM_A: ItemId = 2;
pub const ITEM_B: ItemId = 3;
pub const ITEM_C: ItemId = 4;
pub const ITEM_I1: ItemId = 5;
pub const ITEM_I2: ItemId = 6;
pub const ITEM_X: ItemId = 7;
pub const ITEM_RO: ItemId = 8;
pub const ITEM_NO_OFFSET: ItemId = 9;

/// Build one non-custom member with a fixed (not dynamically evaluated
/// per-call) mask result, which is all the scenarios in this suite need.
pub fn member(item_id: ItemId, item_type: ItemType, max_size: usize, enabled: bool) -> MemberDescriptor<'static> {
    MemberDescriptor {
        item_id,
        item_type,
        offset: 0,
        max_size,
        mask: Box::new(move || enabled),
        custom: None,
    }
}

/// `entries` is `(item_id, data_id, factory_reset_required)`; every entry
/// routes to the `Pl` backend family, the only one this crate implements.
pub fn routing_with(entries: &[(ItemId, u32, bool)]) -> RoutingTable {
    let mut rt = RoutingTable::new();
    for &(item_id, data_id, factory_reset_required) in entries {
        rt.register(
            item_id,
            RouteEntry { backend: Backend::Pl, data_id, factory_reset_required },
        );
    }
    rt
}

/// A `ParamStore` over a caller-supplied (possibly pre-seeded or
/// pre-armed) `MockStorage`, plus shared handles onto its write counter
/// and fault-injection controller — both stay reachable after the mock
/// is boxed away into the store.
pub fn store_from_mock(routing: RoutingTable, mock: MockStorage) -> (ParamStore, Arc<AtomicUsize>, FailController) {
    init_logging();
    let counter = mock.write_counter();
    let fail = mock.fail_controller();
    let store = ParamStore::new(Config::default(), routing, Box::new(mock), Box::new(MockMemory::new(true)))
        .expect("valid config");
    (store, counter, fail)
}

/// The common case: a fresh mock, no pre-seeded data.
pub fn store_with(routing: RoutingTable, enable_tmp_id: bool) -> ParamStore {
    store_from_mock(routing, MockStorage::new(enable_tmp_id)).0
}

/// Like `store_with`, but also hands back the write counter — for
/// idempotence assertions that need to observe backend call counts after
/// the mock has been moved into the store.
pub fn store_with_counter(routing: RoutingTable, enable_tmp_id: bool) -> (ParamStore, Arc<AtomicUsize>) {
    let (store, counter, _fail) = store_from_mock(routing, MockStorage::new(enable_tmp_id));
    (store, counter)
}

/// Like `store_with`, with a caller-chosen lock-acquisition timeout —
/// used by the locking tests so a deliberate `TimedOut` doesn't cost
/// several seconds of wall clock per assertion.
pub fn store_with_timeout(routing: RoutingTable, enable_tmp_id: bool, timeout: std::time::Duration) -> ParamStore {
    init_logging();
    let mock = MockStorage::new(enable_tmp_id);
    ParamStore::new(Config { timeout, ..Config::default() }, routing, Box::new(mock), Box::new(MockMemory::new(true)))
        .expect("valid config")
}

/// A `PlatformStorage` backed by real files in a temp directory, one file
/// per data-id — for the one test that wants to exercise the trait
/// boundary against actual filesystem behavior rather than the in-memory
/// mock. `get_tmp_data_id` hands out ids from a disjoint range so a
/// switch-in-progress temp file never collides with a live one.
pub struct FileStorage {
    dir: tempfile::TempDir,
    handles: std::collections::HashMap<param_store::backend::BackendHandle, std::fs::File>,
    next_handle: param_store::backend::BackendHandle,
    next_tmp_id: u32,
}

impl FileStorage {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            handles: std::collections::HashMap::new(),
            next_handle: 1,
            next_tmp_id: 900_000,
        }
    }

    fn path_for(&self, data_id: u32) -> std::path::PathBuf {
        self.dir.path().join(format!("{data_id}.bin"))
    }
}

impl Default for FileStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl param_store::backend::PlatformStorage for FileStorage {
    fn open(
        &mut self,
        data_id: u32,
        flags: param_store::backend::OpenFlags,
    ) -> param_store::backend::BackendResult<param_store::backend::BackendHandle> {
        use param_store::backend::{BackendErrorKind, OpenFlags};
        let path = self.path_for(data_id);
        let file = match flags {
            OpenFlags::RdOnly => std::fs::File::open(&path).map_err(|_| BackendErrorKind::NotFound)?,
            OpenFlags::WrOnly => std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .map_err(|_| BackendErrorKind::Other)?,
            OpenFlags::RdWr => std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|_| BackendErrorKind::Other)?,
        };
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(handle, file);
        Ok(handle)
    }

    fn close(&mut self, handle: param_store::backend::BackendHandle) -> param_store::backend::BackendResult<()> {
        self.handles.remove(&handle);
        Ok(())
    }

    fn seek(
        &mut self,
        handle: param_store::backend::BackendHandle,
        offset: usize,
    ) -> param_store::backend::BackendResult<usize> {
        use std::io::{Seek, SeekFrom};
        use param_store::backend::BackendErrorKind;
        let file = self.handles.get_mut(&handle).ok_or(BackendErrorKind::InvalidParam)?;
        file.seek(SeekFrom::Start(offset as u64))
            .map(|p| p as usize)
            .map_err(|_| BackendErrorKind::Error)
    }

    fn read(
        &mut self,
        handle: param_store::backend::BackendHandle,
        buf: &mut [u8],
    ) -> param_store::backend::BackendResult<usize> {
        use std::io::Read;
        use param_store::backend::BackendErrorKind;
        let file = self.handles.get_mut(&handle).ok_or(BackendErrorKind::InvalidParam)?;
        file.read(buf).map_err(|_| BackendErrorKind::Error)
    }

    fn write(
        &mut self,
        handle: param_store::backend::BackendHandle,
        buf: &[u8],
    ) -> param_store::backend::BackendResult<usize> {
        use std::io::Write;
        use param_store::backend::BackendErrorKind;
        let file = self.handles.get_mut(&handle).ok_or(BackendErrorKind::InvalidParam)?;
        file.write_all(buf).map_err(|_| BackendErrorKind::Error)?;
        Ok(buf.len())
    }

    fn erase(&mut self, data_id: u32) -> param_store::backend::BackendResult<()> {
        let _ = std::fs::remove_file(self.path_for(data_id));
        Ok(())
    }

    fn get_data_info(&mut self, data_id: u32) -> param_store::backend::BackendResult<param_store::backend::DataInfo> {
        use param_store::backend::{BackendErrorKind, DataInfo};
        match std::fs::metadata(self.path_for(data_id)) {
            Ok(meta) => Ok(DataInfo { written_size: meta.len() as usize }),
            Err(_) => Err(BackendErrorKind::NotFound),
        }
    }

    fn get_tmp_data_id(&mut self, _data_id: u32) -> param_store::backend::BackendResult<u32> {
        let id = self.next_tmp_id;
        self.next_tmp_id += 1;
        Ok(id)
    }

    fn switch_data(&mut self, tmp_id: u32, data_id: u32) -> param_store::backend::BackendResult<()> {
        let tmp_path = self.path_for(tmp_id);
        let target_path = self.path_for(data_id);
        if tmp_path.exists() {
            let _ = std::fs::rename(&tmp_path, &target_path);
        } else {
            let _ = std::fs::remove_file(&target_path);
        }
        Ok(())
    }

    fn get_capabilities(&mut self) -> param_store::backend::BackendResult<param_store::backend::BackendCapabilities> {
        Ok(param_store::backend::BackendCapabilities { enable_tmp_id: true })
    }

    fn get_id_capabilities(
        &mut self,
        _data_id: u32,
    ) -> param_store::backend::BackendResult<param_store::backend::DataIdCapabilities> {
        Ok(param_store::backend::DataIdCapabilities { is_read_only: false, enable_seek: true })
    }

    fn factory_reset(&mut self, data_id: u32) -> param_store::backend::BackendResult<()> {
        let _ = std::fs::remove_file(self.path_for(data_id));
        Ok(())
    }

    fn clean(&mut self) -> param_store::backend::BackendResult<()> {
        Ok(())
    }

    fn downgrade(&mut self) -> param_store::backend::BackendResult<()> {
        Ok(())
    }
}

/// A `ParamStore` over a real `FileStorage`, with `MockMemory` still
/// standing in for the large-heap memory manager (the buffer bridge is
/// exercised plenty by the mock-backed tests; what this helper is for is
/// the backend trait boundary against real files).
pub fn store_with_file_backend(routing: RoutingTable) -> ParamStore {
    init_logging();
    let pl = FileStorage::new();
    ParamStore::new(Config::default(), routing, Box::new(pl), Box::new(MockMemory::new(true)))
        .expect("valid config")
}
