//! In-memory `PlatformStorage` and `MemoryManager` implementations for
//! exercising the engine without a real backend. Available to this
//! crate's own test suite always, and to downstream integration tests
//! behind the `testing` feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{
    BackendCapabilities, BackendErrorKind, BackendHandle, BackendResult, DataIdCapabilities,
    DataInfo, OpenFlags, PlatformStorage,
};
use crate::membuf::{AllocErrorKind, FileHandle, MemoryManager, RegionHandle};

/// A single backend entry point `MockStorage` can be told to fail on its
/// next invocation, mirroring the crate's own `failspot` fault-injection
/// points for a caller assembling its own test scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Open,
    Write,
    Read,
    Erase,
    GetDataInfo,
    GetTmpDataId,
    SwitchData,
}

#[derive(Default)]
struct OpenHandle {
    data_id: u32,
    pos: usize,
}

/// An in-memory stand-in for the environment's platform-storage driver.
/// Every data-id is a `Vec<u8>` in a map; `write` truncates or extends
/// as needed, `read` clamps to the stored length.
pub struct MockStorage {
    data: HashMap<u32, Vec<u8>>,
    read_only_ids: HashMap<u32, bool>,
    handles: HashMap<BackendHandle, OpenHandle>,
    next_handle: BackendHandle,
    next_tmp_id: u32,
    enable_tmp_id: bool,
    offset_disabled_ids: HashMap<u32, bool>,
    pending_failure: Arc<Mutex<Option<(MockOp, Option<u32>, BackendErrorKind)>>>,
    write_count: Arc<AtomicUsize>,
}

/// A shared handle on a `MockStorage`'s fault-injection state, readable
/// and armable after the `MockStorage` itself has been boxed away into a
/// `ParamStore` — construction order otherwise forces every `fail_next`
/// call to happen before the backend has any data in it.
#[derive(Clone)]
pub struct FailController {
    pending: Arc<Mutex<Option<(MockOp, Option<u32>, BackendErrorKind)>>>,
}

impl FailController {
    /// Arrange `op`'s next invocation to fail with `kind`, exactly once,
    /// regardless of which data-id it targets.
    pub fn fail_next(&self, op: MockOp, kind: BackendErrorKind) {
        *self.pending.lock().unwrap() = Some((op, None, kind));
    }

    /// Like `fail_next`, but only trips when `op` targets `data_id` —
    /// lets a test fail the write of one member in a multi-member save
    /// without also catching the members committed ahead of it.
    pub fn fail_next_for_id(&self, op: MockOp, data_id: u32, kind: BackendErrorKind) {
        *self.pending.lock().unwrap() = Some((op, Some(data_id), kind));
    }
}

impl MockStorage {
    pub fn new(enable_tmp_id: bool) -> Self {
        Self {
            data: HashMap::new(),
            read_only_ids: HashMap::new(),
            handles: HashMap::new(),
            next_handle: 1,
            next_tmp_id: 1_000_000,
            enable_tmp_id,
            offset_disabled_ids: HashMap::new(),
            pending_failure: Arc::new(Mutex::new(None)),
            write_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Report `ENABLE_OFFSET == false` for `data_id`'s capabilities —
    /// every id reports `true` (seekable) by default.
    pub fn mark_offset_disabled(&mut self, data_id: u32) {
        self.offset_disabled_ids.insert(data_id, true);
    }

    /// Arrange `op`'s next invocation to fail with `kind`, exactly once,
    /// regardless of which data-id it targets.
    pub fn fail_next(&mut self, op: MockOp, kind: BackendErrorKind) {
        *self.pending_failure.lock().unwrap() = Some((op, None, kind));
    }

    /// See [`FailController::fail_next_for_id`].
    pub fn fail_next_for_id(&mut self, op: MockOp, data_id: u32, kind: BackendErrorKind) {
        *self.pending_failure.lock().unwrap() = Some((op, Some(data_id), kind));
    }

    /// A shared handle on the backend write counter, readable after the
    /// `MockStorage` itself has been boxed away into a `ParamStore` — used
    /// by idempotence tests to assert a second identical save performs no
    /// backend write.
    pub fn write_counter(&self) -> Arc<AtomicUsize> {
        self.write_count.clone()
    }

    /// A shared handle on this mock's fault-injection state, usable after
    /// boxing — see [`FailController`].
    pub fn fail_controller(&self) -> FailController {
        FailController { pending: self.pending_failure.clone() }
    }

    pub fn mark_read_only(&mut self, data_id: u32, read_only: bool) {
        self.read_only_ids.insert(data_id, read_only);
    }

    pub fn seed(&mut self, data_id: u32, bytes: Vec<u8>) {
        self.data.insert(data_id, bytes);
    }

    pub fn contents(&self, data_id: u32) -> Option<&[u8]> {
        self.data.get(&data_id).map(|v| v.as_slice())
    }

    fn consume_failure(&mut self, op: MockOp, data_id: Option<u32>) -> BackendResult<()> {
        let mut pending = self.pending_failure.lock().unwrap();
        if let Some((pending_op, pending_id, kind)) = *pending {
            let id_matches = pending_id.is_none() || pending_id == data_id;
            if pending_op == op && id_matches {
                *pending = None;
                return Err(kind);
            }
        }
        Ok(())
    }
}

impl PlatformStorage for MockStorage {
    fn open(&mut self, data_id: u32, _flags: OpenFlags) -> BackendResult<BackendHandle> {
        self.consume_failure(MockOp::Open, Some(data_id))?;
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(handle, OpenHandle { data_id, pos: 0 });
        Ok(handle)
    }

    fn close(&mut self, handle: BackendHandle) -> BackendResult<()> {
        self.handles.remove(&handle);
        Ok(())
    }

    fn seek(&mut self, handle: BackendHandle, offset: usize) -> BackendResult<usize> {
        let h = self.handles.get_mut(&handle).ok_or(BackendErrorKind::InvalidParam)?;
        h.pos = offset;
        Ok(offset)
    }

    fn read(&mut self, handle: BackendHandle, buf: &mut [u8]) -> BackendResult<usize> {
        let h = self.handles.get(&handle).ok_or(BackendErrorKind::InvalidParam)?;
        self.consume_failure(MockOp::Read, Some(h.data_id))?;
        let h = self.handles.get(&handle).ok_or(BackendErrorKind::InvalidParam)?;
        let data = self.data.get(&h.data_id).ok_or(BackendErrorKind::NotFound)?;
        let n = buf.len().min(data.len().saturating_sub(h.pos));
        buf[..n].copy_from_slice(&data[h.pos..h.pos + n]);
        self.handles.get_mut(&handle).unwrap().pos += n;
        Ok(n)
    }

    fn write(&mut self, handle: BackendHandle, buf: &[u8]) -> BackendResult<usize> {
        let h = self.handles.get(&handle).ok_or(BackendErrorKind::InvalidParam)?;
        let (pos, data_id) = (h.pos, h.data_id);
        self.consume_failure(MockOp::Write, Some(data_id))?;
        if self.read_only_ids.get(&data_id).copied().unwrap_or(false) {
            return Err(BackendErrorKind::InvalidOperation);
        }
        let entry = self.data.entry(data_id).or_default();
        if entry.len() < pos + buf.len() {
            entry.resize(pos + buf.len(), 0);
        }
        entry[pos..pos + buf.len()].copy_from_slice(buf);
        self.handles.get_mut(&handle).unwrap().pos += buf.len();
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(buf.len())
    }

    fn erase(&mut self, data_id: u32) -> BackendResult<()> {
        self.consume_failure(MockOp::Erase, Some(data_id))?;
        self.data.remove(&data_id);
        Ok(())
    }

    fn get_data_info(&mut self, data_id: u32) -> BackendResult<DataInfo> {
        self.consume_failure(MockOp::GetDataInfo, Some(data_id))?;
        let written_size = self.data.get(&data_id).ok_or(BackendErrorKind::NotFound)?.len();
        Ok(DataInfo { written_size })
    }

    fn get_tmp_data_id(&mut self, data_id: u32) -> BackendResult<u32> {
        self.consume_failure(MockOp::GetTmpDataId, Some(data_id))?;
        if !self.enable_tmp_id {
            return Err(BackendErrorKind::InvalidOperation);
        }
        let id = self.next_tmp_id;
        self.next_tmp_id += 1;
        Ok(id)
    }

    fn switch_data(&mut self, tmp_id: u32, data_id: u32) -> BackendResult<()> {
        self.consume_failure(MockOp::SwitchData, Some(data_id))?;
        match self.data.remove(&tmp_id) {
            Some(bytes) => {
                self.data.insert(data_id, bytes);
            }
            None => {
                self.data.remove(&data_id);
            }
        }
        Ok(())
    }

    fn get_capabilities(&mut self) -> BackendResult<BackendCapabilities> {
        Ok(BackendCapabilities {
            enable_tmp_id: self.enable_tmp_id,
        })
    }

    fn get_id_capabilities(&mut self, data_id: u32) -> BackendResult<DataIdCapabilities> {
        Ok(DataIdCapabilities {
            is_read_only: self.read_only_ids.get(&data_id).copied().unwrap_or(false),
            enable_seek: !self.offset_disabled_ids.get(&data_id).copied().unwrap_or(false),
        })
    }

    fn factory_reset(&mut self, data_id: u32) -> BackendResult<()> {
        self.data.remove(&data_id);
        Ok(())
    }

    fn clean(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn downgrade(&mut self) -> BackendResult<()> {
        Ok(())
    }
}

/// An in-memory `MemoryManager`. `mappable` toggles whether `map`/`unmap`
/// or the `fopen`/`fseek`/`fread`/`fwrite` path is exercised, so the same
/// test can drive both sides of the buffer bridge.
pub struct MockMemory {
    next: u64,
    regions: HashMap<RegionHandle, Vec<u8>>,
    files: HashMap<FileHandle, (RegionHandle, usize)>,
    mappable: bool,
    fail_next_allocate: bool,
}

impl MockMemory {
    pub fn new(mappable: bool) -> Self {
        Self {
            next: 1,
            regions: HashMap::new(),
            files: HashMap::new(),
            mappable,
            fail_next_allocate: false,
        }
    }

    pub fn fail_next_allocate(&mut self) {
        self.fail_next_allocate = true;
    }
}

impl MemoryManager for MockMemory {
    fn allocate(&mut self, size: usize) -> Result<RegionHandle, AllocErrorKind> {
        if self.fail_next_allocate {
            self.fail_next_allocate = false;
            return Err(AllocErrorKind::OutOfMemory);
        }
        let h = self.next;
        self.next += 1;
        self.regions.insert(h, vec![0u8; size]);
        Ok(h)
    }

    fn free(&mut self, handle: RegionHandle) {
        self.regions.remove(&handle);
    }

    fn is_map_support(&mut self, _handle: RegionHandle) -> bool {
        self.mappable
    }

    fn map(&mut self, handle: RegionHandle) -> Option<&mut [u8]> {
        self.regions.get_mut(&handle).map(|v| v.as_mut_slice())
    }

    fn unmap(&mut self, _handle: RegionHandle) {}

    fn fopen(&mut self, handle: RegionHandle) -> Option<FileHandle> {
        if !self.regions.contains_key(&handle) {
            return None;
        }
        let h = self.next;
        self.next += 1;
        self.files.insert(h, (handle, 0));
        Some(h)
    }

    fn fclose(&mut self, file: FileHandle) {
        self.files.remove(&file);
    }

    fn fseek(&mut self, file: FileHandle, offset: usize) -> Option<usize> {
        let (_, pos) = self.files.get_mut(&file)?;
        *pos = offset;
        Some(offset)
    }

    fn fread(&mut self, file: FileHandle, buf: &mut [u8]) -> Option<usize> {
        let (region, pos) = *self.files.get(&file)?;
        let data = self.regions.get(&region)?;
        let n = buf.len().min(data.len().saturating_sub(pos));
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        self.files.get_mut(&file)?.1 += n;
        Some(n)
    }

    fn fwrite(&mut self, file: FileHandle, buf: &[u8]) -> Option<usize> {
        let (region, pos) = *self.files.get(&file)?;
        let data = self.regions.get_mut(&region)?;
        if data.len() < pos + buf.len() {
            data.resize(pos + buf.len(), 0);
        }
        data[pos..pos + buf.len()].copy_from_slice(buf);
        self.files.get_mut(&file)?.1 += buf.len();
        Some(buf.len())
    }
}
