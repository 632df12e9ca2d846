//! Fixed-slot handle registry, factory-reset registry, and per-handle
//! update lists. Guarded by its own lock, independent of the storage
//! backend's — a `close()` must be able to observe `ref_count` without
//! waiting on an in-flight storage operation.

use crate::error::{Result, Status};
use crate::item::ItemId;
use crate::membuf::{AllocErrorKind, MemoryManager, RegionHandle};

pub type Handle = usize;
pub type FactoryResetId = usize;

pub const INVALID_HANDLE: Handle = usize::MAX;
pub const INVALID_FACTORY_RESET_ID: FactoryResetId = usize::MAX;

/// One entry in a handle's in-flight update list.
#[derive(Debug, Clone, Copy)]
pub struct UpdateEntry {
    pub item_id: ItemId,
    pub tmp_data_id: u32,
}

struct HandleSlot {
    in_use: bool,
    ref_count: u32,
    updates: Vec<UpdateEntry>,
}

impl HandleSlot {
    fn empty() -> Self {
        Self {
            in_use: false,
            ref_count: 0,
            updates: Vec::new(),
        }
    }
}

struct FactoryResetSlot {
    callback: Option<Box<dyn FnMut() + Send>>,
}

/// The shared scratch buffer used by the file-I/O path of the buffer
/// bridge. Lazily materialized on first use, freed on deinit. Lives
/// alongside the memory manager it allocates from, not in
/// [`ResourceTable`] — it's storage-adjacent data, not handle bookkeeping.
#[derive(Default)]
pub struct ScratchBuffer {
    region: Option<RegionHandle>,
    bytes: Vec<u8>,
}

impl ScratchBuffer {
    pub fn get(&mut self, mm: &mut dyn MemoryManager, buffer_length: usize) -> Result<&mut [u8]> {
        if self.region.is_none() {
            let region = mm.allocate(buffer_length).map_err(|AllocErrorKind::OutOfMemory| {
                Status::ResourceExhausted
            })?;
            self.region = Some(region);
            self.bytes = vec![0u8; buffer_length];
        }
        Ok(&mut self.bytes)
    }

    pub fn free(&mut self, mm: &mut dyn MemoryManager) {
        if let Some(region) = self.region.take() {
            mm.free(region);
        }
        self.bytes.clear();
    }
}

/// Fixed-slot handle table, factory-reset registration table, and
/// per-handle update lists. Every method here assumes the caller already
/// holds the resource lock — this module has no locking of its own.
pub struct ResourceTable {
    handles: Vec<HandleSlot>,
    factory_resets: Vec<FactoryResetSlot>,
    update_max: usize,
}

impl ResourceTable {
    pub fn new(handle_max: usize, factory_reset_max: usize, update_max: usize) -> Self {
        let mut handles = Vec::with_capacity(handle_max);
        handles.resize_with(handle_max, HandleSlot::empty);
        let mut factory_resets = Vec::with_capacity(factory_reset_max);
        factory_resets.resize_with(factory_reset_max, || FactoryResetSlot { callback: None });
        Self {
            handles,
            factory_resets,
            update_max,
        }
    }

    pub fn new_handle(&mut self) -> Result<Handle> {
        for (idx, slot) in self.handles.iter_mut().enumerate() {
            if !slot.in_use {
                slot.in_use = true;
                slot.ref_count = 0;
                slot.updates.clear();
                return Ok(idx);
            }
        }
        Err(Status::ResourceExhausted)
    }

    fn slot(&self, handle: Handle) -> Result<&HandleSlot> {
        self.handles
            .get(handle)
            .filter(|s| s.in_use)
            .ok_or(Status::NotFound)
    }

    fn slot_mut(&mut self, handle: Handle) -> Result<&mut HandleSlot> {
        self.handles
            .get_mut(handle)
            .filter(|s| s.in_use)
            .ok_or(Status::NotFound)
    }

    pub fn delete_handle(&mut self, handle: Handle) -> Result<()> {
        let slot = self.slot_mut(handle)?;
        if slot.ref_count != 0 {
            return Err(Status::FailedPrecondition);
        }
        slot.in_use = false;
        slot.updates.clear();
        Ok(())
    }

    pub fn reference(&mut self, handle: Handle) -> Result<()> {
        let slot = self.slot_mut(handle)?;
        slot.ref_count = slot
            .ref_count
            .checked_add(1)
            .ok_or(Status::Internal)?;
        Ok(())
    }

    pub fn unreference(&mut self, handle: Handle) -> Result<()> {
        let slot = self.slot_mut(handle)?;
        if slot.ref_count == 0 {
            return Err(Status::Internal);
        }
        slot.ref_count -= 1;
        Ok(())
    }

    pub fn new_factory_reset(
        &mut self,
        callback: Box<dyn FnMut() + Send>,
    ) -> Result<FactoryResetId> {
        for (idx, slot) in self.factory_resets.iter_mut().enumerate() {
            if slot.callback.is_none() {
                slot.callback = Some(callback);
                return Ok(idx);
            }
        }
        Err(Status::ResourceExhausted)
    }

    pub fn delete_factory_reset(&mut self, id: FactoryResetId) -> Result<()> {
        let slot = self
            .factory_resets
            .get_mut(id)
            .ok_or(Status::NotFound)?;
        if slot.callback.is_none() {
            return Err(Status::NotFound);
        }
        slot.callback = None;
        Ok(())
    }

    /// Number of factory-reset slots, for callers that walk them one at a
    /// time (each under its own lock acquire/release cycle, so a callback
    /// may re-enter read-only APIs without holding any lock across it).
    pub fn factory_reset_slot_count(&self) -> usize {
        self.factory_resets.len()
    }

    /// Remove and return the callback in `id`'s slot, leaving the
    /// registration itself (and the slot) in place so the caller can put
    /// it back with [`Self::restore_factory_reset_callback`] once it has
    /// been invoked with no lock held.
    pub fn take_factory_reset_callback(&mut self, id: FactoryResetId) -> Option<Box<dyn FnMut() + Send>> {
        self.factory_resets.get_mut(id).and_then(|slot| slot.callback.take())
    }

    pub fn restore_factory_reset_callback(&mut self, id: FactoryResetId, callback: Box<dyn FnMut() + Send>) {
        if let Some(slot) = self.factory_resets.get_mut(id) {
            slot.callback = Some(callback);
        }
    }

    pub fn set_update_data(
        &mut self,
        handle: Handle,
        item_id: ItemId,
        tmp_data_id: u32,
    ) -> Result<()> {
        let max = self.update_max;
        let slot = self.slot_mut(handle)?;
        if slot.updates.len() >= max {
            return Err(Status::Internal);
        }
        slot.updates.push(UpdateEntry {
            item_id,
            tmp_data_id,
        });
        Ok(())
    }

    pub fn get_update_data_from_handle(&self, handle: Handle) -> Result<Vec<UpdateEntry>> {
        Ok(self.slot(handle)?.updates.clone())
    }

    pub fn remove_update_data_from_handle(&mut self, handle: Handle) -> Result<()> {
        self.slot_mut(handle)?.updates.clear();
        Ok(())
    }

    pub fn handle_is_already_being_updated(&self, handle: Handle) -> Result<()> {
        if !self.slot(handle)?.updates.is_empty() {
            return Err(Status::FailedPrecondition);
        }
        Ok(())
    }

    /// Precondition for `update_complete`/`update_cancel`: the handle must
    /// have an outstanding update. The mirror image of
    /// [`Self::handle_is_already_being_updated`] — `FailedPrecondition`
    /// iff the list is *empty*.
    pub fn require_update_in_progress(&self, handle: Handle) -> Result<()> {
        if self.slot(handle)?.updates.is_empty() {
            return Err(Status::FailedPrecondition);
        }
        Ok(())
    }

    /// Scans every handle's update list for `item_id`; used to enforce
    /// invariant 1 (at-most-one outstanding cancellable update per item).
    pub fn update_data_exists_in_handles(&self, item_id: ItemId) -> Result<()> {
        for slot in &self.handles {
            if slot.in_use && slot.updates.iter().any(|u| u.item_id == item_id) {
                return Err(Status::FailedPrecondition);
            }
        }
        Ok(())
    }
}
