//! The caller-facing surface: one [`ParamStore`] per catalog, every
//! operation wired through the exclusive-control orchestrator in
//! `crate::sync`.

use std::sync::Mutex;

use crate::backend::{PlatformStorage, RoutingTable};
use crate::config::Config;
use crate::error::{Result, Status};
use crate::item::{Capabilities, ItemCapabilities, ItemId, StructInfo, UpdateType, Value};
use crate::membuf::MemoryManager;
use crate::resource::{
    FactoryResetId, Handle, ResourceTable, ScratchBuffer, INVALID_FACTORY_RESET_ID, INVALID_HANDLE,
};
use crate::storage::StorageAdapter;
use crate::sync::{Exclusion, ExclusiveOp, Guard};
use crate::work;

/// The storage backend, its memory manager, and the scratch buffer
/// carved out of that memory manager — always used together, so they
/// live behind one `Mutex`, separate from [`ResourceTable`]'s.
///
/// That separation is the point: [`Exclusion`]'s `resource`/`storage`
/// [`crate::sync::ReentrantLock`]s already model two independent logical
/// locks, released in turn (resource, then storage, then resource again
/// for exit). If the *data* behind both locks were the same `Mutex`, a
/// `storage_func` blocked inside a `Custom` member's save/load closure
/// (see `tests/resource_lifecycle.rs`) would still be holding that
/// `Mutex` when a concurrent `close()` tries to read `ref_count` through
/// it — `close` would block on the `Mutex` instead of observing
/// `ref_count != 0` and returning `FailedPrecondition` immediately. Two
/// separate `Mutex`es make that observation possible: `storage_func`
/// acquires the resource `Mutex` only for the brief, non-blocking reads
/// it needs (e.g. `get_update_data_from_handle`), then drops it before
/// running the caller-supplied work.
struct StorageState {
    storage: StorageAdapter,
    mm: Box<dyn MemoryManager>,
    scratch: ScratchBuffer,
}

/// The crate's entry point. Construct one per catalog with [`ParamStore::new`].
pub struct ParamStore {
    exclusion: Exclusion,
    resource: Mutex<ResourceTable>,
    storage: Mutex<StorageState>,
    config: Config,
    watchdog: Option<Box<dyn Fn() + Send + Sync>>,
}

impl ParamStore {
    pub fn new(
        config: Config,
        routing: RoutingTable,
        pl: Box<dyn PlatformStorage>,
        mm: Box<dyn MemoryManager>,
    ) -> Result<Self> {
        config.validate()?;
        let resource = ResourceTable::new(config.handle_max, config.factory_reset_max, config.update_max);
        let storage = StorageAdapter::new(routing, pl);
        Ok(Self {
            exclusion: Exclusion::new(config.timeout),
            resource: Mutex::new(resource),
            storage: Mutex::new(StorageState { storage, mm, scratch: ScratchBuffer::default() }),
            config,
            watchdog: None,
        })
    }

    /// Install a watchdog keep-alive, kicked once before each item visited
    /// by `invoke_factory_reset`'s sweep.
    pub fn set_watchdog(&mut self, watchdog: Box<dyn Fn() + Send + Sync>) {
        self.watchdog = Some(watchdog);
    }

    fn lock_resource(&self) -> Result<std::sync::MutexGuard<'_, ResourceTable>> {
        self.resource.lock().map_err(|_| Status::Internal)
    }

    fn lock_storage(&self) -> Result<std::sync::MutexGuard<'_, StorageState>> {
        self.storage.lock().map_err(|_| Status::Internal)
    }

    pub fn open(&self) -> Result<Handle> {
        let mut out = INVALID_HANDLE;
        let mut entry = || {
            out = self.lock_resource()?.new_handle()?;
            Ok(())
        };
        let status = self.exclusion.run(ExclusiveOp::ResourceOnly(&mut entry));
        if status.is_ok() {
            Ok(out)
        } else {
            Err(status)
        }
    }

    pub fn close(&self, handle: Handle) -> Status {
        let mut entry = || self.lock_resource()?.delete_handle(handle);
        self.exclusion.run(ExclusiveOp::ResourceOnly(&mut entry))
    }

    /// Save every masked-in member of `info` from `values`, in
    /// declaration order, rolling the whole call back on the first
    /// failure (§4.6's atomicity invariant).
    pub fn save(&self, handle: Handle, info: &mut StructInfo, values: &[Value]) -> Status {
        if handle == INVALID_HANDLE {
            return Status::InvalidArgument;
        }
        self.run_mutating(handle, info, |info, work, storage, mm, scratch| {
            work::run_save(info, work, values, storage, mm, scratch)
        })
    }

    /// Clear every masked-in member, symmetric to `save`.
    pub fn clear(&self, handle: Handle, info: &mut StructInfo) -> Status {
        if handle == INVALID_HANDLE {
            return Status::InvalidArgument;
        }
        self.run_mutating(handle, info, |info, work, storage, mm, scratch| {
            work::run_clear(info, work, storage, mm, scratch)
        })
    }

    /// Load every masked-in member of `info` into `values`. Never rolls
    /// back: a load failure leaves persisted state untouched.
    pub fn load(&self, handle: Handle, info: &mut StructInfo, values: &mut [Value]) -> Status {
        if handle == INVALID_HANDLE {
            return Status::InvalidArgument;
        }
        let mut work = work::allocate_work(info);
        work::setup_work_mask(info, &mut work);

        let mut entry = || self.lock_resource()?.reference(handle);
        let mut func = || {
            // Read the update list through the resource lock, then drop
            // it before running `run_load` — a `Custom` member's load
            // closure can block indefinitely, and `close()` must still
            // be able to observe `ref_count` while it does.
            let updates = self.lock_resource()?.get_update_data_from_handle(handle)?;
            let mut storage_state = self.lock_storage()?;
            work::get_work_storage_info(info, &mut work, &updates, &mut storage_state.storage)?;
            let status = work::run_load(info, &mut work, values, &mut storage_state.storage);
            if status.is_ok() {
                Ok(())
            } else {
                Err(status)
            }
        };
        let mut exit = || self.lock_resource()?.unreference(handle);

        self.exclusion.run(ExclusiveOp::Full {
            resource_entry: &mut entry,
            storage_func: &mut func,
            resource_exit: &mut exit,
        })
    }

    /// Shared shape for `save`/`clear`: reference the handle, run the
    /// work engine under the storage lock, unreference unconditionally.
    ///
    /// `op` receives `storage`/`mm`/`scratch` as three disjoint borrows
    /// out of the same `StorageState` guard. The resource lock is only
    /// ever held for the brief `get_update_data_from_handle` read before
    /// it — `op` (a `Custom` member's save/clear closure) can block
    /// indefinitely, and must not be holding the resource `Mutex` while
    /// it does, or a concurrent `close()` would block on it instead of
    /// observing `ref_count != 0` and returning `FailedPrecondition`.
    fn run_mutating(
        &self,
        handle: Handle,
        info: &mut StructInfo,
        op: impl FnOnce(&mut StructInfo, &mut work::Work, &mut StorageAdapter, &mut dyn MemoryManager, &mut [u8]) -> Status,
    ) -> Status {
        let mut work = work::allocate_work(info);
        let enabled = work::setup_work_mask(info, &mut work);
        if enabled == 0 {
            return Status::Ok;
        }

        let mut op = Some(op);
        let mut entry = || self.lock_resource()?.reference(handle);
        let mut func = || {
            let updates = self.lock_resource()?.get_update_data_from_handle(handle)?;
            let mut storage_state = self.lock_storage()?;
            work::get_work_storage_info(info, &mut work, &updates, &mut storage_state.storage)?;

            let StorageState { storage, mm, scratch } = &mut *storage_state;
            let scratch_buf = scratch.get(mm.as_mut(), self.config.buffer_length)?;
            let run = op.take().expect("run_mutating storage_func called twice");
            let status = run(info, &mut work, storage, mm.as_mut(), scratch_buf);
            if status.is_ok() {
                Ok(())
            } else {
                Err(status)
            }
        };
        let mut exit = || self.lock_resource()?.unreference(handle);

        self.exclusion.run(ExclusiveOp::Full {
            resource_entry: &mut entry,
            storage_func: &mut func,
            resource_exit: &mut exit,
        })
    }

    pub fn get_size(&self, handle: Handle, item_id: ItemId) -> Result<usize> {
        let mut out = 0usize;
        let mut func = || {
            let effective = if handle == INVALID_HANDLE {
                None
            } else {
                self.lock_resource()?
                    .get_update_data_from_handle(handle)?
                    .into_iter()
                    .find(|u| u.item_id == item_id)
                    .map(|u| u.tmp_data_id)
            };
            out = self.lock_storage()?.storage.get_storage_info(item_id, effective)?;
            Ok(())
        };

        let status = if handle == INVALID_HANDLE {
            self.exclusion.run(ExclusiveOp::StorageOnly(&mut func))
        } else {
            let mut entry = || self.lock_resource()?.reference(handle);
            let mut exit = || self.lock_resource()?.unreference(handle);
            self.exclusion.run(ExclusiveOp::Full {
                resource_entry: &mut entry,
                storage_func: &mut func,
                resource_exit: &mut exit,
            })
        };
        if status.is_ok() {
            Ok(out)
        } else {
            Err(status)
        }
    }

    /// Begin a cancellable update over every masked-in, non-custom
    /// member. Enforces invariant 1 (at most one in-flight update per
    /// item, across every handle) before touching the backend.
    pub fn update_begin(&self, handle: Handle, info: &mut StructInfo, update_type: UpdateType) -> Status {
        if handle == INVALID_HANDLE {
            return Status::InvalidArgument;
        }
        let mut work = work::allocate_work(info);
        work::setup_work_mask(info, &mut work);

        let mut entry = || self.lock_resource()?.reference(handle);
        let mut func = || {
            {
                let resource = self.lock_resource()?;
                resource.handle_is_already_being_updated(handle)?;
                for idx in 0..info.len() {
                    if work.member_data[idx].enabled && !info.members[idx].is_custom() {
                        resource.update_data_exists_in_handles(info.members[idx].item_id)?;
                    }
                }
            }
            let updates = self.lock_resource()?.get_update_data_from_handle(handle)?;
            let begun = {
                let mut storage_state = self.lock_storage()?;
                work::get_work_storage_info(info, &mut work, &updates, &mut storage_state.storage)?;
                work::run_update_begin(info, &mut work, update_type, &mut storage_state.storage)?
            };
            let mut resource = self.lock_resource()?;
            for ue in &begun {
                resource.set_update_data(handle, ue.item_id, ue.tmp_data_id)?;
            }
            Ok(())
        };
        let mut exit = || self.lock_resource()?.unreference(handle);

        self.exclusion.run(ExclusiveOp::Full {
            resource_entry: &mut entry,
            storage_func: &mut func,
            resource_exit: &mut exit,
        })
    }

    pub fn update_complete(&self, handle: Handle) -> Status {
        self.end_update(handle, work::run_update_complete)
    }

    pub fn update_cancel(&self, handle: Handle) -> Status {
        self.end_update(handle, work::run_update_cancel)
    }

    fn end_update(
        &self,
        handle: Handle,
        finish: fn(&mut StorageAdapter, &[crate::resource::UpdateEntry]) -> Status,
    ) -> Status {
        if handle == INVALID_HANDLE {
            return Status::InvalidArgument;
        }
        let mut entry = || self.lock_resource()?.reference(handle);
        let mut func = || {
            // §7: update_complete/cancel without a prior update_begin is
            // FailedPrecondition — this handle's update list must be
            // non-empty.
            self.lock_resource()?.require_update_in_progress(handle)?;

            let cancellable = self.lock_storage()?.storage.get_capabilities()?.contains(Capabilities::CANCELLABLE);
            if !cancellable {
                self.lock_resource()?.remove_update_data_from_handle(handle)?;
                return Ok(());
            }
            let updates = self.lock_resource()?.get_update_data_from_handle(handle)?;
            let status = {
                let mut storage_state = self.lock_storage()?;
                finish(&mut storage_state.storage, &updates)
            };
            self.lock_resource()?.remove_update_data_from_handle(handle)?;
            if status.is_ok() {
                Ok(())
            } else {
                Err(status)
            }
        };
        let mut exit = || self.lock_resource()?.unreference(handle);

        self.exclusion.run(ExclusiveOp::Full {
            resource_entry: &mut entry,
            storage_func: &mut func,
            resource_exit: &mut exit,
        })
    }

    /// Sweep every item requiring a factory reset, drop unmanaged backend
    /// state, then invoke each registered callback with no lock held
    /// across the call so it may re-enter read-only APIs.
    pub fn invoke_factory_reset(&self) -> Status {
        let mut func = || {
            let mut storage_state = self.lock_storage()?;
            let ids = storage_state.storage.factory_reset_item_ids();
            for item_id in ids {
                if let Some(watchdog) = &self.watchdog {
                    watchdog();
                }
                match storage_state.storage.factory_reset_item(item_id) {
                    Ok(()) => {}
                    Err(err @ (Status::DataLoss | Status::Internal)) => {
                        log::error!("factory reset aborted at item {item_id}: {err}");
                        return Err(err);
                    }
                    Err(err) => {
                        log::warn!("factory reset of item {item_id} failed, demoted to Ok: {err}");
                    }
                }
            }
            storage_state.storage.clean()
        };
        let status = self.exclusion.run(ExclusiveOp::StorageOnly(&mut func));
        if !status.is_ok() {
            return status;
        }

        let count = match self.lock_resource() {
            Ok(resource) => resource.factory_reset_slot_count(),
            Err(e) => return e,
        };
        for id in 0..count {
            let mut entry = || {
                let cb = {
                    let mut resource = self.lock_resource()?;
                    resource.take_factory_reset_callback(id)
                };
                if let Some(mut cb) = cb {
                    log::info!("invoking registered factory-reset callback {id}");
                    cb();
                    let mut resource = self.lock_resource()?;
                    resource.restore_factory_reset_callback(id, cb);
                }
                Ok(())
            };
            let status = self.exclusion.run(ExclusiveOp::ResourceOnly(&mut entry));
            if !status.is_ok() {
                return status;
            }
        }
        Status::Ok
    }

    pub fn register_factory_reset(&self, callback: Box<dyn FnMut() + Send>) -> Result<FactoryResetId> {
        let mut callback = Some(callback);
        let mut out = INVALID_FACTORY_RESET_ID;
        let mut entry = || {
            let cb = callback.take().expect("register_factory_reset entry called twice");
            out = self.lock_resource()?.new_factory_reset(cb)?;
            Ok(())
        };
        let status = self.exclusion.run(ExclusiveOp::ResourceOnly(&mut entry));
        if status.is_ok() {
            Ok(out)
        } else {
            Err(status)
        }
    }

    pub fn unregister_factory_reset(&self, id: FactoryResetId) -> Status {
        let mut entry = || self.lock_resource()?.delete_factory_reset(id);
        self.exclusion.run(ExclusiveOp::ResourceOnly(&mut entry))
    }

    /// The public timed-wait variant of the storage lock. The returned
    /// guard's `Drop` is `unlock`.
    pub fn lock(&self) -> Result<Guard<'_>> {
        self.exclusion.storage.lock_timed(self.exclusion.timeout)
    }

    pub fn get_capabilities(&self) -> Result<Capabilities> {
        let mut out = Capabilities::empty();
        let mut func = || {
            out = self.lock_storage()?.storage.get_capabilities()?;
            Ok(())
        };
        let status = self.exclusion.run(ExclusiveOp::StorageOnly(&mut func));
        if status.is_ok() {
            Ok(out)
        } else {
            Err(status)
        }
    }

    pub fn get_item_capabilities(&self, item_id: ItemId) -> Result<ItemCapabilities> {
        let mut out = ItemCapabilities::empty();
        let mut func = || {
            out = self.lock_storage()?.storage.get_item_capabilities(item_id)?;
            Ok(())
        };
        let status = self.exclusion.run(ExclusiveOp::StorageOnly(&mut func));
        if status.is_ok() {
            Ok(out)
        } else {
            Err(status)
        }
    }

    pub fn downgrade(&self) -> Status {
        let mut func = || self.lock_storage()?.storage.downgrade();
        self.exclusion.run(ExclusiveOp::StorageOnly(&mut func))
    }

    /// Dispatches on the value's variant to its `IS_EMPTY` test (size==0
    /// for binary/raw, NUL-first for strings). A pure delegation; doesn't
    /// need a handle or a lock.
    pub fn is_data_empty(value: &Value) -> bool {
        value.is_empty()
    }
}

impl Drop for ParamStore {
    fn drop(&mut self) {
        if let Ok(mut storage_state) = self.storage.lock() {
            let StorageState { mm, scratch, .. } = &mut *storage_state;
            scratch.free(mm.as_mut());
        }
    }
}
