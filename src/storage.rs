//! Storage adapter: item-id -> backend routing, the save/load/clear/
//! update-begin/complete/cancel primitives, and capability queries.
//!
//! The typed codec (`crate::codec`) decides *what* bytes to write; this
//! module decides *where* they go and talks to the backend contract in
//! `crate::backend`.

use crate::backend::{
    Backend, BackendErrorKind, BackendHandle, DataIdCapabilities, OpenFlags, PlatformStorage,
    RoutingTable,
};
use crate::error::{Result, Status};
use crate::item::{Capabilities, ItemCapabilities, ItemId, UpdateType};
use crate::membuf::BackendTransfer;

/// The bound on the one-shot copy an `update_begin(Copy)` performs when
/// seeding a temp id from the live value (§4.5).
const UPDATE_BEGIN_COPY_CAP: usize = 64 * 1024;

failspot::failspot_name! {
    /// Named fault-injection points inside the storage adapter and work
    /// engine, used by the crate's own test suite (§8's "arrange backend
    /// to fail the write of C on the next save").
    pub enum FailSpot {
        BackendSave,
        BackendClear,
        BackendUpdateBegin,
        RollbackResave,
    }
}

pub struct StorageAdapter {
    routing: RoutingTable,
    pl: Box<dyn PlatformStorage>,
}

impl StorageAdapter {
    pub fn new(routing: RoutingTable, pl: Box<dyn PlatformStorage>) -> Self {
        Self { routing, pl }
    }

    pub fn convert_item_to_backend(&self, item_id: ItemId) -> Result<Backend> {
        Ok(self.routing.route(item_id)?.backend)
    }

    pub fn convert_item_to_pl_data_id(&self, item_id: ItemId) -> Result<u32> {
        let entry = self.routing.route(item_id)?;
        if entry.backend != Backend::Pl {
            return Err(Status::PermissionDenied);
        }
        Ok(entry.data_id)
    }

    pub fn convert_item_to_factory_reset_required(&self, item_id: ItemId) -> Result<bool> {
        Ok(self.routing.route(item_id)?.factory_reset_required)
    }

    pub fn get_capabilities(&mut self) -> Result<Capabilities> {
        let caps = map_pl(self.pl.get_capabilities())?;
        let mut out = Capabilities::empty();
        out.set(Capabilities::CANCELLABLE, caps.enable_tmp_id);
        Ok(out)
    }

    pub fn get_item_capabilities(&mut self, item_id: ItemId) -> Result<ItemCapabilities> {
        let entry = self.routing.route(item_id)?;
        match entry.backend {
            Backend::Other => Err(Status::PermissionDenied),
            Backend::Pl => {
                let caps: DataIdCapabilities =
                    map_pl(self.pl.get_id_capabilities(entry.data_id))?;
                let mut out = ItemCapabilities::empty();
                out.set(ItemCapabilities::READ_ONLY, caps.is_read_only);
                out.set(ItemCapabilities::ENABLE_OFFSET, caps.enable_seek);
                Ok(out)
            }
        }
    }

    /// `written_size` ← backend `get_data_info`; `NotFound` is benign and
    /// reported as zero.
    pub fn get_storage_info(&mut self, item_id: ItemId, effective_data_id: Option<u32>) -> Result<usize> {
        let entry = self.routing.route(item_id)?;
        if entry.backend != Backend::Pl {
            return Err(Status::PermissionDenied);
        }
        let data_id = effective_data_id.unwrap_or(entry.data_id);
        match self.pl.get_data_info(data_id) {
            Ok(info) => Ok(info.written_size),
            Err(BackendErrorKind::NotFound) => Ok(0),
            Err(kind) => Err(kind.into_status()),
        }
    }

    /// Save `bytes` at `offset` against the item's effective data-id.
    /// `written_size` is the size observed by `get_storage_info` just
    /// before this call, used only to validate `offset`.
    pub fn save(
        &mut self,
        item_id: ItemId,
        offset: usize,
        bytes: &[u8],
        append: bool,
        effective_data_id: Option<u32>,
        written_size: usize,
    ) -> Result<usize> {
        if bytes.is_empty() {
            return Err(Status::InvalidArgument);
        }
        if offset > written_size {
            return Err(Status::OutOfRange);
        }
        let entry = self.routing.route(item_id)?;
        if entry.backend != Backend::Pl {
            return Err(Status::PermissionDenied);
        }
        if failspot::failspot!(FailSpot::BackendSave) {
            return Err(Status::DataLoss);
        }
        let data_id = effective_data_id.unwrap_or(entry.data_id);
        let flags = if append { OpenFlags::RdWr } else { OpenFlags::WrOnly };
        let handle = map_pl(self.pl.open(data_id, flags))?;
        let result = (|| {
            map_pl(self.pl.seek(handle, offset))?;
            map_pl(self.pl.write(handle, bytes))
        })();
        let _ = self.pl.close(handle);
        result
    }

    /// Load up to `size` bytes at `offset`, clamped to `written_size`.
    pub fn load(
        &mut self,
        item_id: ItemId,
        offset: usize,
        size: usize,
        effective_data_id: Option<u32>,
        written_size: usize,
    ) -> Result<Vec<u8>> {
        if written_size == 0 {
            return Ok(Vec::new());
        }
        let entry = self.routing.route(item_id)?;
        if entry.backend != Backend::Pl {
            return Err(Status::PermissionDenied);
        }
        let clamped = if offset + size > written_size {
            written_size.saturating_sub(offset)
        } else {
            size
        };
        let data_id = effective_data_id.unwrap_or(entry.data_id);
        let handle = map_pl(self.pl.open(data_id, OpenFlags::RdOnly))?;
        let result = (|| {
            map_pl(self.pl.seek(handle, offset))?;
            let mut buf = vec![0u8; clamped];
            let n = map_pl(self.pl.read(handle, &mut buf))?;
            buf.truncate(n);
            Ok(buf)
        })();
        let _ = self.pl.close(handle);
        result
    }

    /// Erase the item's live data-id; `NotFound` is silently success.
    pub fn clear(&mut self, item_id: ItemId, effective_data_id: Option<u32>) -> Result<()> {
        let entry = self.routing.route(item_id)?;
        if entry.backend != Backend::Pl {
            return Err(Status::PermissionDenied);
        }
        if failspot::failspot!(FailSpot::BackendClear) {
            return Err(Status::DataLoss);
        }
        let data_id = effective_data_id.unwrap_or(entry.data_id);
        match self.pl.erase(data_id) {
            Ok(()) | Err(BackendErrorKind::NotFound) => Ok(()),
            Err(kind) => Err(kind.into_status()),
        }
    }

    /// Every item-id requiring a factory reset visit, ascending, for
    /// `invoke_factory_reset`'s step (a).
    pub fn factory_reset_item_ids(&self) -> Vec<ItemId> {
        self.routing.factory_reset_item_ids()
    }

    pub fn factory_reset_item(&mut self, item_id: ItemId) -> Result<()> {
        let entry = self.routing.route(item_id)?;
        if entry.backend != Backend::Pl {
            return Err(Status::PermissionDenied);
        }
        match self.pl.factory_reset(entry.data_id) {
            Ok(()) | Err(BackendErrorKind::NotFound) => Ok(()),
            Err(kind) => Err(kind.into_status()),
        }
    }

    pub fn clean(&mut self) -> Result<()> {
        map_pl(self.pl.clean())
    }

    pub fn downgrade(&mut self) -> Result<()> {
        map_pl(self.pl.downgrade())
    }

    /// Begin a cancellable update: obtain a temp id, and for `Copy` with
    /// a non-empty live value, seed it from the current bytes (bounded —
    /// exceeding the bound is `Internal`, not truncated silently).
    pub fn update_begin(
        &mut self,
        item_id: ItemId,
        update_type: UpdateType,
        written_size: usize,
    ) -> Result<u32> {
        let entry = self.routing.route(item_id)?;
        if entry.backend != Backend::Pl {
            return Err(Status::PermissionDenied);
        }
        if failspot::failspot!(FailSpot::BackendUpdateBegin) {
            return Err(Status::Internal);
        }
        let tmp_id = map_pl(self.pl.get_tmp_data_id(entry.data_id))?;

        if update_type == UpdateType::Copy && written_size > 0 {
            if written_size > UPDATE_BEGIN_COPY_CAP {
                return Err(Status::Internal);
            }
            let live = self.load(item_id, 0, written_size, None, written_size)?;
            self.save(item_id, 0, &live, false, Some(tmp_id), 0)?;
        }

        Ok(tmp_id)
    }

    pub fn update_complete(&mut self, item_id: ItemId, tmp_id: u32) -> Result<()> {
        let entry = self.routing.route(item_id)?;
        if entry.backend != Backend::Pl {
            return Err(Status::PermissionDenied);
        }
        map_pl(self.pl.switch_data(tmp_id, entry.data_id))
    }

    pub fn update_cancel(&mut self, _item_id: ItemId, tmp_id: u32) -> Result<()> {
        match self.pl.erase(tmp_id) {
            Ok(()) | Err(BackendErrorKind::NotFound) => Ok(()),
            Err(kind) => Err(kind.into_status()),
        }
    }

    /// A `BackendTransfer` view of one item's effective data-id, for use
    /// by the buffer bridge when capturing/restoring the backup preimage.
    pub fn transfer_for<'a>(
        &'a mut self,
        item_id: ItemId,
        effective_data_id: Option<u32>,
        flags: OpenFlags,
    ) -> Result<ItemTransfer<'a>> {
        let entry = self.routing.route(item_id)?;
        if entry.backend != Backend::Pl {
            return Err(Status::PermissionDenied);
        }
        let data_id = effective_data_id.unwrap_or(entry.data_id);
        let handle = map_pl(self.pl.open(data_id, flags))?;
        Ok(ItemTransfer {
            pl: self.pl.as_mut(),
            handle,
        })
    }

}

fn map_pl<T>(result: std::result::Result<T, BackendErrorKind>) -> Result<T> {
    result.map_err(|kind| kind.into_status())
}

/// A `BackendTransfer` implementation over a single already-open backend
/// handle, for the buffer bridge's backup load/save.
pub struct ItemTransfer<'a> {
    pl: &'a mut dyn PlatformStorage,
    handle: BackendHandle,
}

impl BackendTransfer for ItemTransfer<'_> {
    fn write_at(&mut self, offset: usize, buf: &[u8]) -> Result<usize> {
        self.pl.seek(self.handle, offset).map_err(|e| e.into_status())?;
        self.pl.write(self.handle, buf).map_err(|e| e.into_status())
    }

    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.pl.seek(self.handle, offset).map_err(|e| e.into_status())?;
        self.pl.read(self.handle, buf).map_err(|e| e.into_status())
    }
}

impl Drop for ItemTransfer<'_> {
    fn drop(&mut self) {
        let _ = self.pl.close(self.handle);
    }
}
