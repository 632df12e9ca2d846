//! The large-heap memory manager contract, and the buffer bridge that
//! moves bytes between a backing region and a storage item.

use crate::error::{range_equal, Result, Status};

/// Opaque large-heap region handle, owned by whichever [`MemoryManager`]
/// produced it.
pub type RegionHandle = u64;
/// Opaque file-mode handle over a region, when mapping is unsupported.
pub type FileHandle = u64;

/// Why an allocation failed. Kept separate from [`crate::backend::BackendErrorKind`]
/// because the design calls out OOM specifically (`ResourceExhausted`,
/// not the generic backend mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocErrorKind {
    OutOfMemory,
}

/// The environment-provided large-heap memory manager: allocate/free a
/// region, and either map it directly into address space or fall back to
/// file-like `open/seek/read/write` when mapping is unsupported.
pub trait MemoryManager: Send {
    fn allocate(&mut self, size: usize) -> std::result::Result<RegionHandle, AllocErrorKind>;
    fn free(&mut self, handle: RegionHandle);
    fn is_map_support(&mut self, handle: RegionHandle) -> bool;
    /// Borrow the region's bytes directly. Returns `None` if mapping is
    /// unsupported or the handle is stale.
    fn map(&mut self, handle: RegionHandle) -> Option<&mut [u8]>;
    fn unmap(&mut self, handle: RegionHandle);
    fn fopen(&mut self, handle: RegionHandle) -> Option<FileHandle>;
    fn fclose(&mut self, file: FileHandle);
    fn fseek(&mut self, file: FileHandle, offset: usize) -> Option<usize>;
    fn fread(&mut self, file: FileHandle, buf: &mut [u8]) -> Option<usize>;
    fn fwrite(&mut self, file: FileHandle, buf: &[u8]) -> Option<usize>;
}

/// The far side of a buffer transfer: the storage item a region's bytes
/// are being saved to or loaded from. Kept as a trait (rather than the
/// buffer bridge calling the storage adapter directly) to avoid the
/// cyclic dependency the design notes call out between the work engine
/// and the codec.
pub trait BackendTransfer {
    /// Write `buf` at absolute `offset`; returns bytes actually written.
    fn write_at(&mut self, offset: usize, buf: &[u8]) -> Result<usize>;
    /// Read into `buf` at absolute `offset`; returns bytes actually read.
    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize>;
}

/// An owned backing region holding the pre-image (or a pending value) of
/// an item, plus the mechanics to move it to/from the backend.
#[derive(Default)]
pub struct Buffer {
    region: Option<RegionHandle>,
    size: usize,
}

impl Buffer {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_allocated(&self) -> bool {
        self.region.is_some()
    }

    pub fn allocate(&mut self, mm: &mut dyn MemoryManager, size: usize) -> Result<()> {
        if size == 0 || size >= i32::MAX as usize {
            return Err(Status::Internal);
        }
        let region = mm.allocate(size).map_err(|AllocErrorKind::OutOfMemory| {
            log::warn!("buffer bridge: backend out of memory allocating {size} bytes");
            Status::ResourceExhausted
        })?;
        self.region = Some(region);
        self.size = size;
        Ok(())
    }

    /// Idempotent for an empty buffer.
    pub fn free(&mut self, mm: &mut dyn MemoryManager) {
        if let Some(region) = self.region.take() {
            mm.free(region);
        }
        self.size = 0;
    }

    /// Move `size` bytes from the region into `sink` at absolute offset 0.
    pub fn save(
        &mut self,
        mm: &mut dyn MemoryManager,
        sink: &mut dyn BackendTransfer,
        size: usize,
        scratch: &mut [u8],
        enable_offset: bool,
    ) -> Result<()> {
        let region = self.region.ok_or(Status::Internal)?;
        if mm.is_map_support(region) {
            let slice = mm.map(region).ok_or(Status::Internal)?;
            let written = sink.write_at(0, &slice[..size]);
            mm.unmap(region);
            let written = written?;
            if written != size {
                return Err(Status::DataLoss);
            }
            return Ok(());
        }
        self.file_mode_transfer(mm, scratch, size, enable_offset, |scratch_chunk, offset| {
            let n = sink.write_at(offset, scratch_chunk)?;
            Ok(n)
        })
    }

    /// Move `size` bytes from `sink` at absolute offset 0 into the region.
    pub fn load(
        &mut self,
        mm: &mut dyn MemoryManager,
        sink: &mut dyn BackendTransfer,
        size: usize,
        scratch: &mut [u8],
        enable_offset: bool,
    ) -> Result<()> {
        let region = self.region.ok_or(Status::Internal)?;
        if mm.is_map_support(region) {
            let slice = mm.map(region).ok_or(Status::Internal)?;
            let read = sink.read_at(0, &mut slice[..size]);
            mm.unmap(region);
            read?;
            return Ok(());
        }
        self.file_mode_transfer_into_region(mm, sink, scratch, size, enable_offset)
    }

    /// Does `data` at absolute `offset` byte-equal the region's
    /// pre-image? No backend access: this compares against whatever is
    /// already resident in the region.
    pub fn is_equal(
        &mut self,
        mm: &mut dyn MemoryManager,
        offset: usize,
        size: usize,
        data: &[u8],
        scratch: &mut [u8],
        enable_offset: bool,
    ) -> Result<bool> {
        let region = self.region.ok_or(Status::Internal)?;
        if mm.is_map_support(region) {
            let slice = mm.map(region).ok_or(Status::Internal)?;
            let equal = range_equal(data, offset, slice, 0);
            mm.unmap(region);
            return Ok(equal);
        }

        if size > scratch.len() && !enable_offset {
            return Err(Status::Internal);
        }
        let file = mm.fopen(region).ok_or(Status::Internal)?;
        let result = (|| {
            mm.fseek(file, offset).ok_or(Status::Internal)?;
            let mut consumed = 0usize;
            while consumed < size {
                let chunk = (size - consumed).min(scratch.len());
                let n = mm
                    .fread(file, &mut scratch[..chunk])
                    .ok_or(Status::Internal)?;
                if n == 0 {
                    return Err(Status::Internal);
                }
                if scratch[..n] != data[consumed..consumed + n] {
                    return Ok(false);
                }
                consumed += n;
            }
            Ok(true)
        })();
        mm.fclose(file);
        result
    }

    fn file_mode_transfer(
        &self,
        mm: &mut dyn MemoryManager,
        scratch: &mut [u8],
        size: usize,
        enable_offset: bool,
        mut relay: impl FnMut(&[u8], usize) -> Result<usize>,
    ) -> Result<()> {
        if size > scratch.len() && !enable_offset {
            return Err(Status::Internal);
        }
        let region = self.region.ok_or(Status::Internal)?;
        let file = mm.fopen(region).ok_or(Status::Internal)?;
        let result = (|| {
            mm.fseek(file, 0).ok_or(Status::Internal)?;
            let mut offset = 0usize;
            while offset < size {
                let chunk = (size - offset).min(scratch.len());
                let n = mm
                    .fread(file, &mut scratch[..chunk])
                    .ok_or(Status::Internal)?;
                if offset + n < size && n == 0 {
                    return Err(Status::Internal);
                }
                relay(&scratch[..n], offset)?;
                offset += n;
                if n == 0 {
                    break;
                }
            }
            if offset < size {
                return Err(Status::Internal);
            }
            Ok(())
        })();
        mm.fclose(file);
        result
    }

    fn file_mode_transfer_into_region(
        &self,
        mm: &mut dyn MemoryManager,
        sink: &mut dyn BackendTransfer,
        scratch: &mut [u8],
        size: usize,
        enable_offset: bool,
    ) -> Result<()> {
        if size > scratch.len() && !enable_offset {
            return Err(Status::Internal);
        }
        let region = self.region.ok_or(Status::Internal)?;
        let file = mm.fopen(region).ok_or(Status::Internal)?;
        let result = (|| {
            mm.fseek(file, 0).ok_or(Status::Internal)?;
            let mut offset = 0usize;
            while offset < size {
                let chunk = (size - offset).min(scratch.len());
                let n = sink.read_at(offset, &mut scratch[..chunk])?;
                if n == 0 {
                    if offset < size {
                        return Err(Status::Internal);
                    }
                    break;
                }
                mm.fwrite(file, &scratch[..n]).ok_or(Status::Internal)?;
                offset += n;
            }
            if offset < size {
                return Err(Status::Internal);
            }
            Ok(())
        })();
        mm.fclose(file);
        result
    }
}
