//! The work engine: per-call work context, member iteration, and the
//! save/clear/update-begin pipelines with their rollback discipline.

use crate::backend::OpenFlags;
use crate::codec;
use crate::error::{Result, Status};
use crate::item::{ItemId, StructInfo, UpdateType, Value};
use crate::membuf::{Buffer, MemoryManager};
use crate::resource::UpdateEntry;
use crate::storage::{FailSpot, StorageAdapter};

/// What rollback should do for one member, decided before any mutation
/// it would have to undo (invariant 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Nothing to undo.
    Skip,
    /// Restore the backup buffer's pre-image.
    Save,
    /// Erase whatever we are about to create.
    Clear,
}

/// Per-member scratch state for one call.
pub struct MemberData {
    pub enabled: bool,
    pub append: bool,
    pub cancel: CancelPolicy,
    pub update: bool,
    pub read_only: bool,
    pub enable_offset: bool,
    pub written_size: usize,
    pub buffer: Buffer,
    pub update_data: Option<u32>,
}

impl Default for MemberData {
    fn default() -> Self {
        Self {
            enabled: false,
            append: false,
            cancel: CancelPolicy::Skip,
            update: false,
            read_only: false,
            enable_offset: false,
            written_size: 0,
            buffer: Buffer::default(),
            update_data: None,
        }
    }
}

/// The per-call work context: one [`MemberData`] per declared member,
/// plus the cursor rollback needs to know how far the forward pass got.
pub struct Work {
    pub member_data: Vec<MemberData>,
    pub last_index: usize,
}

pub fn allocate_work(info: &StructInfo) -> Work {
    let mut member_data = Vec::with_capacity(info.len());
    member_data.resize_with(info.len(), MemberData::default);
    Work {
        member_data,
        last_index: 0,
    }
}

/// Evaluate each member's mask predicate exactly once, snapshotting the
/// result into `enabled`. Returns the number of enabled members.
pub fn setup_work_mask(info: &StructInfo, work: &mut Work) -> usize {
    let mut count = 0;
    for (idx, member) in info.members.iter().enumerate() {
        let enabled = (member.mask)();
        work.member_data[idx].enabled = enabled;
        if enabled {
            count += 1;
        }
    }
    count
}

/// For each enabled member: pick up an in-flight update (if this handle
/// has one for that item-id), then fetch `written_size` and capabilities
/// for non-custom members.
pub fn get_work_storage_info(
    info: &StructInfo,
    work: &mut Work,
    handle_updates: &[UpdateEntry],
    storage: &mut StorageAdapter,
) -> Result<()> {
    for (idx, member) in info.members.iter().enumerate() {
        let md = &mut work.member_data[idx];
        if !md.enabled {
            continue;
        }
        if let Some(entry) = handle_updates.iter().find(|e| e.item_id == member.item_id) {
            md.update = true;
            md.update_data = Some(entry.tmp_data_id);
        }
        if member.is_custom() {
            continue;
        }
        let effective = md.update_data;
        md.written_size = storage.get_storage_info(member.item_id, effective)?;
        let caps = storage.get_item_capabilities(member.item_id)?;
        md.read_only = caps.contains(crate::item::ItemCapabilities::READ_ONLY);
        md.enable_offset = caps.contains(crate::item::ItemCapabilities::ENABLE_OFFSET);
    }
    Ok(())
}

fn load_backup(
    storage: &mut StorageAdapter,
    mm: &mut dyn MemoryManager,
    scratch: &mut [u8],
    item_id: ItemId,
    md: &mut MemberData,
) -> Result<()> {
    md.buffer.allocate(mm, md.written_size)?;
    let mut transfer = storage.transfer_for(item_id, md.update_data, OpenFlags::RdOnly)?;
    md.buffer
        .load(mm, &mut transfer, md.written_size, scratch, md.enable_offset)
}

/// Drive a `save` over every enabled member, in declaration order,
/// rolling back on the first failure.
pub fn run_save(
    info: &mut StructInfo,
    work: &mut Work,
    values: &[Value],
    storage: &mut StorageAdapter,
    mm: &mut dyn MemoryManager,
    scratch: &mut [u8],
) -> Status {
    for idx in 0..info.len() {
        work.last_index = idx;
        let md_enabled = work.member_data[idx].enabled;
        if !md_enabled {
            continue;
        }
        let is_custom = info.members[idx].is_custom();
        let item_id = info.members[idx].item_id;

        let step: Result<()> = if is_custom {
            let custom = info.members[idx].custom.as_mut().expect("custom member without ops");
            (custom.save)(item_id)
        } else {
            run_save_member(info, work, idx, values, storage, mm, scratch)
        };

        if let Err(err) = step {
            log::warn!("save failed at member {idx} (item {item_id}): {err}");
            let outcome = internal_cancel(info, work, storage, mm, scratch);
            return if outcome.any_failed {
                log::error!("rollback after failed save also failed; escalating to DataLoss");
                Status::DataLoss
            } else {
                err
            };
        }
    }
    Status::Ok
}

fn run_save_member(
    info: &mut StructInfo,
    work: &mut Work,
    idx: usize,
    values: &[Value],
    storage: &mut StorageAdapter,
    mm: &mut dyn MemoryManager,
    scratch: &mut [u8],
) -> Result<()> {
    let item_id = info.members[idx].item_id;
    let item_type = info.members[idx].item_type;
    let max_size = info.members[idx].max_size;

    if work.member_data[idx].read_only {
        return Err(Status::PermissionDenied);
    }

    let written_size = work.member_data[idx].written_size;
    if written_size == 0 {
        work.member_data[idx].cancel = CancelPolicy::Clear;
    } else {
        work.member_data[idx].cancel = CancelPolicy::Save;
        load_backup(storage, mm, scratch, item_id, &mut work.member_data[idx])?;
    }

    let value = &values[idx];
    let enable_offset = work.member_data[idx].enable_offset;

    if written_size > 0 {
        let md = &mut work.member_data[idx];
        let equal = match value {
            Value::Binary(b) | Value::Raw(b) => {
                let n = b.len().min(written_size);
                md.buffer
                    .is_equal(mm, 0, n, &b[..n], scratch, enable_offset)
                    .unwrap_or(false)
                    && b.len() == written_size
            }
            Value::Text(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                let n = bytes.len().min(written_size);
                md.buffer
                    .is_equal(mm, 0, n, &bytes[..n], scratch, enable_offset)
                    .unwrap_or(false)
                    && bytes.len() == written_size
            }
            Value::OffsetBinary { offset, data } => {
                let n = data.len();
                md.buffer
                    .is_equal(mm, *offset as usize, n, data, scratch, enable_offset)
                    .unwrap_or(false)
            }
        };
        if equal {
            md.cancel = CancelPolicy::Skip;
            return Ok(());
        }
    }

    let caps = {
        let mut caps = crate::item::ItemCapabilities::empty();
        caps.set(crate::item::ItemCapabilities::ENABLE_OFFSET, enable_offset);
        caps
    };
    let encoded = codec::encode(item_type, value, max_size, caps)?;

    let effective = work.member_data[idx].update_data;
    if encoded.clear {
        storage.clear(item_id, effective)?;
    } else {
        storage.save(
            item_id,
            encoded.offset,
            &encoded.bytes,
            encoded.append,
            effective,
            written_size,
        )?;
    }
    Ok(())
}

/// Drive a `clear` over every enabled member, symmetric to `run_save`.
pub fn run_clear(
    info: &mut StructInfo,
    work: &mut Work,
    storage: &mut StorageAdapter,
    mm: &mut dyn MemoryManager,
    scratch: &mut [u8],
) -> Status {
    for idx in 0..info.len() {
        work.last_index = idx;
        if !work.member_data[idx].enabled {
            continue;
        }
        let is_custom = info.members[idx].is_custom();
        let item_id = info.members[idx].item_id;

        let step: Result<()> = if is_custom {
            let custom = info.members[idx].custom.as_mut().expect("custom member without ops");
            (custom.clear)(item_id)
        } else if work.member_data[idx].read_only {
            Err(Status::PermissionDenied)
        } else if work.member_data[idx].written_size == 0 {
            work.member_data[idx].cancel = CancelPolicy::Skip;
            Ok(())
        } else {
            work.member_data[idx].cancel = CancelPolicy::Save;
            load_backup(storage, mm, scratch, item_id, &mut work.member_data[idx])
                .and_then(|_| storage.clear(item_id, work.member_data[idx].update_data))
        };

        if let Err(err) = step {
            log::warn!("clear failed at member {idx} (item {item_id}): {err}");
            let outcome = internal_cancel(info, work, storage, mm, scratch);
            return if outcome.any_failed {
                Status::DataLoss
            } else {
                err
            };
        }
    }
    Status::Ok
}

/// Drive a `load` over every enabled member. Never rolls back: loads
/// don't mutate persisted state.
pub fn run_load(
    info: &mut StructInfo,
    work: &mut Work,
    values: &mut [Value],
    storage: &mut StorageAdapter,
) -> Status {
    for idx in 0..info.len() {
        if !work.member_data[idx].enabled {
            continue;
        }
        let item_id = info.members[idx].item_id;
        let item_type = info.members[idx].item_type;
        let max_size = info.members[idx].max_size;
        let is_custom = info.members[idx].is_custom();

        let step: Result<()> = if is_custom {
            let custom = info.members[idx].custom.as_mut().expect("custom member without ops");
            (custom.load)(item_id)
        } else {
            let effective = work.member_data[idx].update_data;
            let written_size = work.member_data[idx].written_size;
            storage
                .load(item_id, 0, max_size, effective, written_size)
                .and_then(|raw| codec::decode(item_type, max_size, &raw))
                .map(|decoded| {
                    values[idx] = decoded;
                })
        };

        if let Err(err) = step {
            log::warn!("load failed at member {idx} (item {item_id}): {err}");
            return err;
        }
    }
    Status::Ok
}

/// Accumulated outcome of a rollback pass: whether any step failed, in
/// which case the caller must escalate its result to `DataLoss`.
pub struct RollbackOutcome {
    pub any_failed: bool,
}

/// Roll back every member from `work.last_index` down to 0, in reverse
/// declaration order (invariant 3). Every step runs regardless of
/// earlier failures so the pre-image is restored as completely as
/// possible; the worst outcome is reported.
fn internal_cancel(
    info: &mut StructInfo,
    work: &mut Work,
    storage: &mut StorageAdapter,
    mm: &mut dyn MemoryManager,
    scratch: &mut [u8],
) -> RollbackOutcome {
    let mut any_failed = false;
    for idx in (0..=work.last_index).rev() {
        if !work.member_data[idx].enabled {
            continue;
        }
        let is_custom = info.members[idx].is_custom();
        let item_id = info.members[idx].item_id;

        if is_custom {
            let custom = info.members[idx].custom.as_mut().expect("custom member without ops");
            if let Err(err) = (custom.cancel)(item_id) {
                log::error!("custom cancel failed for item {item_id}: {err}");
                any_failed = true;
            }
            continue;
        }

        let cancel = work.member_data[idx].cancel;
        if cancel == CancelPolicy::Skip {
            continue;
        }

        let result = match cancel {
            CancelPolicy::Clear => {
                storage.clear(item_id, work.member_data[idx].update_data)
            }
            CancelPolicy::Save => resave_backup(storage, mm, scratch, item_id, &mut work.member_data[idx]),
            CancelPolicy::Skip => unreachable!(),
        };

        if let Err(err) = result {
            log::error!("rollback step failed for item {item_id}: {err}");
            any_failed = true;
        }
    }
    RollbackOutcome { any_failed }
}

fn resave_backup(
    storage: &mut StorageAdapter,
    mm: &mut dyn MemoryManager,
    scratch: &mut [u8],
    item_id: ItemId,
    md: &mut crate::work::MemberData,
) -> Result<()> {
    if failspot::failspot!(FailSpot::RollbackResave) {
        return Err(Status::DataLoss);
    }
    let mut transfer = storage.transfer_for(item_id, md.update_data, OpenFlags::WrOnly)?;
    md.buffer.save(mm, &mut transfer, md.written_size, scratch, md.enable_offset)
}

/// Begin a cancellable update over every enabled non-custom member.
/// Returns the list of `(item_id, tmp_id)` pairs the caller must persist
/// into the handle's update list on success.
pub fn run_update_begin(
    info: &mut StructInfo,
    work: &mut Work,
    update_type: UpdateType,
    storage: &mut StorageAdapter,
) -> std::result::Result<Vec<UpdateEntry>, Status> {
    let mut begun = Vec::new();
    for idx in 0..info.len() {
        if !work.member_data[idx].enabled || info.members[idx].is_custom() {
            continue;
        }
        let item_id = info.members[idx].item_id;
        let written_size = work.member_data[idx].written_size;
        match storage.update_begin(item_id, update_type, written_size) {
            Ok(tmp_id) => begun.push(UpdateEntry { item_id, tmp_data_id: tmp_id }),
            Err(err) => {
                log::warn!("update_begin failed at item {item_id}: {err}");
                for entry in begun.iter().rev() {
                    if let Err(cancel_err) = storage.update_cancel(entry.item_id, entry.tmp_data_id) {
                        log::error!(
                            "update_begin rollback: cancel failed for item {}: {cancel_err}",
                            entry.item_id
                        );
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(begun)
}

pub fn run_update_complete(storage: &mut StorageAdapter, updates: &[UpdateEntry]) -> Status {
    for entry in updates {
        if let Err(err) = storage.update_complete(entry.item_id, entry.tmp_data_id) {
            log::error!("update_complete failed for item {}: {err}", entry.item_id);
            return err;
        }
    }
    Status::Ok
}

pub fn run_update_cancel(storage: &mut StorageAdapter, updates: &[UpdateEntry]) -> Status {
    let mut worst = Status::Ok;
    for entry in updates {
        if let Err(err) = storage.update_cancel(entry.item_id, entry.tmp_data_id) {
            log::error!("update_cancel failed for item {}: {err}", entry.item_id);
            worst = err;
        }
    }
    worst
}
