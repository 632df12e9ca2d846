//! Invariant 8 (read-only rejection), invariant 9 (offset rejection
//! without capability), and S5 (OutOfRange save) — all three leave
//! persisted state unchanged.

mod common;

use common::*;
use param_store::error::Status;
use param_store::item::{ItemType, StructInfo, Value};
use param_store::mock::MockStorage;
use param_store::resource::INVALID_HANDLE;

#[test]
fn save_on_read_only_item_is_rejected_and_state_unchanged() {
    let routing = routing_with(&[(ITEM_RO, 601, false)]);
    let mut mock = MockStorage::new(true);
    mock.seed(601, b"abc\0".to_vec());
    mock.mark_read_only(601, true);
    let (store, ..) = store_from_mock(routing, mock);
    let h = store.open().unwrap();

    let mut info = StructInfo::new(vec![member(ITEM_RO, ItemType::String, 16, true)]);
    let status = store.save(h, &mut info, &[Value::Text("xyz".into())]);
    assert_eq!(status, Status::PermissionDenied);
    assert_eq!(store.get_size(INVALID_HANDLE, ITEM_RO).unwrap(), 4);

    store.close(h);
}

#[test]
fn clear_on_read_only_item_is_rejected_and_state_unchanged() {
    let routing = routing_with(&[(ITEM_RO, 602, false)]);
    let mut mock = MockStorage::new(true);
    mock.seed(602, vec![1, 2, 3]);
    mock.mark_read_only(602, true);
    let (store, ..) = store_from_mock(routing, mock);
    let h = store.open().unwrap();

    let mut info = StructInfo::new(vec![member(ITEM_RO, ItemType::BinaryArray, 16, true)]);
    let status = store.clear(h, &mut info);
    assert_eq!(status, Status::PermissionDenied);
    assert_eq!(store.get_size(INVALID_HANDLE, ITEM_RO).unwrap(), 3);

    store.close(h);
}

/// Invariant 9: a nonzero-offset save on an item without the offset
/// capability is rejected before any backend access.
#[test]
fn offset_save_without_capability_is_invalid_argument() {
    let routing = routing_with(&[(ITEM_NO_OFFSET, 603, false)]);
    let mut mock = MockStorage::new(true);
    mock.mark_offset_disabled(603);
    let (store, ..) = store_from_mock(routing, mock);
    let h = store.open().unwrap();

    let mut info = StructInfo::new(vec![member(ITEM_NO_OFFSET, ItemType::OffsetBinaryArray, 16, true)]);
    let status = store.save(
        h,
        &mut info,
        &[Value::OffsetBinary { offset: 4, data: vec![1, 2] }],
    );
    assert_eq!(status, Status::InvalidArgument);
    assert_eq!(store.get_size(INVALID_HANDLE, ITEM_NO_OFFSET).unwrap(), 0);

    store.close(h);
}

/// S5. A save exceeding the declared max size is rejected and leaves no
/// trace on disk.
#[test]
fn save_over_declared_max_is_out_of_range() {
    let routing = routing_with(&[(ITEM_X, 604, false)]);
    let store = store_with(routing, true);
    let h = store.open().unwrap();

    let mut info = StructInfo::new(vec![member(ITEM_X, ItemType::String, 4, true)]);
    let status = store.save(h, &mut info, &[Value::Text("12345".into())]);
    assert_eq!(status, Status::OutOfRange);
    assert_eq!(store.get_size(INVALID_HANDLE, ITEM_X).unwrap(), 0);

    store.close(h);
}
