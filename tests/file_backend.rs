//! Exercises the `PlatformStorage` trait boundary against a real
//! filesystem-backed implementation instead of the in-memory mock, to
//! check that the engine doesn't secretly depend on the mock's
//! in-process shortcuts (e.g. shared `Vec<u8>` storage surviving across
//! calls without ever touching `std::fs`).

mod common;

use common::*;
use param_store::item::{ItemType, StructInfo, UpdateType, Value};
use param_store::resource::INVALID_HANDLE;

#[test]
fn save_load_survives_a_real_file_round_trip() {
    let routing = routing_with(&[(ITEM_A, 1001, false)]);
    let store = store_with_file_backend(routing);
    let h = store.open().unwrap();

    let mut info = StructInfo::new(vec![member(ITEM_A, ItemType::String, 32, true)]);
    assert!(store.save(h, &mut info, &[Value::Text("on-disk".into())]).is_ok());
    assert_eq!(store.get_size(INVALID_HANDLE, ITEM_A).unwrap(), 8); // "on-disk" + NUL

    let mut out = vec![Value::Text(String::new())];
    assert!(store.load(h, &mut info, &mut out).is_ok());
    match &out[0] {
        Value::Text(s) => assert_eq!(s, "on-disk"),
        _ => panic!("wrong variant"),
    }

    assert!(store.clear(h, &mut info).is_ok());
    assert_eq!(store.get_size(INVALID_HANDLE, ITEM_A).unwrap(), 0);

    store.close(h);
}

/// A cancellable update against the real backend: `switch_data` must
/// actually rename the temp file over the live one on disk.
#[test]
fn update_commit_switches_the_real_file_on_disk() {
    let routing = routing_with(&[(ITEM_A, 1002, false)]);
    let store = store_with_file_backend(routing);
    let h = store.open().unwrap();

    let mut info = StructInfo::new(vec![member(ITEM_A, ItemType::BinaryArray, 32, true)]);
    assert!(store.save(h, &mut info, &[Value::Binary(vec![1, 2, 3])]).is_ok());

    assert!(store.update_begin(h, &mut info, UpdateType::Empty).is_ok());
    assert!(store.save(h, &mut info, &[Value::Binary(vec![9, 9])]).is_ok());
    assert!(store.update_complete(h).is_ok());

    let mut out = vec![Value::Binary(Vec::new())];
    assert!(store.load(h, &mut info, &mut out).is_ok());
    match &out[0] {
        Value::Binary(b) => assert_eq!(b, &vec![9, 9]),
        _ => panic!("wrong variant"),
    }

    store.close(h);
}
