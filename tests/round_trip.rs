//! Invariant 4: save/load round-trips for each distinct codec family, plus
//! the empty-value save/load shortcut. `BinaryPointer`/`OffsetBinaryPointer`
//! share their codec path with the `*Array` variants exactly (see
//! `codec::encode`/`codec::decode`), so only the representative member of
//! each pair is exercised here.

mod common;

use common::*;
use param_store::item::{ItemType, StructInfo, Value};
use param_store::resource::INVALID_HANDLE;

fn round_trip_one(item_id: param_store::item::ItemId, item_type: ItemType, max_size: usize, value: Value) {
    let routing = routing_with(&[(item_id, 700 + item_id, false)]);
    let store = store_with(routing, true);
    let h = store.open().unwrap();

    let mut info = StructInfo::new(vec![member(item_id, item_type, max_size, true)]);
    assert!(store.save(h, &mut info, &[value.clone()]).is_ok());

    let mut out = vec![placeholder(item_type)];
    assert!(store.load(h, &mut info, &mut out).is_ok());
    assert_values_equal(&value, &out[0]);

    store.close(h);
}

fn placeholder(item_type: ItemType) -> Value {
    match item_type {
        ItemType::BinaryArray | ItemType::BinaryPointer => Value::Binary(Vec::new()),
        ItemType::OffsetBinaryArray | ItemType::OffsetBinaryPointer => {
            Value::OffsetBinary { offset: 0, data: Vec::new() }
        }
        ItemType::String => Value::Text(String::new()),
        ItemType::Raw => Value::Raw(Vec::new()),
    }
}

fn assert_values_equal(expected: &Value, actual: &Value) {
    match (expected, actual) {
        (Value::Binary(a), Value::Binary(b)) => assert_eq!(a, b),
        (Value::OffsetBinary { data: a, .. }, Value::OffsetBinary { data: b, .. }) => assert_eq!(a, b),
        (Value::Text(a), Value::Text(b)) => assert_eq!(a, b),
        (Value::Raw(a), Value::Raw(b)) => assert_eq!(a, b),
        _ => panic!("mismatched variants"),
    }
}

#[test]
fn binary_array_round_trip() {
    round_trip_one(10, ItemType::BinaryArray, 16, Value::Binary(vec![0xDE, 0xAD, 0xBE, 0xEF]));
}

#[test]
fn offset_binary_array_round_trip() {
    round_trip_one(
        11,
        ItemType::OffsetBinaryArray,
        16,
        Value::OffsetBinary { offset: 0, data: vec![1, 2, 3] },
    );
}

#[test]
fn string_round_trip() {
    round_trip_one(12, ItemType::String, 16, Value::Text("hello".into()));
}

#[test]
fn raw_round_trip() {
    round_trip_one(13, ItemType::Raw, 16, Value::Raw(vec![9, 8, 7]));
}

#[test]
fn empty_value_save_then_load_returns_empty() {
    let item_id = 14;
    let routing = routing_with(&[(item_id, 714, false)]);
    let store = store_with(routing, true);
    let h = store.open().unwrap();

    let mut info = StructInfo::new(vec![member(item_id, ItemType::String, 16, true)]);
    assert!(store.save(h, &mut info, &[Value::Text(String::new())]).is_ok());

    let mut out = vec![Value::Text("stale".into())];
    assert!(store.load(h, &mut info, &mut out).is_ok());
    match &out[0] {
        Value::Text(s) => assert!(s.is_empty()),
        _ => panic!("wrong variant"),
    }
    assert!(param_store::ParamStore::is_data_empty(&out[0]));

    store.close(h);
}
