//! S4: factory reset visits only the items marked `factory_reset_required`
//! and invokes every registered callback exactly once.

mod common;

use common::*;
use param_store::item::{ItemType, StructInfo, Value};
use param_store::resource::INVALID_HANDLE;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn invoke_factory_reset_clears_marked_items_and_runs_callbacks_once() {
    let routing = routing_with(&[(ITEM_I1, 401, true), (ITEM_I2, 402, false)]);
    let store = store_with(routing, true);
    let h = store.open().unwrap();

    let mut info = StructInfo::new(vec![
        member(ITEM_I1, ItemType::BinaryArray, 16, true),
        member(ITEM_I2, ItemType::BinaryArray, 16, true),
    ]);
    let values = vec![Value::Binary(vec![1, 2, 3]), Value::Binary(vec![4, 5, 6])];
    assert!(store.save(h, &mut info, &values).is_ok());

    let call_count = Arc::new(AtomicUsize::new(0));
    let call_count2 = call_count.clone();
    let id = store
        .register_factory_reset(Box::new(move || {
            call_count2.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    assert!(store.invoke_factory_reset().is_ok());

    assert_eq!(store.get_size(INVALID_HANDLE, ITEM_I1).unwrap(), 0);
    assert_eq!(store.get_size(INVALID_HANDLE, ITEM_I2).unwrap(), 3);
    assert_eq!(call_count.load(Ordering::SeqCst), 1);

    store.unregister_factory_reset(id);
    store.close(h);
}
