//! Invariants 10 (lock timeout) and 11 (same-thread reentrancy, with a
//! second thread still observing the lock as held).

mod common;

use common::*;
use param_store::error::Status;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn lock_held_by_another_thread_times_out() {
    let store = Arc::new(store_with_timeout(routing_with(&[]), true, Duration::from_millis(150)));
    let guard = store.lock().unwrap();

    let store2 = store.clone();
    let result = std::thread::spawn(move || store2.lock().map(|_g| ()))
        .join()
        .unwrap();
    assert_eq!(result.unwrap_err(), Status::TimedOut);

    drop(guard);
    assert!(store.lock().is_ok());
}

#[test]
fn same_thread_nested_lock_succeeds_while_blocking_others() {
    let store = Arc::new(store_with_timeout(routing_with(&[]), true, Duration::from_millis(150)));
    let g1 = store.lock().unwrap();
    let g2 = store.lock().unwrap();

    let store2 = store.clone();
    let blocked = std::thread::spawn(move || store2.lock().map(|_g| ()))
        .join()
        .unwrap();
    assert_eq!(blocked.unwrap_err(), Status::TimedOut);

    drop(g2);
    drop(g1);
    assert!(store.lock().is_ok());
}
