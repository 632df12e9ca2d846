//! Reentrant, thread-owned locks and the exclusive-control orchestrator.
//!
//! Two logical locks exist in the system: the *resource* lock (handle
//! table, registration tables, update lists) and the *storage* lock
//! (backend access). Both are instances of the same primitive here,
//! [`ReentrantLock`], which intentionally does not delegate to the
//! platform's native recursive mutex — the broadcast-on-decrement and
//! owner-transfer rules below must hold exactly, and those details vary
//! across native implementations.

use crate::error::Status;
use std::sync::{Condvar, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

const MAX_COUNT: i8 = i8::MAX;

struct State {
    count: i8,
    owner: Option<ThreadId>,
}

/// A mutex that the owning thread may re-acquire without deadlocking.
///
/// Modeled as an explicit `{count, owner}` pair gated by a single
/// `Mutex` + `Condvar`, per the design notes: acquisition holds the
/// underlying mutex, waits on the condvar while the predicate
/// (`count == 0 || owner == self`) is false, then bumps the count and
/// records the caller. Release decrements under the mutex and broadcasts
/// when it reaches zero, so any reentrant waiter (on either lock) can
/// make progress.
pub struct ReentrantLock {
    state: Mutex<State>,
    cv: Condvar,
    name: &'static str,
}

impl ReentrantLock {
    pub fn new(name: &'static str) -> Self {
        Self {
            state: Mutex::new(State {
                count: 0,
                owner: None,
            }),
            cv: Condvar::new(),
            name,
        }
    }

    /// Acquire with a bounded timeout. Returns `Status::TimedOut` if the
    /// predicate never becomes true before `timeout` elapses, and
    /// `Status::Internal` if the count would overflow `i8::MAX` or if
    /// lock bookkeeping is otherwise violated.
    pub fn lock_timed(&self, timeout: Duration) -> Result<Guard<'_>, Status> {
        let me = std::thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().map_err(|_| Status::Internal)?;

        while !(guard.count == 0 || guard.owner == Some(me)) {
            let now = Instant::now();
            if now >= deadline {
                log::warn!("lock `{}` timed out acquiring for {:?}", self.name, me);
                return Err(Status::TimedOut);
            }
            let (g, timeout_result) = self
                .cv
                .wait_timeout(guard, deadline - now)
                .map_err(|_| Status::Internal)?;
            guard = g;
            if timeout_result.timed_out() && !(guard.count == 0 || guard.owner == Some(me)) {
                log::warn!("lock `{}` timed out acquiring for {:?}", self.name, me);
                return Err(Status::TimedOut);
            }
        }

        if guard.count == MAX_COUNT {
            log::error!("lock `{}` recursion count saturated", self.name);
            return Err(Status::Internal);
        }
        guard.count += 1;
        guard.owner = Some(me);
        Ok(Guard { lock: self })
    }

    /// Acquire with no timeout. Used for post-state cleanup (e.g.
    /// `resource_exit`) that must not fail merely because of contention.
    pub fn lock_infinite(&self) -> Result<Guard<'_>, Status> {
        let me = std::thread::current().id();
        let mut guard = self.state.lock().map_err(|_| Status::Internal)?;
        while !(guard.count == 0 || guard.owner == Some(me)) {
            guard = self.cv.wait(guard).map_err(|_| Status::Internal)?;
        }
        if guard.count == MAX_COUNT {
            log::error!("lock `{}` recursion count saturated", self.name);
            return Err(Status::Internal);
        }
        guard.count += 1;
        guard.owner = Some(me);
        Ok(Guard { lock: self })
    }

    fn unlock(&self) -> Result<(), Status> {
        let me = std::thread::current().id();
        let mut guard = self.state.lock().map_err(|_| Status::Internal)?;
        if guard.owner != Some(me) {
            log::error!("lock `{}` unlocked from non-owning thread", self.name);
            return Err(Status::Internal);
        }
        guard.count -= 1;
        if guard.count == 0 {
            guard.owner = None;
            self.cv.notify_all();
        }
        Ok(())
    }
}

/// RAII guard for a [`ReentrantLock`] acquisition. Dropping it releases
/// one level of recursion; unlock errors are logged rather than panicking
/// since `Drop` cannot return a `Result`.
pub struct Guard<'a> {
    lock: &'a ReentrantLock,
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        if let Err(status) = self.lock.unlock() {
            log::error!("lock `{}` release failed: {status}", self.lock.name);
        }
    }
}

/// The three legal shapes of an exclusive-control request, per the design:
/// only `resource_entry` alone, `storage_func` alone, or all three of
/// `resource_entry` + `storage_func` + `resource_exit` together.
pub enum ExclusiveOp<'a> {
    ResourceOnly(&'a mut dyn FnMut() -> Result<(), Status>),
    StorageOnly(&'a mut dyn FnMut() -> Result<(), Status>),
    Full {
        resource_entry: &'a mut dyn FnMut() -> Result<(), Status>,
        storage_func: &'a mut dyn FnMut() -> Result<(), Status>,
        resource_exit: &'a mut dyn FnMut() -> Result<(), Status>,
    },
}

/// Orchestrates lock acquisition order across the resource and storage
/// locks for a single logical call: resource-entry, then storage, then
/// resource-exit (always, with an infinite wait, so cleanup cannot itself
/// fail from contention). The first non-`Ok` status wins, except that
/// `resource_exit`'s failure only supersedes an earlier `storage_func`
/// failure if that earlier result was `Ok`.
pub struct Exclusion {
    pub resource: ReentrantLock,
    pub storage: ReentrantLock,
    pub timeout: Duration,
}

impl Exclusion {
    pub fn new(timeout: Duration) -> Self {
        Self {
            resource: ReentrantLock::new("resource"),
            storage: ReentrantLock::new("storage"),
            timeout,
        }
    }

    pub fn run(&self, op: ExclusiveOp<'_>) -> Status {
        match op {
            ExclusiveOp::ResourceOnly(entry) => {
                let _guard = match self.resource.lock_timed(self.timeout) {
                    Ok(g) => g,
                    Err(e) => return e,
                };
                entry().err().unwrap_or(Status::Ok)
            }
            ExclusiveOp::StorageOnly(func) => {
                let _guard = match self.storage.lock_timed(self.timeout) {
                    Ok(g) => g,
                    Err(e) => return e,
                };
                func().err().unwrap_or(Status::Ok)
            }
            ExclusiveOp::Full {
                resource_entry,
                storage_func,
                resource_exit,
            } => {
                let mut result = {
                    let guard = self.resource.lock_timed(self.timeout);
                    match guard {
                        Ok(_g) => resource_entry().err().unwrap_or(Status::Ok),
                        Err(e) => e,
                    }
                };

                if result.is_ok() {
                    let guard = self.storage.lock_timed(self.timeout);
                    result = match guard {
                        Ok(_g) => storage_func().err().unwrap_or(Status::Ok),
                        Err(e) => e,
                    };
                }

                // resource_exit always runs, with an infinite wait.
                let exit_guard = self.resource.lock_infinite();
                let exit_result = match exit_guard {
                    Ok(_g) => resource_exit().err().unwrap_or(Status::Ok),
                    Err(e) => e,
                };

                if result.is_ok() {
                    exit_result
                } else {
                    result
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn reentrant_same_thread_succeeds() {
        let lock = ReentrantLock::new("t");
        let g1 = lock.lock_timed(Duration::from_millis(100)).unwrap();
        let g2 = lock.lock_timed(Duration::from_millis(100)).unwrap();
        drop(g2);
        drop(g1);
    }

    #[test]
    fn other_thread_times_out_while_held() {
        let lock = Arc::new(ReentrantLock::new("t"));
        let _g = lock.lock_timed(Duration::from_millis(100)).unwrap();
        let lock2 = Arc::clone(&lock);
        let result = std::thread::spawn(move || lock2.lock_timed(Duration::from_millis(50)))
            .join()
            .unwrap();
        assert_eq!(result.unwrap_err(), Status::TimedOut);
    }

    #[test]
    fn unlock_from_wrong_thread_is_internal_error() {
        let lock = ReentrantLock::new("t");
        let guard = lock.lock_timed(Duration::from_millis(100)).unwrap();
        // Leak the guard so Drop doesn't run on this thread, then try to
        // unlock logic from another thread by constructing a second guard
        // manually is not possible (private field) -- instead exercise the
        // owner-mismatch path indirectly via the public unlock() error
        // surfaced through a forced double-release scenario.
        std::mem::forget(guard);
        // Directly call the private unlock to simulate cross-thread misuse.
        let result = std::thread::spawn(move || lock.unlock()).join().unwrap();
        assert_eq!(result.unwrap_err(), Status::Internal);
    }

    #[test]
    fn exclusion_runs_resource_exit_even_on_storage_failure() {
        let ex = Exclusion::new(Duration::from_millis(200));
        let exit_ran = std::cell::Cell::new(false);
        let mut entry = || Ok(());
        let mut storage = || Err(Status::DataLoss);
        let mut exit = || {
            exit_ran.set(true);
            Ok(())
        };
        let status = ex.run(ExclusiveOp::Full {
            resource_entry: &mut entry,
            storage_func: &mut storage,
            resource_exit: &mut exit,
        });
        assert_eq!(status, Status::DataLoss);
        assert!(exit_ran.get());
    }

    #[test]
    fn exclusion_exit_failure_only_supersedes_ok() {
        let ex = Exclusion::new(Duration::from_millis(200));
        let mut entry = || Ok(());
        let mut storage = || Err(Status::PermissionDenied);
        let mut exit = || Err(Status::Internal);
        let status = ex.run(ExclusiveOp::Full {
            resource_entry: &mut entry,
            storage_func: &mut storage,
            resource_exit: &mut exit,
        });
        // storage_func's PermissionDenied must not be overwritten by the
        // later exit failure.
        assert_eq!(status, Status::PermissionDenied);

        let mut entry2 = || Ok(());
        let mut storage2 = || Ok(());
        let mut exit2 = || Err(Status::Internal);
        let status2 = ex.run(ExclusiveOp::Full {
            resource_entry: &mut entry2,
            storage_func: &mut storage2,
            resource_exit: &mut exit2,
        });
        assert_eq!(status2, Status::Internal);
    }
}
