//! Per-case serialization of reconciliation runs.
//!
//! Two rebuilds of the same case must never interleave their delete and insert
//! phases. Cases are independent, so the registry hands out one mutex per case
//! id and never takes a global lock while a run is in progress.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};

pub type CaseGuard = ArcMutexGuard<RawMutex, ()>;

#[derive(Default)]
pub struct CaseLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the case is free and hold it until the guard drops.
    pub fn acquire(&self, caso_id: &str) -> CaseGuard {
        let mutex = self
            .locks
            .entry(caso_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // The DashMap shard lock is released before blocking on the case.
        mutex.lock_arc()
    }

    /// Like [`acquire`](Self::acquire) but returns `None` if a run is active.
    pub fn try_acquire(&self, caso_id: &str) -> Option<CaseGuard> {
        let mutex = self
            .locks
            .entry(caso_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.try_lock_arc()
    }

    /// Drop entries nobody holds. Safe to call at any time.
    pub fn prune(&self) {
        self.locks.retain(|_, m| Arc::strong_count(m) > 1 || m.is_locked());
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Process-wide registry shared by every entry point.
pub fn case_locks() -> &'static CaseLocks {
    static LOCKS: OnceLock<CaseLocks> = OnceLock::new();
    LOCKS.get_or_init(CaseLocks::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_case_is_exclusive() {
        let locks = CaseLocks::new();
        let guard = locks.acquire("caso-1");
        assert!(locks.try_acquire("caso-1").is_none());
        drop(guard);
        assert!(locks.try_acquire("caso-1").is_some());
    }

    #[test]
    fn test_different_cases_do_not_block() {
        let locks = CaseLocks::new();
        let _a = locks.acquire("caso-a");
        assert!(locks.try_acquire("caso-b").is_some());
    }

    #[test]
    fn test_runs_on_one_case_never_overlap() {
        let locks = Arc::new(CaseLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let active = active.clone();
                let overlaps = overlaps.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        let _guard = locks.acquire("caso-1");
                        if active.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(1));
                        active.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker");
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_prune_keeps_held_entries() {
        let locks = CaseLocks::new();
        let held = locks.acquire("held");
        drop(locks.acquire("idle"));
        locks.prune();
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
