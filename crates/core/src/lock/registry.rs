//! In-process serialization of operations on the same document.
//!
//! One mutex per normalized document key, created on first use and owned by
//! the registry. Entries are never evicted, so memory grows with the number
//! of distinct keys ever touched by this process.
//!
//! Waiters are served in whatever order `std::sync::Mutex` wakes them; FIFO
//! order is not guaranteed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{trace, warn};

/// Arena of per-key mutexes.
#[derive(Debug, Default)]
pub struct PathLockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PathLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the mutex for `key`.
    ///
    /// The mutex is released when `f` returns or unwinds.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let handle = self.handle(key);
        let _guard = lock_recovering(&handle);
        trace!(key, "path mutex acquired");
        f()
    }

    /// Number of keys that have a mutex allocated.
    pub fn len(&self) -> usize {
        lock_recovering(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handle(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = lock_recovering(&self.locks);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

/// The path mutexes guard no data, so a poisoned one is still usable.
fn lock_recovering<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| {
        warn!("path lock mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_entries_created_lazily_and_kept() {
        let registry = PathLockRegistry::new();
        assert!(registry.is_empty());
        registry.with_lock("a", || ());
        registry.with_lock("b", || ());
        registry.with_lock("a", || ());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_same_key_is_serialized() {
        let registry = Arc::new(PathLockRegistry::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    registry.with_lock("doc", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_poisoned_mutex_recovers() {
        let registry = Arc::new(PathLockRegistry::new());
        let r = Arc::clone(&registry);
        let _ = thread::spawn(move || r.with_lock("doc", || panic!("boom"))).join();
        assert_eq!(registry.with_lock("doc", || 7), 7);
    }
}
