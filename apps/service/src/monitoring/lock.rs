use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

/// Per-monitor mutual exclusion for check runs.
///
/// Acquisition never waits: a monitor that is already held means the current
/// tick is skipped.
#[derive(Debug, Default)]
pub struct LockRegistry {
    held: Mutex<HashSet<i64>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<i64>> {
        // The set stays consistent even if a holder panicked mid-insert
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `true` if the lock was free and is now held by the caller
    pub fn try_acquire(&self, monitor_id: i64) -> bool {
        let acquired = self.held().insert(monitor_id);
        debug!(monitor = monitor_id, acquired, "Lock acquisition attempt");
        acquired
    }

    /// Release a monitor's lock. No-op if it is not held.
    pub fn release(&self, monitor_id: i64) {
        if self.held().remove(&monitor_id) {
            debug!(monitor = monitor_id, "Lock released");
        }
    }

    pub fn is_held(&self, monitor_id: i64) -> bool {
        self.held().contains(&monitor_id)
    }

    /// Acquire a lock that is released when the returned guard is dropped
    pub fn try_lock(self: &Arc<Self>, monitor_id: i64) -> Option<LockGuard> {
        self.try_acquire(monitor_id).then(|| LockGuard { registry: Arc::clone(self), monitor_id })
    }
}

/// Releases its monitor's lock on drop, including during unwinding
#[derive(Debug)]
pub struct LockGuard {
    registry: Arc<LockRegistry>,
    monitor_id: i64,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.registry.release(self.monitor_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_cycle() {
        let registry = LockRegistry::new();

        assert!(registry.try_acquire(1));
        assert!(!registry.try_acquire(1));
        assert!(registry.try_acquire(2));

        registry.release(1);
        assert!(registry.try_acquire(1));
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = LockRegistry::new();
        registry.release(7);
        assert!(registry.try_acquire(7));
        registry.release(7);
        registry.release(7);
        assert!(!registry.is_held(7));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let registry = Arc::new(LockRegistry::new());

        let guard = registry.try_lock(3).expect("lock should be free");
        assert!(registry.try_lock(3).is_none());
        drop(guard);

        assert!(!registry.is_held(3));
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let registry = Arc::new(LockRegistry::new());
        let cloned = Arc::clone(&registry);

        let result = std::thread::spawn(move || {
            let _guard = cloned.try_lock(4);
            panic!("check blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!registry.is_held(4));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_has_one_winner() {
        let registry = Arc::new(LockRegistry::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.try_acquire(42) })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("task should not panic") {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }
}
