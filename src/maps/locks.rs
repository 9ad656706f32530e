use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Identifies one map submission.
pub type MapKey = (u64, String);

/// Per-(mission, owner) mutation locks.
///
/// Entries exist only while someone holds or waits on them, so the arena
/// stays proportional to in-flight work rather than to every key ever seen.
#[derive(Default)]
pub struct KeyLocks {
    locks: Arc<DashMap<MapKey, Arc<Mutex<()>>>>,
}

/// Held for the duration of one mutation. Dropping it releases the key.
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: MapKey,
    locks: Arc<DashMap<MapKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, mission_id: u64, owner: &str) -> KeyGuard {
        let key: MapKey = (mission_id, owner.to_string());
        let mutex = Arc::clone(
            self.locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let guard = mutex.lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            key,
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of keys currently locked or contended.
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release first so our own reference no longer counts.
        drop(self.guard.take());
        // Only the map's reference left means no holder and no waiter. Waiters
        // clone under the shard lock, which remove_if also takes.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
