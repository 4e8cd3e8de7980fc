//! Per-key async mutexes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// A set of async mutexes addressed by key.
///
/// Operations on the same key are serialized; different keys never block
/// each other. Guards are owned so they can be held across `.await` points
/// and moved into spawned tasks. A key's mutex is dropped from the map once
/// nobody holds or waits on it.
#[derive(Default)]
pub struct KeyedMutex {
    locks: Arc<LockMap>,
}

/// Exclusive access to one key of a [`KeyedMutex`].
pub struct KeyedGuard {
    key: String,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold their own clone, so a count of one means the map's is the last
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // The map shard lock is released before awaiting
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
