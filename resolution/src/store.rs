//! Versioned keyed storage with compare-and-swap.
//!
//! Every record carries a version that increments on each write. Writers read
//! a record, derive the new value, and swap it in only if the version is
//! unchanged; a lost race surfaces as [`StoreError::Conflict`] and is retried
//! by [`modify`].

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// Error types for keyed stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Version check failed
    #[error("Version conflict on {key}: expected {expected:?}, found {found:?}")]
    Conflict {
        key: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// Backing storage failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// A stored value with its version.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<V> {
    pub version: u64,
    pub value: V,
}

/// Keyed record storage.
#[async_trait]
pub trait KeyedStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Fetch a record and its current version.
    async fn get(&self, key: &str) -> Result<Option<Versioned<V>>, StoreError>;

    /// Write unconditionally, returning the new version.
    async fn put(&self, key: &str, value: V) -> Result<u64, StoreError>;

    /// All stored values, in no particular order.
    async fn list(&self) -> Result<Vec<V>, StoreError>;

    /// Write only if the current version equals `expected`.
    ///
    /// `None` means the key must not exist yet.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        value: V,
    ) -> Result<u64, StoreError>;
}

/// In-process store over a sharded concurrent map.
pub struct MemoryStore<V> {
    entries: DashMap<String, Versioned<V>>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> KeyedStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<Versioned<V>>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: V) -> Result<u64, StoreError> {
        let version = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let version = occupied.get().version + 1;
                occupied.insert(Versioned { version, value });
                version
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Versioned { version: 1, value });
                1
            }
        };
        Ok(version)
    }

    async fn list(&self) -> Result<Vec<V>, StoreError> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.value().value.clone())
            .collect())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        value: V,
    ) -> Result<u64, StoreError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let found = occupied.get().version;
                if expected != Some(found) {
                    return Err(StoreError::Conflict {
                        key: key.to_string(),
                        expected,
                        found: Some(found),
                    });
                }
                let version = found + 1;
                occupied.insert(Versioned { version, value });
                Ok(version)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Err(StoreError::Conflict {
                        key: key.to_string(),
                        expected,
                        found: None,
                    });
                }
                vacant.insert(Versioned { version: 1, value });
                Ok(1)
            }
        }
    }
}

/// Read-modify-write a record, retrying on version conflicts.
///
/// Returns `Ok(None)` when the key does not exist. `apply` may be called
/// more than once and must not have side effects.
pub async fn modify<V, E, F>(
    store: &dyn KeyedStore<V>,
    key: &str,
    max_attempts: u32,
    mut apply: F,
) -> Result<Option<V>, E>
where
    V: Clone + Send + Sync + 'static,
    E: From<StoreError>,
    F: FnMut(V) -> Result<V, E> + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Some(current) = store.get(key).await? else {
            return Ok(None);
        };

        let updated = apply(current.value)?;
        match store
            .compare_and_swap(key, Some(current.version), updated.clone())
            .await
        {
            Ok(_) => return Ok(Some(updated)),
            Err(StoreError::Conflict { .. }) if attempt < max_attempts => {
                debug!(key, attempt, "Store conflict, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::new();
        assert_eq!(store.compare_and_swap("a", None, 1u32).await.unwrap(), 1);

        let err = store.compare_and_swap("a", None, 2).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                key: "a".into(),
                expected: None,
                found: Some(1)
            }
        );

        assert_eq!(store.compare_and_swap("a", Some(1), 2).await.unwrap(), 2);
        assert!(store.compare_and_swap("a", Some(1), 3).await.is_err());
        assert!(store.compare_and_swap("b", Some(1), 3).await.is_err());

        let current = store.get("a").await.unwrap().unwrap();
        assert_eq!(current, Versioned { version: 2, value: 2 });
    }

    #[tokio::test]
    async fn test_put_and_list() {
        let store = MemoryStore::new();
        store.put("a", "x".to_string()).await.unwrap();
        assert_eq!(store.put("a", "y".to_string()).await.unwrap(), 2);
        store.put("b", "z".to_string()).await.unwrap();

        let mut values = store.list().await.unwrap();
        values.sort();
        assert_eq!(values, vec!["y", "z"]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_modify_concurrent_increments() {
        let store: Arc<MemoryStore<u64>> = Arc::new(MemoryStore::new());
        store.put("counter", 0).await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    modify::<u64, StoreError, _>(store.as_ref(), "counter", 1000, |n| Ok(n + 1))
                        .await
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        let current = store.get("counter").await.unwrap().unwrap();
        assert_eq!(current.value, 16);
    }

    #[tokio::test]
    async fn test_modify_missing_key() {
        let store: MemoryStore<u64> = MemoryStore::new();
        let result = modify::<u64, StoreError, _>(&store, "missing", 3, |n| Ok(n + 1))
            .await
            .unwrap();
        assert_eq!(result, None);
    }
}
