//! Snapshot store contract and the in-memory implementation.
//!
//! The durable file-backed implementation lives in `waypost-storage`; the
//! on-disk format is entirely the store's concern and never leaks into the
//! reconciliation layer.

use std::fmt;

use dashmap::DashMap;

use crate::error::StoreError;
use crate::types::ClusterKey;

/// Key→snapshot persistence used as the cold-start/fallback source and as a
/// write-through backup of the live feed.
pub trait SnapshotStore<T>: Send + Sync {
    /// Read the snapshot stored for a key, if any.
    fn get(&self, key: &ClusterKey) -> Result<Option<T>, StoreError>;

    /// Persist a snapshot, replacing any prior value for the key.
    fn put(&self, key: &ClusterKey, value: &T) -> Result<(), StoreError>;

    /// Delete the snapshot for a key; absent keys are not an error.
    fn remove(&self, key: &ClusterKey) -> Result<(), StoreError>;

    /// Enumerate every key with a stored snapshot (bulk fallback load).
    fn list_keys(&self) -> Result<Vec<ClusterKey>, StoreError>;
}

/// Process-local snapshot store backed by a concurrent map.
///
/// Used in tests and by embedders that want toggling without durability.
pub struct MemorySnapshotStore<T> {
    entries: DashMap<ClusterKey, T>,
}

impl<T> MemorySnapshotStore<T> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no snapshots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for MemorySnapshotStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for MemorySnapshotStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySnapshotStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<T> SnapshotStore<T> for MemorySnapshotStore<T>
where
    T: Clone + Send + Sync,
{
    fn get(&self, key: &ClusterKey) -> Result<Option<T>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, key: &ClusterKey, value: &T) -> Result<(), StoreError> {
        self.entries.insert(key.clone(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &ClusterKey) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<ClusterKey>, StoreError> {
        let mut keys: Vec<_> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}
