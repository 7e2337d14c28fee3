//! Durable file-backed snapshot store.
//!
//! One JSON document per cluster key under a root directory, written through
//! on every accepted live update and read back as the fallback source on
//! cold start or live-feed failure. Writes go through a temp file in the
//! same directory followed by an atomic rename, so readers never observe a
//! torn snapshot.

#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo
)]

use std::fmt;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use waypost_core::types::ClusterKey;
use waypost_core::{SnapshotStore, StoreError};

const SNAPSHOT_EXTENSION: &str = "json";

/// Snapshot store persisting one file per cluster key.
pub struct FileSnapshotStore<T> {
    root: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FileSnapshotStore<T> {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            _marker: PhantomData,
        })
    }

    /// Directory holding the snapshot files.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &ClusterKey) -> PathBuf {
        self.root
            .join(format!("{}.{SNAPSHOT_EXTENSION}", key.as_str()))
    }
}

impl<T> fmt::Debug for FileSnapshotStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSnapshotStore")
            .field("root", &self.root)
            .finish()
    }
}

impl<T> SnapshotStore<T> for FileSnapshotStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn get(&self, key: &ClusterKey) -> Result<Option<T>, StoreError> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let value = serde_json::from_slice(&bytes).map_err(|source| StoreError::Deserialize {
            key: key.clone(),
            source,
        })?;
        Ok(Some(value))
    }

    fn put(&self, key: &ClusterKey, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Serialize {
            key: key.clone(),
            source,
        })?;
        let path = self.path_for(key);
        let mut temp =
            tempfile::NamedTempFile::new_in(&self.root).map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
        temp.write_all(&bytes).map_err(|source| StoreError::Io {
            path: temp.path().to_path_buf(),
            source,
        })?;
        temp.persist(&path).map_err(|err| StoreError::Io {
            path,
            source: err.error,
        })?;
        Ok(())
    }

    fn remove(&self, key: &ClusterKey) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn list_keys(&self) -> Result<Vec<ClusterKey>, StoreError> {
        let entries = std::fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                warn!(path = ?path, "skipping snapshot file with non-UTF-8 name");
                continue;
            };
            match ClusterKey::try_from(stem) {
                Ok(key) => keys.push(key),
                Err(err) => {
                    warn!(path = ?path, error = %err, "skipping snapshot file with invalid key");
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use serde_json::json;
    use waypost_core::types::EndpointAddr;
    use waypost_core::{EndpointRecord, EndpointSetSnapshot};

    fn key(raw: &str) -> ClusterKey {
        ClusterKey::try_from(raw).unwrap()
    }

    fn sample_snapshot(cluster: &str) -> EndpointSetSnapshot {
        EndpointSetSnapshot::from_records(
            key(cluster),
            [
                EndpointRecord::new(EndpointAddr::try_from("10.0.0.1:80").unwrap())
                    .with_partition_weight(0, 1.0)
                    .with_metadata("zone", json!("z1")),
                EndpointRecord::new(EndpointAddr::try_from("10.0.0.2:80").unwrap())
                    .with_partition_weight(0, 2.0),
            ],
        )
    }

    #[test]
    fn round_trips_snapshots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSnapshotStore::new(dir.path()).expect("store");
        let snapshot = sample_snapshot("search");

        store.put(&key("search"), &snapshot).expect("put");
        let loaded = store.get(&key("search")).expect("get").expect("present");
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn absent_key_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: FileSnapshotStore<EndpointSetSnapshot> =
            FileSnapshotStore::new(dir.path()).expect("store");
        assert!(store.get(&key("missing")).expect("get").is_none());
    }

    #[test]
    fn put_replaces_previous_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSnapshotStore::new(dir.path()).expect("store");

        store.put(&key("search"), &sample_snapshot("search")).expect("put");
        let replacement = EndpointSetSnapshot::from_records(
            key("search"),
            [EndpointRecord::new(EndpointAddr::try_from("10.0.0.9:80").unwrap())
                .with_partition_weight(0, 1.0)],
        );
        store.put(&key("search"), &replacement).expect("replace");

        let loaded = store.get(&key("search")).expect("get").expect("present");
        assert_eq!(loaded, replacement);
    }

    #[test]
    fn remove_tolerates_missing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: FileSnapshotStore<EndpointSetSnapshot> =
            FileSnapshotStore::new(dir.path()).expect("store");
        store.remove(&key("missing")).expect("remove");
    }

    #[test]
    fn list_keys_skips_foreign_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSnapshotStore::new(dir.path()).expect("store");

        store.put(&key("alpha"), &sample_snapshot("alpha")).expect("put");
        store.put(&key("beta"), &sample_snapshot("beta")).expect("put");
        std::fs::write(dir.path().join("notes.txt"), b"not a snapshot").expect("write");
        std::fs::write(dir.path().join("bad key!.json"), b"{}").expect("write");

        let keys = store.list_keys().expect("list");
        assert_eq!(keys, vec![key("alpha"), key("beta")]);
    }

    #[test]
    fn malformed_file_surfaces_deserialize_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: FileSnapshotStore<EndpointSetSnapshot> =
            FileSnapshotStore::new(dir.path()).expect("store");
        std::fs::write(dir.path().join("search.json"), b"{ truncated").expect("write");

        let err = store.get(&key("search")).expect_err("should fail");
        assert!(matches!(err, StoreError::Deserialize { .. }));
    }
}
