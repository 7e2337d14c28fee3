//! Error types surfaced by the discovery state layer.
//!
//! Nothing here is fatal to the process: every failure mode degrades to a
//! stale or reduced endpoint set for one cluster.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ClusterKey, KeyError};

/// Errors raised by snapshot stores (durable or in-memory).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("snapshot store I/O failed at '{path}'")]
    Io {
        /// Path involved in the failing operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be encoded for persistence.
    #[error("failed to serialize snapshot for cluster '{key}'")]
    Serialize {
        /// Cluster whose snapshot failed to encode.
        key: ClusterKey,
        /// Underlying encoder error.
        #[source]
        source: serde_json::Error,
    },

    /// Persisted snapshot could not be decoded; treated upstream as "no
    /// data", never as a removal.
    #[error("failed to deserialize snapshot for cluster '{key}'")]
    Deserialize {
        /// Cluster whose snapshot failed to decode.
        key: ClusterKey,
        /// Underlying decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// Key failed validation before reaching the store.
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
}

/// Errors raised while subscribing to the live discovery feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Feed transport could not be established.
    #[error("discovery feed connection failed: {0}")]
    Connection(String),

    /// Feed was already consumed or has shut down.
    #[error("discovery feed is closed")]
    Closed,
}
