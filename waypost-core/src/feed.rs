//! Live discovery feed contract.
//!
//! The wire protocol behind the feed is out of scope; adapters decode it and
//! surface the stream below. Connectivity transitions are reported as
//! explicit events, distinct from data, so the toggling publisher can react
//! without inspecting payloads.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::FeedError;
use crate::types::ClusterKey;

/// One event from the live discovery backend.
#[derive(Debug, Clone)]
pub enum FeedEvent<T> {
    /// Full snapshot for a key.
    Put {
        /// Cluster the snapshot belongs to.
        key: ClusterKey,
        /// The snapshot payload.
        value: Arc<T>,
    },
    /// The backend no longer knows the key.
    Remove {
        /// Cluster being withdrawn.
        key: ClusterKey,
    },
    /// Backend connectivity was lost; data events will stop until restored.
    ConnectionLost,
    /// Backend connectivity returned; a full snapshot replay follows.
    ConnectionRestored,
}

/// Subscription surface of the live discovery backend.
#[async_trait]
pub trait DiscoveryFeed<T>: Send + Sync {
    /// Open the event stream for this feed's namespace.
    async fn subscribe(&self) -> Result<mpsc::Receiver<FeedEvent<T>>, FeedError>;
}
