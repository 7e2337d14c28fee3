//! Client-side service-discovery and load-balancer state layer.
//!
//! Keeps an in-process view of which network endpoints serve which logical
//! service, kept current by a push feed from a discovery backend with a
//! durable snapshot store as the cold-start/failover source. The moving
//! parts, upstream to downstream:
//!
//! - [`toggle::TogglingPublisher`] arbitrates between the live feed and the
//!   snapshot store, exposing exactly one source to the bus.
//! - [`bus::EventBus`] serializes Put/Remove delivery per cluster key.
//! - [`reconcile::EndpointReconciler`] diffs each snapshot against current
//!   handle state and applies the minimal add/remove set.
//! - [`state::BalancerState`] is the shared registry the routing layer reads.
//!
//! Endpoint handles are expensive stateful objects carrying health history;
//! the reconciler preserves them across updates whenever their observable
//! record is unchanged.

#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo
)]

pub mod bus;
pub mod config;
pub mod error;
pub mod feed;
pub mod handle;
pub mod log_throttle;
pub mod metrics;
pub mod properties;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod toggle;
pub mod types;

pub use bus::{EventBus, PropertySubscriber, SourceRegistration};
pub use config::BalancerConfig;
pub use error::{FeedError, StoreError};
pub use feed::{DiscoveryFeed, FeedEvent};
pub use handle::{
    EndpointHandle, EndpointHealth, HandleFactory, HealthStats, default_handle_factory,
};
pub use properties::{EndpointRecord, EndpointSetSnapshot, Versioned};
pub use reconcile::EndpointReconciler;
pub use state::{BalancerState, HandleMap, StateListener};
pub use store::{MemorySnapshotStore, SnapshotStore};
pub use toggle::{ToggleState, TogglingPublisher};
pub use types::{ClusterKey, EndpointAddr, KeyError, ServiceKey};
