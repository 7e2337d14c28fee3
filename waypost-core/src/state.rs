//! Shared balancer state: cluster snapshots, service topology, endpoint
//! handles, and registered listeners.
//!
//! Reads happen concurrently on the request hot path; writes for a given
//! cluster are serialized by the event bus, so the concurrent maps here need
//! no additional locking. Handle replacement is an atomic swap of the map
//! entry: readers may race a replacement but never observe a half-built
//! handle.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::warn;

use crate::handle::{EndpointHandle, HandleFactory, default_handle_factory};
use crate::metrics;
use crate::properties::{EndpointRecord, EndpointSetSnapshot, Versioned};
use crate::types::{ClusterKey, EndpointAddr, ServiceKey};

/// Capability set notified when endpoint handles come and go.
///
/// Called synchronously from the reconciliation lane; implementations must
/// not block.
pub trait StateListener: Send + Sync {
    /// A handle was created or rebuilt for `service`.
    fn on_handle_added(&self, service: &ServiceKey, handle: &Arc<EndpointHandle>);

    /// A handle was removed for `service`.
    fn on_handle_removed(&self, service: &ServiceKey, handle: &Arc<EndpointHandle>);
}

/// Concurrent address→handle map for one service.
pub type HandleMap = DashMap<EndpointAddr, Arc<EndpointHandle>>;

/// The shared mutable registry consumed by the reconciler and, read-only, by
/// the routing layer.
pub struct BalancerState {
    cluster_snapshots: DashMap<ClusterKey, Versioned<EndpointSetSnapshot>>,
    services_by_cluster: DashMap<ClusterKey, HashSet<ServiceKey>>,
    handles: DashMap<ServiceKey, Arc<HandleMap>>,
    listeners: RwLock<Vec<Arc<dyn StateListener>>>,
    version: AtomicU64,
    factory: Arc<HandleFactory>,
}

impl BalancerState {
    /// Create state with an injected handle factory.
    #[must_use]
    pub fn new(factory: Arc<HandleFactory>) -> Self {
        Self {
            cluster_snapshots: DashMap::new(),
            services_by_cluster: DashMap::new(),
            handles: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            version: AtomicU64::new(0),
            factory,
        }
    }

    /// Create state with the default weight-validating factory.
    #[must_use]
    pub fn with_default_factory() -> Self {
        Self::new(default_handle_factory())
    }

    /// Append a listener. The listener set is append-only; registration is
    /// expected to happen at startup, before traffic.
    pub fn register_listener(&self, listener: Arc<dyn StateListener>) {
        self.listeners.write().push(listener);
    }

    /// Most recently accepted snapshot for a cluster.
    #[must_use]
    pub fn cluster_snapshot(
        &self,
        cluster: &ClusterKey,
    ) -> Option<Versioned<EndpointSetSnapshot>> {
        self.cluster_snapshots
            .get(cluster)
            .map(|entry| entry.value().clone())
    }

    /// Services currently mapped to a cluster.
    #[must_use]
    pub fn services_for_cluster(&self, cluster: &ClusterKey) -> HashSet<ServiceKey> {
        self.services_by_cluster
            .get(cluster)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// One handle by service and address.
    #[must_use]
    pub fn handle(&self, service: &ServiceKey, address: &EndpointAddr) -> Option<Arc<EndpointHandle>> {
        self.handles
            .get(service)
            .and_then(|map| map.get(address).map(|entry| Arc::clone(entry.value())))
    }

    /// Shared handle map for a service, for lock-free reads on the request
    /// path. `None` until the service has been reconciled at least once.
    #[must_use]
    pub fn handle_map_for(&self, service: &ServiceKey) -> Option<Arc<HandleMap>> {
        self.handles.get(service).map(|entry| Arc::clone(entry.value()))
    }

    /// All current handles for a service.
    #[must_use]
    pub fn handles_for(&self, service: &ServiceKey) -> Vec<Arc<EndpointHandle>> {
        self.handle_map_for(service)
            .map(|map| map.iter().map(|entry| Arc::clone(entry.value())).collect())
            .unwrap_or_default()
    }

    /// Services with a handle map, in sorted order.
    #[must_use]
    pub fn service_names(&self) -> Vec<ServiceKey> {
        let mut names: Vec<_> = self.handles.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Current value of the global version counter.
    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn map_service(&self, cluster: &ClusterKey, service: &ServiceKey) -> bool {
        self.services_by_cluster
            .entry(cluster.clone())
            .or_default()
            .insert(service.clone())
    }

    pub(crate) fn handle_map(&self, service: &ServiceKey) -> Arc<HandleMap> {
        Arc::clone(
            self.handles
                .entry(service.clone())
                .or_insert_with(|| Arc::new(DashMap::new()))
                .value(),
        )
    }

    pub(crate) fn build_handle(
        &self,
        service: &ServiceKey,
        record: &EndpointRecord,
    ) -> Option<Arc<EndpointHandle>> {
        match (self.factory)(service, record) {
            Some(handle) => {
                metrics::increment_counter(metrics::HANDLES_BUILT_TOTAL, 1);
                Some(handle)
            }
            None => {
                metrics::increment_counter(metrics::HANDLE_BUILD_FAILURES_TOTAL, 1);
                warn!(
                    service = %service,
                    address = %record.address(),
                    "handle factory rejected endpoint record; address excluded until next update"
                );
                None
            }
        }
    }

    /// Store the snapshot as the cluster's current state, assigning the next
    /// global version. Called by the reconciler strictly after all listener
    /// notifications for the update have fired.
    pub(crate) fn commit_snapshot(
        &self,
        cluster: &ClusterKey,
        snapshot: Arc<EndpointSetSnapshot>,
    ) -> u64 {
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        self.cluster_snapshots
            .insert(cluster.clone(), Versioned::new(snapshot, version));
        version
    }

    pub(crate) fn take_snapshot(
        &self,
        cluster: &ClusterKey,
    ) -> Option<Versioned<EndpointSetSnapshot>> {
        self.cluster_snapshots
            .remove(cluster)
            .map(|(_, versioned)| versioned)
    }

    pub(crate) fn notify_handle_added(&self, service: &ServiceKey, handle: &Arc<EndpointHandle>) {
        for listener in self.listeners.read().iter() {
            listener.on_handle_added(service, handle);
        }
    }

    pub(crate) fn notify_handle_removed(&self, service: &ServiceKey, handle: &Arc<EndpointHandle>) {
        for listener in self.listeners.read().iter() {
            listener.on_handle_removed(service, handle);
        }
    }
}

impl fmt::Debug for BalancerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BalancerState")
            .field("clusters", &self.cluster_snapshots.len())
            .field("services", &self.handles.len())
            .field("version", &self.current_version())
            .finish_non_exhaustive()
    }
}
