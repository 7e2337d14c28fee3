//! Endpoint-set reconciliation: turns snapshot notifications into the
//! minimal set of handle add/remove operations against balancer state.
//!
//! Invoked only from the event bus's per-cluster lane, so all mutations for
//! one cluster happen on a single sequential stream and the diff needs no
//! internal locking. The central correctness property: an address whose
//! record (weights and metadata) is unchanged keeps its existing handle,
//! preserving the health history that handle has accumulated.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bus::{EventBus, PropertySubscriber};
use crate::config::BalancerConfig;
use crate::log_throttle::LogThrottle;
use crate::metrics;
use crate::properties::EndpointSetSnapshot;
use crate::state::{BalancerState, HandleMap};
use crate::types::{ClusterKey, EndpointAddr, ServiceKey};

/// Subscriber that reconciles endpoint-set snapshots into handle state.
pub struct EndpointReconciler {
    state: Arc<BalancerState>,
    bus: Arc<EventBus<EndpointSetSnapshot>>,
    /// Service registrations awaiting their first reconciliation pass,
    /// queued here and drained on the owning cluster's lane.
    pending_services: Mutex<Vec<(ClusterKey, ServiceKey)>>,
    absent_warn: LogThrottle,
    remove_warn: LogThrottle,
}

impl EndpointReconciler {
    /// Create the reconciler and subscribe it to the bus.
    pub fn register(
        state: Arc<BalancerState>,
        bus: Arc<EventBus<EndpointSetSnapshot>>,
        config: &BalancerConfig,
    ) -> Arc<Self> {
        let reconciler = Arc::new(Self {
            state,
            bus: Arc::clone(&bus),
            pending_services: Mutex::new(Vec::new()),
            absent_warn: LogThrottle::new(config.warn_interval),
            remove_warn: LogThrottle::new(config.warn_interval),
        });
        bus.subscribe(Arc::clone(&reconciler) as Arc<dyn PropertySubscriber<EndpointSetSnapshot>>);
        reconciler
    }

    /// Map a service onto a cluster (topology supplied by the external
    /// service-properties feed) and reconcile it against the cluster's
    /// current snapshot, if one is already known.
    ///
    /// The reconciliation itself runs on the cluster's dispatch lane via a
    /// replay, keeping the single-writer-per-key discipline even though the
    /// topology feed calls in from its own thread.
    pub fn register_service(&self, service: &ServiceKey, cluster: &ClusterKey) {
        if self.state.map_service(cluster, service) {
            debug!(service = %service, cluster = %cluster, "mapped service onto cluster");
        }
        self.pending_services
            .lock()
            .push((cluster.clone(), service.clone()));
        self.bus.replay(cluster);
    }

    /// Balancer state this reconciler writes to.
    #[must_use]
    pub fn state(&self) -> &Arc<BalancerState> {
        &self.state
    }

    fn drain_pending(&self, cluster: &ClusterKey) -> Vec<ServiceKey> {
        let mut pending = self.pending_services.lock();
        let mut drained = Vec::new();
        pending.retain(|(pending_cluster, service)| {
            if pending_cluster == cluster {
                drained.push(service.clone());
                false
            } else {
                true
            }
        });
        drained
    }

    fn apply_put(&self, cluster: &ClusterKey, value: Option<&Arc<EndpointSetSnapshot>>) {
        let Some(snapshot) = value else {
            metrics::increment_counter(metrics::ABSENT_SNAPSHOTS_TOTAL, 1);
            if self.absent_warn.allow() {
                warn!(
                    cluster = %cluster,
                    "received an absent endpoint-set snapshot; keeping current state"
                );
            }
            return;
        };

        if snapshot.cluster() != cluster {
            warn!(
                cluster = %cluster,
                snapshot_cluster = %snapshot.cluster(),
                "snapshot published under a mismatched cluster key; ignoring"
            );
            return;
        }

        let newly_registered = self.drain_pending(cluster);

        let current = self
            .state
            .cluster_snapshot(cluster)
            .map(|versioned| Arc::clone(versioned.value()));
        if let Some(current) = &current {
            if **current == **snapshot {
                metrics::increment_counter(metrics::SNAPSHOT_DUPLICATES_TOTAL, 1);
                debug!(cluster = %cluster, "duplicate endpoint-set snapshot absorbed");
                // Services registered since the snapshot was applied still
                // need their first pass against it.
                for service in newly_registered {
                    let map = self.state.handle_map(&service);
                    self.add_and_update(&service, snapshot, &map);
                }
                return;
            }
        }

        let services = self.state.services_for_cluster(cluster);
        if services.is_empty() {
            debug!(
                cluster = %cluster,
                endpoints = snapshot.len(),
                "no services mapped onto cluster yet; storing snapshot for later reconciliation"
            );
        }

        for service in &services {
            let map = self.state.handle_map(service);
            self.add_and_update(service, snapshot, &map);
            self.remove_stale(service, snapshot, &map);
        }

        // Commit strictly after notifications: listeners re-entering the
        // state during a callback observe the previous snapshot.
        let version = self.state.commit_snapshot(cluster, Arc::clone(snapshot));
        metrics::increment_counter(metrics::SNAPSHOT_UPDATES_TOTAL, 1);
        debug!(
            cluster = %cluster,
            version,
            endpoints = snapshot.len(),
            services = services.len(),
            "applied endpoint-set snapshot"
        );
    }

    /// Build or rebuild handles for every record in the snapshot. A handle
    /// is kept untouched when its source record equals the incoming record
    /// on the full observable surface (weights and metadata).
    fn add_and_update(
        &self,
        service: &ServiceKey,
        snapshot: &Arc<EndpointSetSnapshot>,
        map: &HandleMap,
    ) {
        for record in snapshot.records() {
            let address = record.address();
            let unchanged = map
                .get(address)
                .is_some_and(|existing| existing.record() == record);
            if unchanged {
                continue;
            }
            let Some(handle) = self.state.build_handle(service, record) else {
                continue;
            };
            debug!(
                service = %service,
                address = %address,
                "installing endpoint handle from updated snapshot"
            );
            map.insert(address.clone(), Arc::clone(&handle));
            self.state.notify_handle_added(service, &handle);
        }
    }

    /// Remove handles whose addresses are absent from the new snapshot.
    fn remove_stale(
        &self,
        service: &ServiceKey,
        snapshot: &Arc<EndpointSetSnapshot>,
        map: &HandleMap,
    ) {
        let stale: Vec<EndpointAddr> = map
            .iter()
            .filter(|entry| !snapshot.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for address in stale {
            if let Some((_, handle)) = map.remove(&address) {
                metrics::increment_counter(metrics::HANDLES_REMOVED_TOTAL, 1);
                debug!(
                    service = %service,
                    address = %address,
                    "removing endpoint handle absent from new snapshot"
                );
                self.state.notify_handle_removed(service, &handle);
            }
        }
    }

    fn apply_remove(&self, cluster: &ClusterKey) {
        self.drain_pending(cluster);
        let Some(previous) = self.state.take_snapshot(cluster) else {
            debug!(cluster = %cluster, "remove for unknown cluster ignored");
            return;
        };
        metrics::increment_counter(metrics::CLUSTER_REMOVALS_TOTAL, 1);
        if self.remove_warn.allow() {
            warn!(cluster = %cluster, "endpoint-set removed; tearing down cluster handles");
        }

        let snapshot = previous.value();
        for service in self.state.services_for_cluster(cluster) {
            let Some(map) = self.state.handle_map_for(&service) else {
                continue;
            };
            // Only this cluster's addresses: a service spanning several
            // clusters keeps its handles from the others.
            for address in snapshot.addresses() {
                if let Some((_, handle)) = map.remove(address) {
                    metrics::increment_counter(metrics::HANDLES_REMOVED_TOTAL, 1);
                    self.state.notify_handle_removed(&service, &handle);
                }
            }
        }
    }
}

impl PropertySubscriber<EndpointSetSnapshot> for EndpointReconciler {
    fn on_put(&self, key: &ClusterKey, value: Option<&Arc<EndpointSetSnapshot>>) {
        self.apply_put(key, value);
    }

    fn on_remove(&self, key: &ClusterKey) {
        self.apply_remove(key);
    }
}
