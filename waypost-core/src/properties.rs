//! Endpoint property model: records, per-cluster snapshots, and the
//! versioned wrapper applied when a snapshot is accepted into balancer state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ClusterKey, EndpointAddr};

/// One network endpoint with its partition weights and opaque metadata.
///
/// Equality is structural over the full observable record (address, weight
/// map, metadata); the reconciler uses it to decide whether an existing
/// handle can be kept or must be rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
    address: EndpointAddr,
    #[serde(default)]
    partition_weights: BTreeMap<u64, f64>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

impl EndpointRecord {
    /// Create a record with no partition weights or metadata.
    #[must_use]
    pub fn new(address: EndpointAddr) -> Self {
        Self {
            address,
            partition_weights: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add a traffic weight for one partition.
    #[must_use]
    pub fn with_partition_weight(mut self, partition: u64, weight: f64) -> Self {
        self.partition_weights.insert(partition, weight);
        self
    }

    /// Attach an opaque metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Endpoint address.
    #[must_use]
    pub const fn address(&self) -> &EndpointAddr {
        &self.address
    }

    /// Full partition→weight map.
    #[must_use]
    pub const fn partition_weights(&self) -> &BTreeMap<u64, f64> {
        &self.partition_weights
    }

    /// Weight assigned to one partition, if present.
    #[must_use]
    pub fn weight(&self, partition: u64) -> Option<f64> {
        self.partition_weights.get(&partition).copied()
    }

    /// Opaque endpoint-specific metadata.
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }
}

/// The complete endpoint set for one cluster at a point in time.
///
/// Immutable once constructed; replaced wholesale on the next accepted Put.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSetSnapshot {
    cluster: ClusterKey,
    records: BTreeMap<EndpointAddr, EndpointRecord>,
}

impl EndpointSetSnapshot {
    /// Create an empty snapshot for a cluster.
    #[must_use]
    pub fn new(cluster: ClusterKey) -> Self {
        Self {
            cluster,
            records: BTreeMap::new(),
        }
    }

    /// Build a snapshot from an iterator of records.
    #[must_use]
    pub fn from_records(
        cluster: ClusterKey,
        records: impl IntoIterator<Item = EndpointRecord>,
    ) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.address().clone(), record))
            .collect();
        Self { cluster, records }
    }

    /// Add one record, replacing any prior record for the same address.
    #[must_use]
    pub fn with_record(mut self, record: EndpointRecord) -> Self {
        self.records.insert(record.address().clone(), record);
        self
    }

    /// Cluster this snapshot belongs to.
    #[must_use]
    pub const fn cluster(&self) -> &ClusterKey {
        &self.cluster
    }

    /// Record for one address, if present.
    #[must_use]
    pub fn record(&self, address: &EndpointAddr) -> Option<&EndpointRecord> {
        self.records.get(address)
    }

    /// Whether the snapshot contains an address.
    #[must_use]
    pub fn contains(&self, address: &EndpointAddr) -> bool {
        self.records.contains_key(address)
    }

    /// Iterate all records in address order.
    pub fn records(&self) -> impl Iterator<Item = &EndpointRecord> {
        self.records.values()
    }

    /// Iterate all addresses in order.
    pub fn addresses(&self) -> impl Iterator<Item = &EndpointAddr> {
        self.records.keys()
    }

    /// Number of endpoints in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot carries no endpoints.
    ///
    /// An empty snapshot is legitimate data ("this cluster currently has no
    /// endpoints"), distinct from an absent snapshot which means "no data".
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A snapshot accepted into balancer state, stamped with the process-wide
/// version counter and the wall-clock acceptance time.
///
/// The version is diagnostics-only: delivery ordering is guaranteed by the
/// event bus's per-key serialization, never by version comparison.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    value: Arc<T>,
    version: u64,
    accepted_at: DateTime<Utc>,
}

impl<T> Versioned<T> {
    pub(crate) fn new(value: Arc<T>, version: u64) -> Self {
        Self {
            value,
            version,
            accepted_at: Utc::now(),
        }
    }

    /// Shared reference to the wrapped snapshot.
    #[must_use]
    pub const fn value(&self) -> &Arc<T> {
        &self.value
    }

    /// Globally monotonic version assigned at acceptance.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Wall-clock time the snapshot was accepted.
    #[must_use]
    pub const fn accepted_at(&self) -> DateTime<Utc> {
        self.accepted_at
    }
}
