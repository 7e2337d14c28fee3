//! Endpoint handles: the stateful client-side objects that represent a
//! usable connection target, plus the injected factory used to build them.
//!
//! A handle accumulates health-tracking history over its lifetime, which is
//! why the reconciler reuses handles whose observable record is unchanged
//! instead of tearing them down and rebuilding.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::properties::EndpointRecord;
use crate::types::{EndpointAddr, ServiceKey};

/// Factory signature used to provision an [`EndpointHandle`] for one
/// `(service, record)` pair.
///
/// Returning `None` signals a validation failure; the reconciler skips the
/// address and continues with the rest of the snapshot.
pub type HandleFactory =
    dyn Fn(&ServiceKey, &EndpointRecord) -> Option<Arc<EndpointHandle>> + Send + Sync;

/// Stateful handle for one `(service, address)` pair.
pub struct EndpointHandle {
    service: ServiceKey,
    record: EndpointRecord,
    health: EndpointHealth,
    created_at: DateTime<Utc>,
}

impl EndpointHandle {
    /// Create a handle from the record that configures it.
    #[must_use]
    pub fn new(service: ServiceKey, record: EndpointRecord) -> Self {
        Self {
            service,
            record,
            health: EndpointHealth::new(),
            created_at: Utc::now(),
        }
    }

    /// Service this handle routes for.
    #[must_use]
    pub const fn service(&self) -> &ServiceKey {
        &self.service
    }

    /// Address of the endpoint behind this handle.
    #[must_use]
    pub const fn address(&self) -> &EndpointAddr {
        self.record.address()
    }

    /// The record this handle was built from; the reconciler compares it
    /// against incoming records to decide whether a rebuild is needed.
    #[must_use]
    pub const fn record(&self) -> &EndpointRecord {
        &self.record
    }

    /// Traffic weight for one partition, if configured.
    #[must_use]
    pub fn partition_weight(&self, partition: u64) -> Option<f64> {
        self.record.weight(partition)
    }

    /// Health tracker accumulated over this handle's lifetime.
    #[must_use]
    pub const fn health(&self) -> &EndpointHealth {
        &self.health
    }

    /// Timestamp when the handle was built.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("service", &self.service)
            .field("address", self.record.address())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Default factory: validates partition weights and builds a plain handle.
///
/// Records carrying a non-finite or non-positive weight are rejected, which
/// exercises the "factory may return none" contract without any transport
/// involvement.
#[must_use]
pub fn default_handle_factory() -> Arc<HandleFactory> {
    Arc::new(|service, record| {
        for (partition, weight) in record.partition_weights() {
            if !weight.is_finite() || *weight <= 0.0 {
                warn!(
                    service = %service,
                    address = %record.address(),
                    partition = *partition,
                    weight = *weight,
                    "rejecting endpoint record with invalid partition weight"
                );
                return None;
            }
        }
        Some(Arc::new(EndpointHandle::new(
            service.clone(),
            record.clone(),
        )))
    })
}

/// Lifetime request-outcome tracking for one endpoint handle.
///
/// Updated by the routing/health layers that observe request outcomes; this
/// layer only carries the state. Thread-safe via relaxed atomics.
#[derive(Debug)]
pub struct EndpointHealth {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
    last_success_unix: AtomicU64,
    last_failure_unix: AtomicU64,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointHealth {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            last_success_unix: AtomicU64::new(0),
            last_failure_unix: AtomicU64::new(0),
        }
    }

    /// Record a successful request against this endpoint.
    pub fn record_success(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if let Some(now) = unix_now() {
            self.last_success_unix.store(now, Ordering::Relaxed);
        }
    }

    /// Record a failed request against this endpoint.
    pub fn record_failure(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        if let Some(now) = unix_now() {
            self.last_failure_unix.store(now, Ordering::Relaxed);
        }
    }

    /// Fraction of recorded attempts that succeeded (1.0 when untested).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let attempts = self.attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 1.0;
        }
        let successes = self.successes.load(Ordering::Relaxed);
        successes as f64 / attempts as f64
    }

    /// Current run of uninterrupted failures.
    #[must_use]
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all health counters.
    #[must_use]
    pub fn stats(&self) -> HealthStats {
        let last_success = self.last_success_unix.load(Ordering::Relaxed);
        let last_failure = self.last_failure_unix.load(Ordering::Relaxed);
        HealthStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_success_unix: (last_success > 0).then_some(last_success),
            last_failure_unix: (last_failure > 0).then_some(last_failure),
        }
    }
}

/// Snapshot of an endpoint's health counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStats {
    /// Total recorded requests.
    pub attempts: u64,
    /// Requests that succeeded.
    pub successes: u64,
    /// Requests that failed.
    pub failures: u64,
    /// Current uninterrupted failure streak.
    pub consecutive_failures: u64,
    /// Unix timestamp of the most recent success, if any.
    pub last_success_unix: Option<u64>,
    /// Unix timestamp of the most recent failure, if any.
    pub last_failure_unix: Option<u64>,
}

fn unix_now() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|duration| duration.as_secs())
}
