//! Low-overhead internal counters for the discovery state layer.
//!
//! Lock-free atomic cells keyed by static metric names; no export surface is
//! provided here, but counters are queryable for diagnostics and tests.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use dashmap::DashMap;

/// Snapshots accepted and applied to balancer state.
pub const SNAPSHOT_UPDATES_TOTAL: &str = "waypost_snapshot_updates_total";
/// Duplicate snapshot deliveries absorbed without effect.
pub const SNAPSHOT_DUPLICATES_TOTAL: &str = "waypost_snapshot_duplicates_total";
/// Absent ("no data") snapshot deliveries ignored.
pub const ABSENT_SNAPSHOTS_TOTAL: &str = "waypost_absent_snapshots_total";
/// Endpoint handles built (including rebuilds on record change).
pub const HANDLES_BUILT_TOTAL: &str = "waypost_handles_built_total";
/// Handle-factory validation failures.
pub const HANDLE_BUILD_FAILURES_TOTAL: &str = "waypost_handle_build_failures_total";
/// Endpoint handles removed.
pub const HANDLES_REMOVED_TOTAL: &str = "waypost_handles_removed_total";
/// Cluster removal events applied.
pub const CLUSTER_REMOVALS_TOTAL: &str = "waypost_cluster_removals_total";
/// Toggling publisher state transitions.
pub const TOGGLE_TRANSITIONS_TOTAL: &str = "waypost_toggle_transitions_total";
/// Write-through persistence failures.
pub const STORE_WRITE_FAILURES_TOTAL: &str = "waypost_store_write_failures_total";
/// Events dropped because their source registration was superseded.
pub const STALE_SOURCE_EVENTS_TOTAL: &str = "waypost_stale_source_events_total";
/// Synthetic replay deliveries performed by the event bus.
pub const REPLAY_DELIVERIES_TOTAL: &str = "waypost_replay_deliveries_total";

struct CounterRegistry {
    counters: DashMap<&'static str, CachePadded<AtomicU64>>,
}

impl CounterRegistry {
    fn increment(&self, name: &'static str, value: u64) {
        self.counters
            .entry(name)
            .or_insert_with(|| CachePadded::new(AtomicU64::new(0)))
            .fetch_add(value, Ordering::Relaxed);
    }

    fn value(&self, name: &'static str) -> u64 {
        self.counters
            .get(name)
            .map_or(0, |cell| cell.load(Ordering::Relaxed))
    }
}

fn registry() -> &'static CounterRegistry {
    static REGISTRY: OnceLock<CounterRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| CounterRegistry {
        counters: DashMap::new(),
    })
}

/// Add `value` to the named counter.
pub fn increment_counter(name: &'static str, value: u64) {
    registry().increment(name, value);
}

/// Current value of the named counter (0 if never incremented).
#[must_use]
pub fn counter_value(name: &'static str) -> u64 {
    registry().value(name)
}
