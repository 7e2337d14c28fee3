//! Per-key property event bus.
//!
//! Distributes Put/Remove notifications to the subscribers of one
//! key-namespace while serializing delivery per key: each key owns a
//! dedicated dispatch lane (an unbounded queue drained by one task), so
//! subscribers never observe overlapping deliveries for a key and a slow
//! subscriber delays only its own key. Ordering across different keys is
//! unspecified.
//!
//! Exactly one upstream source may feed the bus at a time: registering a
//! source yields an epoch-stamped handle and supersedes all prior handles;
//! events published through a superseded handle are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::metrics;
use crate::types::ClusterKey;

/// Receiver side of the bus: one logical consumer of a key-namespace.
///
/// Both callbacks are invoked only from the key's dispatch lane, never
/// concurrently for the same key.
pub trait PropertySubscriber<T>: Send + Sync {
    /// A new snapshot was published for `key`. `None` means the source
    /// announced the key but had no readable data; consumers must treat it
    /// as "no update", never as a removal.
    fn on_put(&self, key: &ClusterKey, value: Option<&Arc<T>>);

    /// The key was withdrawn by the source.
    fn on_remove(&self, key: &ClusterKey);
}

enum LaneJob<T> {
    Put { value: Option<Arc<T>> },
    Remove,
    /// Re-deliver the latest known state, resolved at delivery time so a
    /// replay can never regress behind a Put already queued ahead of it.
    Replay {
        target: Option<Arc<dyn PropertySubscriber<T>>>,
    },
}

struct Lane<T> {
    tx: mpsc::UnboundedSender<LaneJob<T>>,
    _worker: JoinHandle<()>,
}

struct BusShared<T> {
    latest: DashMap<ClusterKey, Arc<T>>,
    subscribers: RwLock<Vec<Arc<dyn PropertySubscriber<T>>>>,
}

impl<T> BusShared<T> {
    fn subscriber_snapshot(&self) -> Vec<Arc<dyn PropertySubscriber<T>>> {
        self.subscribers.read().clone()
    }
}

/// Publish/subscribe bus for one key-namespace of versioned snapshots.
pub struct EventBus<T> {
    shared: Arc<BusShared<T>>,
    lanes: DashMap<ClusterKey, Lane<T>>,
    source_epoch: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl<T: Send + Sync + 'static> EventBus<T> {
    /// Create a bus. Lanes are spawned lazily per key, so this may be called
    /// before a runtime exists as long as nothing is published yet.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(BusShared {
                latest: DashMap::new(),
                subscribers: RwLock::new(Vec::new()),
            }),
            lanes: DashMap::new(),
            source_epoch: AtomicU64::new(0),
            shutdown_tx,
        }
    }

    /// Register a subscriber for every key in this namespace.
    ///
    /// Keys that already have known state are replayed to the new subscriber
    /// through their lanes, so a late subscriber never observes a gap for a
    /// key that has in fact already been announced.
    pub fn subscribe(&self, subscriber: Arc<dyn PropertySubscriber<T>>) {
        self.shared.subscribers.write().push(Arc::clone(&subscriber));
        let known: Vec<ClusterKey> = self
            .shared
            .latest
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for key in known {
            self.enqueue(
                &key,
                LaneJob::Replay {
                    target: Some(Arc::clone(&subscriber)),
                },
            );
        }
    }

    /// Bind a new upstream source, superseding any prior registration.
    pub fn register_source(self: &Arc<Self>) -> SourceRegistration<T> {
        let epoch = self.source_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(epoch, "bound upstream source to event bus");
        SourceRegistration {
            bus: Arc::clone(self),
            epoch,
        }
    }

    /// Re-deliver the latest known state for one key to all subscribers.
    ///
    /// Used when reconciliation needs to be re-run on the key's serialized
    /// lane (e.g. after a service registers against an already-known
    /// cluster). A key with no known state replays nothing.
    pub fn replay(&self, key: &ClusterKey) {
        self.enqueue(key, LaneJob::Replay { target: None });
    }

    /// Latest snapshot the bus has accepted for a key, if any.
    #[must_use]
    pub fn latest(&self, key: &ClusterKey) -> Option<Arc<T>> {
        self.shared.latest.get(key).map(|entry| entry.value().clone())
    }

    /// Stop all dispatch lanes. Queued events may be dropped.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.source_epoch.load(Ordering::Acquire) == epoch
    }

    fn enqueue(&self, key: &ClusterKey, job: LaneJob<T>) {
        let lane = self
            .lanes
            .entry(key.clone())
            .or_insert_with(|| self.spawn_lane(key.clone()));
        if lane.tx.send(job).is_err() {
            warn!(cluster = %key, "dispatch lane closed; dropping event");
        }
    }

    fn spawn_lane(&self, key: ClusterKey) -> Lane<T> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shutdown_tx.subscribe();
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    job = rx.recv() => match job {
                        Some(job) => deliver(&key, job, &shared),
                        None => break,
                    },
                }
            }
            trace!(cluster = %key, "dispatch lane stopped");
        });
        Lane {
            tx,
            _worker: worker,
        }
    }
}

impl<T: Send + Sync + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver<T>(key: &ClusterKey, job: LaneJob<T>, shared: &BusShared<T>) {
    match job {
        LaneJob::Put { value } => {
            for subscriber in shared.subscriber_snapshot() {
                subscriber.on_put(key, value.as_ref());
            }
        }
        LaneJob::Remove => {
            for subscriber in shared.subscriber_snapshot() {
                subscriber.on_remove(key);
            }
        }
        LaneJob::Replay { target } => {
            let Some(value) = shared.latest.get(key).map(|entry| entry.value().clone()) else {
                return;
            };
            metrics::increment_counter(metrics::REPLAY_DELIVERIES_TOTAL, 1);
            match target {
                Some(subscriber) => subscriber.on_put(key, Some(&value)),
                None => {
                    for subscriber in shared.subscriber_snapshot() {
                        subscriber.on_put(key, Some(&value));
                    }
                }
            }
        }
    }
}

/// Epoch-stamped publishing handle for the single active upstream source.
///
/// Deliberately not `Clone`: one registration means one writer. A handle
/// outliving a newer registration silently drops its events (counted), which
/// is what keeps a deposed source from interleaving with its successor.
pub struct SourceRegistration<T> {
    bus: Arc<EventBus<T>>,
    epoch: u64,
}

impl<T: Send + Sync + 'static> SourceRegistration<T> {
    /// Publish a snapshot for a key. Returns `false` when this registration
    /// has been superseded and the event was dropped.
    pub fn put(&self, key: &ClusterKey, value: Option<Arc<T>>) -> bool {
        if !self.bus.is_current(self.epoch) {
            metrics::increment_counter(metrics::STALE_SOURCE_EVENTS_TOTAL, 1);
            debug!(cluster = %key, epoch = self.epoch, "dropping put from superseded source");
            return false;
        }
        if let Some(value) = &value {
            self.bus.shared.latest.insert(key.clone(), Arc::clone(value));
        }
        self.bus.enqueue(key, LaneJob::Put { value });
        true
    }

    /// Withdraw a key. Returns `false` when this registration has been
    /// superseded and the event was dropped.
    pub fn remove(&self, key: &ClusterKey) -> bool {
        if !self.bus.is_current(self.epoch) {
            metrics::increment_counter(metrics::STALE_SOURCE_EVENTS_TOTAL, 1);
            debug!(cluster = %key, epoch = self.epoch, "dropping remove from superseded source");
            return false;
        }
        self.bus.shared.latest.remove(key);
        self.bus.enqueue(key, LaneJob::Remove);
        true
    }

    /// Epoch assigned when this source was bound.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }
}
