//! Dual-source toggling: arbitrates between the live discovery feed and the
//! durable snapshot store, exposing exactly one source to the event bus.
//!
//! The failover logic is an explicit state machine rather than behavior
//! scattered across callbacks, so transitions can be observed and tested
//! independently of any real backend:
//!
//! `Uninitialized → AwaitingLive → LiveActive ⇄ FallbackActive`

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::bus::SourceRegistration;
use crate::config::BalancerConfig;
use crate::feed::{DiscoveryFeed, FeedEvent};
use crate::log_throttle::LogThrottle;
use crate::metrics;
use crate::store::SnapshotStore;
use crate::types::ClusterKey;

/// Which source currently reaches the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleState {
    /// Driver not started yet.
    Uninitialized,
    /// Waiting for the live feed's first data, fallback armed.
    AwaitingLive,
    /// Live feed events are forwarded and write-through persisted.
    LiveActive,
    /// Snapshot-store state is active; live feed is watched for recovery.
    FallbackActive,
}

/// Publisher that forwards one of two sources into the event bus.
pub struct TogglingPublisher<T> {
    feed: Arc<dyn DiscoveryFeed<T>>,
    store: Arc<dyn SnapshotStore<T>>,
    registration: SourceRegistration<T>,
    config: BalancerConfig,
    state_tx: watch::Sender<ToggleState>,
    /// Last snapshot forwarded to the bus per key, regardless of source.
    /// Lets a live→fallback switch publish immediately without a store
    /// read round-trip.
    forwarded: Mutex<HashMap<ClusterKey, Arc<T>>>,
    persist_warn: LogThrottle,
}

impl<T: Send + Sync + 'static> TogglingPublisher<T> {
    /// Create a publisher; call [`spawn`](Self::spawn) to start the driver.
    #[must_use]
    pub fn new(
        feed: Arc<dyn DiscoveryFeed<T>>,
        store: Arc<dyn SnapshotStore<T>>,
        registration: SourceRegistration<T>,
        config: BalancerConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ToggleState::Uninitialized);
        let persist_warn = LogThrottle::new(config.warn_interval);
        Arc::new(Self {
            feed,
            store,
            registration,
            config,
            state_tx,
            forwarded: Mutex::new(HashMap::new()),
            persist_warn,
        })
    }

    /// Current state of the toggle.
    #[must_use]
    pub fn state(&self) -> ToggleState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions (used by diagnostics and tests).
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ToggleState> {
        self.state_tx.subscribe()
    }

    /// Start the driver task; it runs until the shutdown signal fires.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let publisher = Arc::clone(self);
        tokio::spawn(async move {
            publisher.run(shutdown).await;
        })
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.transition(ToggleState::AwaitingLive, "startup");

        let mut feed_rx = match self.feed.subscribe().await {
            Ok(rx) => Some(rx),
            Err(err) => {
                warn!(error = %err, "discovery feed subscription failed; activating fallback");
                self.activate_fallback("subscribe-failed");
                None
            }
        };

        let deadline = time::sleep(self.config.startup_timeout);
        tokio::pin!(deadline);

        loop {
            let awaiting = self.state() == ToggleState::AwaitingLive;
            let feed_open = feed_rx.is_some();
            tokio::select! {
                _ = shutdown.changed() => break,
                () = &mut deadline, if awaiting => {
                    warn!(
                        timeout = ?self.config.startup_timeout,
                        "live feed produced no data before the startup deadline"
                    );
                    self.activate_fallback("startup-timeout");
                }
                event = recv_event(&mut feed_rx), if feed_open => match event {
                    Some(event) => self.handle_feed_event(event),
                    None => {
                        warn!("discovery feed stream ended");
                        if self.state() != ToggleState::FallbackActive {
                            self.activate_fallback("feed-closed");
                        }
                        feed_rx = None;
                    }
                },
            }
        }
        debug!("toggling publisher driver stopped");
    }

    fn handle_feed_event(&self, event: FeedEvent<T>) {
        match event {
            FeedEvent::Put { key, value } => {
                self.ensure_live("live-data");
                self.forward_put(&key, value);
            }
            FeedEvent::Remove { key } => {
                self.ensure_live("live-data");
                self.forward_remove(&key);
            }
            FeedEvent::ConnectionLost => {
                if self.state() == ToggleState::LiveActive {
                    warn!("discovery feed connection lost");
                    self.activate_fallback("connection-lost");
                }
            }
            FeedEvent::ConnectionRestored => {
                // The feed replays a full snapshot set after reconnecting;
                // the reconciler absorbs it as ordinary Puts.
                self.ensure_live("reconnected");
            }
        }
    }

    /// Any live activity (data or an explicit reconnect signal) makes the
    /// live source active; a first connect arriving after the startup
    /// deadline behaves like a recovery.
    fn ensure_live(&self, reason: &'static str) {
        if self.state() != ToggleState::LiveActive {
            self.transition(ToggleState::LiveActive, reason);
        }
    }

    fn forward_put(&self, key: &ClusterKey, value: Arc<T>) {
        self.forwarded
            .lock()
            .insert(key.clone(), Arc::clone(&value));
        if !self.registration.put(key, Some(Arc::clone(&value))) {
            return;
        }
        // Write-through backup; the store is not the read path while live.
        if let Err(err) = self.store.put(key, &value) {
            metrics::increment_counter(metrics::STORE_WRITE_FAILURES_TOTAL, 1);
            if self.persist_warn.allow() {
                warn!(cluster = %key, error = %err, "write-through snapshot persist failed");
            }
        }
    }

    fn forward_remove(&self, key: &ClusterKey) {
        self.forwarded.lock().remove(key);
        if !self.registration.remove(key) {
            return;
        }
        if let Err(err) = self.store.remove(key) {
            metrics::increment_counter(metrics::STORE_WRITE_FAILURES_TOTAL, 1);
            if self.persist_warn.allow() {
                warn!(cluster = %key, error = %err, "snapshot removal persist failed");
            }
        }
    }

    /// Make the snapshot store the active source, publishing its view
    /// immediately. Republishing identical content is harmless: the
    /// reconciler's equality check absorbs it, and no Removes are emitted
    /// for keys that merely changed source.
    fn activate_fallback(&self, reason: &'static str) {
        self.transition(ToggleState::FallbackActive, reason);

        let cached: Vec<(ClusterKey, Arc<T>)> = {
            let forwarded = self.forwarded.lock();
            forwarded
                .iter()
                .map(|(key, value)| (key.clone(), Arc::clone(value)))
                .collect()
        };
        if !cached.is_empty() {
            debug!(keys = cached.len(), "publishing cached snapshots on fallback activation");
            for (key, value) in cached {
                self.registration.put(&key, Some(value));
            }
            return;
        }

        match self.store.list_keys() {
            Ok(keys) => {
                info!(keys = keys.len(), "loading fallback snapshots from store");
                for key in keys {
                    match self.store.get(&key) {
                        Ok(Some(value)) => {
                            let value = Arc::new(value);
                            self.forwarded
                                .lock()
                                .insert(key.clone(), Arc::clone(&value));
                            self.registration.put(&key, Some(value));
                        }
                        Ok(None) => {
                            // Listed but unreadable by the time we fetched
                            // it; publish "no data" so downstream keeps
                            // whatever it has.
                            self.registration.put(&key, None);
                        }
                        Err(err) => {
                            warn!(cluster = %key, error = %err, "failed to read fallback snapshot");
                            self.registration.put(&key, None);
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to list fallback snapshot keys; state left unchanged");
            }
        }
    }

    fn transition(&self, next: ToggleState, reason: &'static str) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            metrics::increment_counter(metrics::TOGGLE_TRANSITIONS_TOTAL, 1);
            info!(from = ?previous, to = ?next, reason, "toggling publisher state change");
        }
    }
}

async fn recv_event<T>(rx: &mut Option<mpsc::Receiver<FeedEvent<T>>>) -> Option<FeedEvent<T>> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        // Unreachable: the select arm is guarded on `feed_open`.
        None => None,
    }
}
