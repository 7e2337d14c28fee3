//! Declarative configuration for the discovery state layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for source toggling and recurring-warning cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// How long to wait for the live feed's first data before activating the
    /// durable fallback.
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
    /// Minimum interval between repeated warnings for the same recurring
    /// condition (absent snapshots, persist failures, remove events).
    #[serde(with = "humantime_serde")]
    pub warn_interval: Duration,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            startup_timeout: default_startup_timeout(),
            warn_interval: default_warn_interval(),
        }
    }
}

const fn default_startup_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_warn_interval() -> Duration {
    Duration::from_secs(600)
}
