//! Configuration structures.
//!
//! Configuration is loaded from environment variables and config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Watch bus configuration.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Controller scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Reconciliation backoff configuration.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Teardown monitoring configuration.
    #[serde(default)]
    pub teardown: TeardownConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Watch bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Number of past events retained for bookmark replay.
    pub retention_events: usize,

    /// Per-subscriber queue capacity; overflow disconnects the subscriber.
    pub subscriber_queue: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            retention_events: 1024,
            subscriber_queue: 256,
        }
    }
}

/// Controller scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Deadline for a single reconciliation run.
    #[serde(with = "humantime_serde")]
    pub reconcile_timeout: Duration,

    /// Periodic re-run of settled controllers (drift safety net).
    /// None disables the watchdog.
    #[serde(default, with = "humantime_serde")]
    pub watchdog_interval: Option<Duration>,

    /// Grace period for in-flight runs on shutdown before forced cancel.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_timeout: Duration::from_secs(60),
            watchdog_interval: Some(Duration::from_secs(60)),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Bounded exponential backoff with jitter for failed reconciliations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    #[serde(with = "humantime_serde")]
    pub initial: Duration,

    /// Upper bound on the delay.
    #[serde(with = "humantime_serde")]
    pub max: Duration,

    /// Multiplier applied per consecutive failure.
    pub factor: f64,

    /// Jitter fraction applied to each delay (0.1 = +-10%).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

/// Stuck-teardown detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownConfig {
    /// How often the monitor scans for tearing-down resources.
    #[serde(with = "humantime_serde")]
    pub scan_interval: Duration,

    /// Age past which a tearing-down resource with finalizers is flagged.
    #[serde(with = "humantime_serde")]
    pub stuck_threshold: Duration,
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stuck_threshold: Duration::from_secs(300),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
