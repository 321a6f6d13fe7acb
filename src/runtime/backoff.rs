//! Bounded exponential backoff with jitter.
//!
//! Drives rescheduling of failed reconciliations. The delay doubles per
//! consecutive failure (by default) up to a cap, with a small jitter so
//! controllers failing on the same cause do not retry in lockstep.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;

use crate::types::BackoffConfig;

/// Per-controller backoff state.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
        }
    }

    /// Number of failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Forget failure history after a successful run.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Record a failure and return how long to wait before the next run.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.consecutive_failures.min(31);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let base = self.config.initial.as_secs_f64() * self.config.factor.powi(exponent as i32);
        let capped = base.min(self.config.max.as_secs_f64());

        // Uniform jitter in [-jitter, +jitter] around the capped delay.
        let spread = (unit_random() * 2.0 - 1.0) * self.config.jitter;
        let jittered = (capped * (1.0 + spread)).max(0.0);

        Duration::from_secs_f64(jittered.min(self.config.max.as_secs_f64()))
    }
}

/// Cheap uniform value in [0, 1) from the std hasher's per-process seed.
fn unit_random() -> f64 {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(0);
    (hasher.finish() >> 11) as f64 / (1u64 << 53) as f64
}
