use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Convergence loop tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    /// Interval between poll ticks while anything is in flight.
    /// TOML: `reconcile.poll_interval_ms`. Default: `3000`.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive failed ticks before connectivity is reported as degraded.
    /// TOML: `reconcile.degraded_after`. Default: `3`.
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,

    /// Ticks an accepted command may stay unobserved before the loop stops waiting for it.
    /// TOML: `reconcile.expectation_ticks`. Default: `20`.
    #[serde(default = "default_expectation_ticks")]
    pub expectation_ticks: u32,

    /// Capacity of the fleet event broadcast channel.
    /// TOML: `reconcile.event_capacity`. Default: `256`.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl ReconcileConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            degraded_after: default_degraded_after(),
            expectation_ticks: default_expectation_ticks(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_degraded_after() -> u32 {
    3
}

fn default_expectation_ticks() -> u32 {
    20
}

fn default_event_capacity() -> usize {
    256
}
