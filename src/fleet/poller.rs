//! Tick bookkeeping for the convergence loop: failure streaks and command expectations.

use super::lifecycle::Command;
use super::notifier::WatchId;
use super::registry::{Registry, Transition};
use super::resource::ResourceId;
use crate::config::ReconcileConfig;
use ahash::AHashMap;

/// Connectivity change produced by recording a tick result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Unchanged,
    Degraded(u32),
    Recovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Reserved by the dispatcher; the backend call has not returned yet.
    /// `observed` is set when a poll already saw the resource move.
    Reserved { observed: bool, ticks_left: u32 },
    /// Accepted by the backend; waiting for a poll to show a state change.
    Accepted { ticks_left: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Expectation {
    command: Command,
    /// Identifies the reservation; stale accept/release messages carry an old one.
    token: WatchId,
    phase: Phase,
}

/// Pure poll-loop state (no IO, no timers).
#[derive(Debug)]
pub struct PollState {
    consecutive_failures: u32,
    degraded: bool,
    degraded_after: u32,
    expectation_ticks: u32,
    expectations: AHashMap<ResourceId, Expectation>,
}

impl PollState {
    pub fn new(cfg: &ReconcileConfig) -> Self {
        Self {
            consecutive_failures: 0,
            degraded: false,
            degraded_after: cfg.degraded_after.max(1),
            expectation_ticks: cfg.expectation_ticks.max(1),
            expectations: AHashMap::new(),
        }
    }

    /// Command currently reserved or awaiting observation on `id`.
    pub fn in_flight(&self, id: ResourceId) -> Option<Command> {
        self.expectations.get(&id).map(|e| e.command)
    }

    /// Claims `id` for `command` under `token`. Fails with the command already holding it.
    pub fn reserve(
        &mut self,
        id: ResourceId,
        command: Command,
        token: WatchId,
    ) -> Result<(), Command> {
        if let Some(existing) = self.in_flight(id) {
            return Err(existing);
        }
        self.expectations.insert(
            id,
            Expectation {
                command,
                token,
                phase: Phase::Reserved {
                    observed: false,
                    ticks_left: self.expectation_ticks,
                },
            },
        );
        Ok(())
    }

    /// The backend accepted the reservation `token`; keep polling until it shows up.
    pub fn accept(&mut self, id: ResourceId, token: WatchId) {
        let ticks_left = self.expectation_ticks;
        let Some(exp) = self.expectations.get_mut(&id) else {
            return;
        };
        if exp.token != token {
            return;
        }
        let phase = exp.phase;
        match phase {
            Phase::Reserved { observed: true, .. } => {
                self.expectations.remove(&id);
            }
            Phase::Reserved { observed: false, .. } => exp.phase = Phase::Accepted { ticks_left },
            Phase::Accepted { .. } => {}
        }
    }

    /// The call behind reservation `token` failed or was cancelled.
    ///
    /// Returns false when `token` no longer holds `id`.
    pub fn release(&mut self, id: ResourceId, token: WatchId) -> bool {
        if self.expectations.get(&id).is_some_and(|e| e.token == token) {
            self.expectations.remove(&id);
            true
        } else {
            false
        }
    }

    /// Whether another tick is needed to converge.
    pub fn needs_tick(&self, registry: &Registry) -> bool {
        registry.any_transitional()
            || self
                .expectations
                .values()
                .any(|e| matches!(e.phase, Phase::Accepted { .. }))
    }

    /// Records a successful tick. Clears expectations met by `transitions` and
    /// returns the ids whose expectation ran out of ticks.
    pub fn record_success(
        &mut self,
        transitions: &[Transition],
    ) -> (Connectivity, Vec<ResourceId>) {
        let connectivity = if self.degraded {
            Connectivity::Recovered
        } else {
            Connectivity::Unchanged
        };
        self.consecutive_failures = 0;
        self.degraded = false;

        for t in transitions {
            let Some(exp) = self.expectations.get_mut(&t.id()) else {
                continue;
            };
            let phase = exp.phase;
            match phase {
                Phase::Accepted { .. } => {
                    self.expectations.remove(&t.id());
                }
                Phase::Reserved { ticks_left, .. } => {
                    exp.phase = Phase::Reserved {
                        observed: true,
                        ticks_left,
                    };
                }
            }
        }

        // Reservations whose call never reported back are dropped without
        // closing watches; only accepted commands count as expired.
        let mut expired = Vec::new();
        self.expectations.retain(|id, exp| match &mut exp.phase {
            Phase::Reserved { ticks_left, .. } => {
                *ticks_left = ticks_left.saturating_sub(1);
                *ticks_left > 0
            }
            Phase::Accepted { ticks_left } => {
                *ticks_left = ticks_left.saturating_sub(1);
                if *ticks_left == 0 {
                    expired.push(*id);
                    false
                } else {
                    true
                }
            }
        });

        (connectivity, expired)
    }

    /// Records a failed tick; the registry and expectations are left as they are.
    pub fn record_failure(&mut self) -> Connectivity {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if !self.degraded && self.consecutive_failures >= self.degraded_after {
            self.degraded = true;
            return Connectivity::Degraded(self.consecutive_failures);
        }
        Connectivity::Unchanged
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}
