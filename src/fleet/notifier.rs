//! Turns registry transitions into outcome events and fires one-shot watches.

use super::lifecycle::ResourceState;
use super::registry::Transition;
use super::resource::{Resource, ResourceId};
use ahash::AHashMap;
use serde::Serialize;
use tokio::sync::oneshot;

pub type WatchId = u64;

/// What a watch observed when it fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The resource is now in a state other than the awaited one.
    Exited(Resource),
    /// The backend no longer reports the resource.
    Removed(ResourceId),
}

/// User-facing notifications emitted by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FleetEvent {
    /// An operation finished in `RUNNING` or `STOPPED`.
    Completed {
        resource: Resource,
        from: ResourceState,
    },
    /// The backend reports `FAILED`.
    Failed {
        resource: Resource,
        during: ResourceState,
    },
    /// Destruction confirmed; the resource left the registry.
    Destroyed { id: ResourceId, name: String },
    /// A poll tick could not refresh the registry.
    PollFailed { consecutive: u32, error: String },
    /// Polls have been failing for a while; reconciliation keeps going.
    Degraded { consecutive: u32 },
    /// First successful poll after a degraded period.
    Recovered,
}

/// Outcome event for a transition, if it completed an operation.
///
/// Entering a transitional state is progress, not an outcome. A terminal→terminal
/// change observed between two polls counts as one completed transition.
pub fn outcome_event(transition: &Transition) -> Option<FleetEvent> {
    let from = transition.previous_state();
    match &transition.current {
        None => Some(FleetEvent::Destroyed {
            id: transition.id(),
            name: transition.previous.name().to_string(),
        }),
        Some(current) if current.state() == ResourceState::Failed => Some(FleetEvent::Failed {
            resource: current.clone(),
            during: from,
        }),
        Some(current) if current.state().is_terminal_stable() => Some(FleetEvent::Completed {
            resource: current.clone(),
            from,
        }),
        Some(_) => None,
    }
}

/// Outcome of a create whose provisioning finished before any poll saw it move.
pub fn provisioned_event(current: &Resource) -> Option<FleetEvent> {
    match current.state() {
        ResourceState::Failed => Some(FleetEvent::Failed {
            resource: current.clone(),
            during: ResourceState::Provisioning,
        }),
        state if state.is_terminal_stable() => Some(FleetEvent::Completed {
            resource: current.clone(),
            from: ResourceState::Provisioning,
        }),
        _ => None,
    }
}

type Waiter = (WatchId, oneshot::Sender<WatchOutcome>);

/// Pending watches keyed by `(resource, awaited state)` (no IO, no locks).
#[derive(Debug, Default)]
pub struct WatchTable {
    next_id: WatchId,
    watches: AHashMap<(ResourceId, ResourceState), Vec<Waiter>>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: ResourceId,
        awaited: ResourceState,
        tx: oneshot::Sender<WatchOutcome>,
    ) -> WatchId {
        self.next_id += 1;
        let watch_id = self.next_id;
        self.watches
            .entry((id, awaited))
            .or_default()
            .push((watch_id, tx));
        watch_id
    }

    /// Removes one watch without touching others on the same key.
    pub fn abandon(&mut self, watch_id: WatchId) -> bool {
        let mut removed = false;
        self.watches.retain(|_, waiters| {
            let before = waiters.len();
            waiters.retain(|(wid, _)| *wid != watch_id);
            removed |= waiters.len() != before;
            !waiters.is_empty()
        });
        removed
    }

    /// Fires every watch on `transition.id()` whose awaited state was left.
    ///
    /// Returns how many waiters were notified.
    pub fn fire(&mut self, transition: &Transition) -> usize {
        let id = transition.id();
        let outcome = match &transition.current {
            Some(current) => WatchOutcome::Exited(current.clone()),
            None => WatchOutcome::Removed(id),
        };
        self.fire_where(id, transition.current_state(), outcome)
    }

    /// Fires the single watch `watch_id` if `resource` is no longer in its awaited state.
    ///
    /// Other watches on the same resource are left alone.
    pub fn fire_one(&mut self, watch_id: WatchId, resource: &Resource) -> bool {
        let Some((key, pos)) = self.watches.iter().find_map(|(&key, waiters)| {
            let pos = waiters.iter().position(|(wid, _)| *wid == watch_id)?;
            Some((key, pos))
        }) else {
            return false;
        };
        if key.0 != resource.id() || key.1 == resource.state() {
            return false;
        }
        let Some(waiters) = self.watches.get_mut(&key) else {
            return false;
        };
        let (_, tx) = waiters.remove(pos);
        if waiters.is_empty() {
            self.watches.remove(&key);
        }
        tx.send(WatchOutcome::Exited(resource.clone())).is_ok()
    }

    fn fire_where(
        &mut self,
        id: ResourceId,
        current: Option<ResourceState>,
        outcome: WatchOutcome,
    ) -> usize {
        let mut fired = 0;
        self.watches.retain(|&(rid, awaited), waiters| {
            if rid != id || Some(awaited) == current {
                return true;
            }
            for (_, tx) in waiters.drain(..) {
                if tx.send(outcome.clone()).is_ok() {
                    fired += 1;
                }
            }
            false
        });
        fired
    }

    /// Drops every watch on `id`; waiters observe a closed channel.
    pub fn close_for(&mut self, id: ResourceId) -> usize {
        let mut closed = 0;
        self.watches.retain(|&(rid, _), waiters| {
            if rid == id {
                closed += waiters.len();
                false
            } else {
                true
            }
        });
        closed
    }

    /// Forgets waiters whose receiving side went away.
    pub fn prune_closed(&mut self) {
        self.watches.retain(|_, waiters| {
            waiters.retain(|(_, tx)| !tx.is_closed());
            !waiters.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.watches.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::registry::tests::resource;
    use dbfleet_schema::DatabaseStatus;

    fn transition(id: ResourceId, from: DatabaseStatus, to: Option<DatabaseStatus>) -> Transition {
        Transition {
            previous: resource(id, from),
            current: to.map(|s| resource(id, s)),
        }
    }

    #[test]
    fn all_watches_on_a_key_fire_once() {
        let mut table = WatchTable::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        table.register(1, ResourceState::Provisioning, tx1);
        table.register(1, ResourceState::Provisioning, tx2);

        let t = transition(1, DatabaseStatus::Provisioning, Some(DatabaseStatus::Running));
        assert_eq!(table.fire(&t), 2);
        assert!(table.is_empty());
        assert_eq!(table.fire(&t), 0);

        for rx in [&mut rx1, &mut rx2] {
            match rx.try_recv().expect("fired") {
                WatchOutcome::Exited(r) => assert_eq!(r.state(), ResourceState::Running),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[test]
    fn entering_awaited_state_does_not_fire() {
        let mut table = WatchTable::new();
        let (tx, mut rx) = oneshot::channel();
        table.register(1, ResourceState::Stopping, tx);

        let entering = transition(1, DatabaseStatus::Running, Some(DatabaseStatus::Stopping));
        assert_eq!(table.fire(&entering), 0);
        assert!(rx.try_recv().is_err());

        let leaving = transition(1, DatabaseStatus::Stopping, Some(DatabaseStatus::Stopped));
        assert_eq!(table.fire(&leaving), 1);
        assert!(matches!(rx.try_recv(), Ok(WatchOutcome::Exited(_))));
    }

    #[test]
    fn skipped_intermediate_still_fires() {
        let mut table = WatchTable::new();
        let (tx, mut rx) = oneshot::channel();
        table.register(1, ResourceState::Stopping, tx);

        let t = transition(1, DatabaseStatus::Running, Some(DatabaseStatus::Stopped));
        assert_eq!(table.fire(&t), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(WatchOutcome::Exited(r)) if r.state() == ResourceState::Stopped
        ));
    }

    #[test]
    fn removal_fires_removed() {
        let mut table = WatchTable::new();
        let (tx, mut rx) = oneshot::channel();
        table.register(4, ResourceState::Destroying, tx);

        table.fire(&transition(4, DatabaseStatus::Destroying, None));
        assert_eq!(rx.try_recv().ok(), Some(WatchOutcome::Removed(4)));
    }

    #[test]
    fn other_resources_are_untouched() {
        let mut table = WatchTable::new();
        let (tx, _rx) = oneshot::channel();
        table.register(2, ResourceState::Provisioning, tx);

        table.fire(&transition(1, DatabaseStatus::Provisioning, Some(DatabaseStatus::Running)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn abandon_removes_only_that_watch() {
        let mut table = WatchTable::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        let first = table.register(1, ResourceState::Provisioning, tx1);
        table.register(1, ResourceState::Provisioning, tx2);

        assert!(table.abandon(first));
        assert!(!table.abandon(first));
        assert_eq!(table.len(), 1);

        table.fire(&transition(1, DatabaseStatus::Provisioning, Some(DatabaseStatus::Running)));
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn prune_drops_dead_receivers() {
        let mut table = WatchTable::new();
        let (tx, rx) = oneshot::channel();
        table.register(1, ResourceState::Provisioning, tx);
        drop(rx);

        table.prune_closed();
        assert!(table.is_empty());
    }

    #[test]
    fn fire_one_handles_fast_backends() {
        let mut table = WatchTable::new();
        let (tx, mut rx) = oneshot::channel();
        let watch_id = table.register(1, ResourceState::Provisioning, tx);

        assert!(!table.fire_one(watch_id, &resource(1, DatabaseStatus::Provisioning)));
        assert!(table.fire_one(watch_id, &resource(1, DatabaseStatus::Running)));
        assert!(rx.try_recv().is_ok());
        assert!(table.is_empty());
    }

    #[test]
    fn fire_one_leaves_sibling_watches_pending() {
        let mut table = WatchTable::new();
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let (run_tx, mut run_rx) = oneshot::channel();
        table.register(1, ResourceState::Stopping, stop_tx);
        let run_id = table.register(1, ResourceState::Running, run_tx);

        let running = resource(1, DatabaseStatus::Running);
        assert!(!table.fire_one(run_id, &running));
        assert!(stop_rx.try_recv().is_err());
        assert!(run_rx.try_recv().is_err());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn failure_is_reported_distinctly_from_removal() {
        let failed = outcome_event(&transition(
            1,
            DatabaseStatus::Provisioning,
            Some(DatabaseStatus::Failed),
        ));
        assert!(matches!(
            failed,
            Some(FleetEvent::Failed { during: ResourceState::Provisioning, ref resource })
                if resource.endpoint().is_none()
        ));

        let destroyed = outcome_event(&transition(1, DatabaseStatus::Destroying, None));
        assert!(matches!(destroyed, Some(FleetEvent::Destroyed { id: 1, .. })));
    }

    #[test]
    fn create_settled_before_admission_reports_provisioning() {
        assert!(matches!(
            provisioned_event(&resource(3, DatabaseStatus::Running)),
            Some(FleetEvent::Completed { from: ResourceState::Provisioning, .. })
        ));
        assert!(matches!(
            provisioned_event(&resource(3, DatabaseStatus::Failed)),
            Some(FleetEvent::Failed { during: ResourceState::Provisioning, .. })
        ));
        assert_eq!(provisioned_event(&resource(3, DatabaseStatus::Provisioning)), None);
    }

    #[test]
    fn entering_transitional_state_is_not_an_outcome() {
        assert_eq!(
            outcome_event(&transition(1, DatabaseStatus::Running, Some(DatabaseStatus::Stopping))),
            None
        );
        assert!(matches!(
            outcome_event(&transition(1, DatabaseStatus::Starting, Some(DatabaseStatus::Running))),
            Some(FleetEvent::Completed { from: ResourceState::Starting, .. })
        ));
    }
}
