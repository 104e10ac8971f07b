use super::lifecycle::{Command, ResourceState};
use super::notifier::{
    FleetEvent, WatchId, WatchOutcome, WatchTable, outcome_event, provisioned_event,
};
use super::poller::{Connectivity, PollState};
use super::registry::{FleetSummary, Registry, Transition};
use super::resource::{Resource, ResourceId};
use crate::backend::FleetBackend;
use crate::config::ReconcileConfig;
use crate::error::{BackendError, FleetError};
use ahash::AHashSet;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// A dispatcher's claim on a resource before it contacts the backend.
#[derive(Debug)]
pub(crate) struct Reservation {
    pub id: ResourceId,
    pub command: Command,
    /// Registered on `(id, command.intermediate())` together with the claim.
    pub watch: oneshot::Sender<WatchOutcome>,
}

#[derive(Debug)]
pub(crate) struct Reserved {
    pub resource: Resource,
    pub watch_id: WatchId,
}

type ResyncReply = RpcReplyPort<Result<(), FleetError>>;

#[derive(Debug)]
pub(crate) enum ReconcilerMessage {
    /// Registry snapshot in creation order.
    List(RpcReplyPort<Vec<Resource>>),

    /// Last observed state of one resource.
    Get(ResourceId, RpcReplyPort<Option<Resource>>),

    /// Dashboard counts.
    Summary(RpcReplyPort<FleetSummary>),

    /// Run the Action Guard and claim the resource for a command.
    Reserve(Reservation, RpcReplyPort<Result<Reserved, FleetError>>),

    /// The backend accepted the reserved command.
    Accepted { id: ResourceId, watch_id: WatchId },

    /// The backend call failed or its caller went away; drop the claim and its watch.
    Release { id: ResourceId, watch_id: WatchId },

    /// A create was accepted; insert the resource and watch `PROVISIONING`.
    Admit(
        Resource,
        oneshot::Sender<WatchOutcome>,
        RpcReplyPort<WatchId>,
    ),

    /// Watch an existing resource leave `awaited`.
    Watch(
        ResourceId,
        ResourceState,
        oneshot::Sender<WatchOutcome>,
        RpcReplyPort<Result<WatchId, FleetError>>,
    ),

    /// The caller lost interest; the backend operation is unaffected.
    Unwatch(WatchId),

    /// Force a tick now and reply once it has completed.
    Resync(ResyncReply),

    /// Poll now without waiting for the result (interval timer, stale-view refresh).
    Tick,

    // Internal messages (fetch worker)
    /// Snapshot fetch finished.
    TickComplete(Result<Vec<Resource>, BackendError>),
}

struct ReconcilerState {
    backend: Arc<dyn FleetBackend>,
    registry: Registry,
    watches: WatchTable,
    poll: PollState,
    events: broadcast::Sender<FleetEvent>,
    interval: Duration,
    synced: bool,
    tick_in_flight: bool,
    /// Admitted while the in-flight fetch was running; it may predate them.
    fresh: AHashSet<ResourceId>,
    /// Ids whose provisioning outcome a poll already emitted; cleared on admit or removal.
    provisioned: AHashSet<ResourceId>,
    next_tick: Option<JoinHandle<()>>,
    /// Waiting on the tick currently in flight.
    resync_current: Vec<ResyncReply>,
    /// Waiting on a tick that has not started yet.
    resync_next: Vec<ResyncReply>,
}

struct ReconcilerActor;

#[ractor::async_trait]
impl Actor for ReconcilerActor {
    type Msg = ReconcilerMessage;
    type State = ReconcilerState;
    type Arguments = (
        Arc<dyn FleetBackend>,
        ReconcileConfig,
        broadcast::Sender<FleetEvent>,
    );

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let (backend, cfg, events) = args;
        info!(
            poll_interval_ms = cfg.poll_interval_ms,
            degraded_after = cfg.degraded_after,
            expectation_ticks = cfg.expectation_ticks,
            "FleetReconciler runtime config loaded"
        );

        Ok(ReconcilerState {
            backend,
            registry: Registry::new(),
            watches: WatchTable::new(),
            poll: PollState::new(&cfg),
            events,
            interval: cfg.poll_interval(),
            synced: false,
            tick_in_flight: false,
            fresh: AHashSet::new(),
            provisioned: AHashSet::new(),
            next_tick: None,
            resync_current: Vec::new(),
            resync_next: Vec::new(),
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        // Initial sync, regardless of whether anything is in flight.
        self.start_tick(myself, state);
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(timer) = state.next_tick.take() {
            timer.abort();
        }
        if !state.watches.is_empty() {
            warn!(pending = state.watches.len(), "FleetReconciler stopped with pending watches");
        }
        info!("FleetReconciler stopped");
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ReconcilerMessage::List(rp) => {
                let _ = rp.send(state.registry.list());
            }

            ReconcilerMessage::Get(id, rp) => {
                let _ = rp.send(state.registry.get(id).cloned());
            }

            ReconcilerMessage::Summary(rp) => {
                let summary = FleetSummary {
                    degraded: state.poll.is_degraded(),
                    ..state.registry.summary()
                };
                let _ = rp.send(summary);
            }

            ReconcilerMessage::Reserve(reservation, rp) => {
                let _ = rp.send(self.handle_reserve(state, reservation));
            }

            ReconcilerMessage::Accepted { id, watch_id } => {
                state.poll.accept(id, watch_id);
                self.schedule_tick(myself, state);
            }

            ReconcilerMessage::Release { id, watch_id } => {
                let released = state.poll.release(id, watch_id);
                state.watches.abandon(watch_id);
                debug!(id, released, "Command released without backend acceptance");
            }

            ReconcilerMessage::Admit(resource, tx, rp) => {
                let watch_id = self.handle_admit(state, resource, tx);
                let _ = rp.send(watch_id);
                self.schedule_tick(myself, state);
            }

            ReconcilerMessage::Watch(id, awaited, tx, rp) => {
                let result = match state.registry.get(id).cloned() {
                    Some(current) => {
                        let watch_id = state.watches.register(id, awaited, tx);
                        // A command heading into `awaited` has not been observed yet.
                        let pending = state
                            .poll
                            .in_flight(id)
                            .is_some_and(|command| command.intermediate() == awaited);
                        if !pending {
                            state.watches.fire_one(watch_id, &current);
                        }
                        Ok(watch_id)
                    }
                    None => Err(FleetError::NotFound(id)),
                };
                let _ = rp.send(result);
            }

            ReconcilerMessage::Unwatch(watch_id) => {
                if state.watches.abandon(watch_id) {
                    debug!(watch_id, "Watch abandoned");
                }
            }

            ReconcilerMessage::Resync(rp) => {
                state.resync_next.push(rp);
                self.start_tick(myself, state);
            }

            ReconcilerMessage::Tick => {
                self.start_tick(myself, state);
            }

            ReconcilerMessage::TickComplete(result) => {
                self.handle_tick_complete(myself, state, result);
            }
        }
        Ok(())
    }
}

impl ReconcilerActor {
    fn handle_reserve(
        &self,
        state: &mut ReconcilerState,
        reservation: Reservation,
    ) -> Result<Reserved, FleetError> {
        let Reservation { id, command, watch } = reservation;

        let resource = state
            .registry
            .get(id)
            .cloned()
            .ok_or(FleetError::NotFound(id))?;

        if let Some(existing) = state.poll.in_flight(id) {
            return Err(FleetError::CommandInFlight {
                id,
                command: existing,
            });
        }

        if !command.allowed_from(resource.state()) {
            return Err(FleetError::IllegalTransition {
                id,
                state: resource.state(),
                command,
            });
        }

        let watch_id = state.watches.register(id, command.intermediate(), watch);
        if let Err(existing) = state.poll.reserve(id, command, watch_id) {
            state.watches.abandon(watch_id);
            return Err(FleetError::CommandInFlight {
                id,
                command: existing,
            });
        }
        debug!(id, %command, state = %resource.state(), "Command reserved");
        Ok(Reserved { resource, watch_id })
    }

    fn handle_admit(
        &self,
        state: &mut ReconcilerState,
        resource: Resource,
        tx: oneshot::Sender<WatchOutcome>,
    ) -> WatchId {
        let id = resource.id();
        let name = resource.name().to_string();
        let held = state.registry.admit(resource);
        if state.tick_in_flight {
            state.fresh.insert(id);
        }
        let watch_id = state
            .watches
            .register(id, ResourceState::Provisioning, tx);

        // A poll may have raced ahead of the create reply.
        let announced = state.provisioned.remove(&id);
        if held != ResourceState::Provisioning {
            if let Some(current) = state.registry.get(id).cloned() {
                state.watches.fire_one(watch_id, &current);
                if !announced {
                    if let Some(event) = provisioned_event(&current) {
                        let _ = state.events.send(event);
                    }
                }
            }
        }

        info!(id, name = %name, state = %held, "Database admitted after create");
        watch_id
    }

    /// Starts a fetch unless one is already running; at most one tick is in flight.
    fn start_tick(&self, myself: ActorRef<ReconcilerMessage>, state: &mut ReconcilerState) {
        if state.tick_in_flight {
            return;
        }
        if let Some(timer) = state.next_tick.take() {
            timer.abort();
        }

        state.tick_in_flight = true;
        state.resync_current.append(&mut state.resync_next);

        let backend = state.backend.clone();
        tokio::spawn(async move {
            let result = fetch_snapshot(backend.as_ref()).await;
            if let Err(e) = myself.cast(ReconcilerMessage::TickComplete(result)) {
                warn!("Reconciler unreachable (channel closed), dropping snapshot: {}", e);
            }
        });
    }

    /// Arms the interval timer when convergence still needs another look.
    fn schedule_tick(&self, myself: ActorRef<ReconcilerMessage>, state: &mut ReconcilerState) {
        if state.tick_in_flight || state.next_tick.is_some() {
            return;
        }
        if state.synced && !state.poll.needs_tick(&state.registry) {
            debug!("Fleet quiescent, poller idle");
            return;
        }

        let interval = state.interval;
        state.next_tick = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = myself.cast(ReconcilerMessage::Tick);
        }));
    }

    fn handle_tick_complete(
        &self,
        myself: ActorRef<ReconcilerMessage>,
        state: &mut ReconcilerState,
        result: Result<Vec<Resource>, BackendError>,
    ) {
        state.tick_in_flight = false;
        let fresh = std::mem::take(&mut state.fresh);

        match result {
            Ok(snapshot) => {
                let transitions = state.registry.replace_all_keeping(snapshot, &fresh);
                state.synced = true;

                for transition in &transitions {
                    self.notify(state, transition);
                }

                let (connectivity, expired) = state.poll.record_success(&transitions);
                if connectivity == Connectivity::Recovered {
                    info!("Backend reachable again, reconciliation recovered");
                    let _ = state.events.send(FleetEvent::Recovered);
                }
                for id in expired {
                    let closed = state.watches.close_for(id);
                    warn!(
                        id,
                        closed_watches = closed,
                        "Accepted command never showed up in polls; giving up on it"
                    );
                }
                state.watches.prune_closed();
                debug!(
                    resources = state.registry.len(),
                    transitions = transitions.len(),
                    watches = state.watches.len(),
                    "Poll tick applied"
                );

                for rp in state.resync_current.drain(..) {
                    let _ = rp.send(Ok(()));
                }
            }

            Err(err) => {
                let connectivity = state.poll.record_failure();
                let consecutive = state.poll.consecutive_failures();
                let message = err.to_string();
                warn!(
                    consecutive,
                    error = %message,
                    "Poll tick failed; keeping last known state"
                );
                let _ = state.events.send(FleetEvent::PollFailed {
                    consecutive,
                    error: message.clone(),
                });
                if let Connectivity::Degraded(consecutive) = connectivity {
                    warn!(consecutive, "Backend connectivity degraded");
                    let _ = state.events.send(FleetEvent::Degraded { consecutive });
                }

                for rp in state.resync_current.drain(..) {
                    let _ = rp.send(Err(FleetError::TransientPoll(message.clone())));
                }
            }
        }

        if !state.resync_next.is_empty() {
            self.start_tick(myself, state);
        } else {
            self.schedule_tick(myself, state);
        }
    }

    fn notify(&self, state: &mut ReconcilerState, transition: &Transition) {
        let fired = state.watches.fire(transition);
        match transition.current_state() {
            Some(to) => info!(
                id = transition.id(),
                name = %transition.previous.name(),
                from = %transition.previous_state(),
                to = %to,
                fired,
                "Database state changed"
            ),
            None => info!(
                id = transition.id(),
                name = %transition.previous.name(),
                from = %transition.previous_state(),
                fired,
                "Database removed"
            ),
        }

        if let Some(event) = outcome_event(transition) {
            match &event {
                FleetEvent::Destroyed { id, .. } => {
                    state.provisioned.remove(id);
                }
                FleetEvent::Completed { from, .. } | FleetEvent::Failed { during: from, .. }
                    if *from == ResourceState::Provisioning =>
                {
                    state.provisioned.insert(transition.id());
                }
                _ => {}
            }
            // No subscribers is fine.
            let _ = state.events.send(event);
        }
    }
}

async fn fetch_snapshot(backend: &dyn FleetBackend) -> Result<Vec<Resource>, BackendError> {
    let descriptors = backend.list().await?;
    let mut snapshot = Vec::with_capacity(descriptors.len());
    for desc in descriptors {
        if let Some(resource) = Resource::from_descriptor(desc)? {
            snapshot.push(resource);
        }
    }
    Ok(snapshot)
}

pub(crate) async fn spawn(
    backend: Arc<dyn FleetBackend>,
    cfg: ReconcileConfig,
    events: broadcast::Sender<FleetEvent>,
) -> Result<ActorRef<ReconcilerMessage>, FleetError> {
    let (actor, _jh) = Actor::spawn(None, ReconcilerActor, (backend, cfg, events))
        .await
        .map_err(|e| FleetError::Actor(format!("FleetReconciler spawn failed: {e}")))?;
    Ok(actor)
}
