//! Caller-facing command surface.
//!
//! Commands are checked against the last observed state, sent to the backend
//! once, and return without waiting for the operation to finish. Completion is
//! observed through the returned [`Watch`] or the event stream.

use super::actor::{self, ReconcilerMessage, Reservation, Reserved};
use super::lifecycle::{Command, ResourceState};
use super::notifier::{FleetEvent, WatchId};
use super::registry::FleetSummary;
use super::resource::{Resource, ResourceId};
use super::validation::{CreateSpec, UpdateSpec};
use super::watch::{Provisioned, Watch};
use crate::backend::{FleetBackend, policy::classify_command_error};
use crate::config::ReconcileConfig;
use crate::error::{BackendError, FleetError};
use dbfleet_schema::ConsoleLogs;
use ractor::ActorRef;
use serde_json::Value;
use std::{future::Future, sync::Arc};
use tokio::sync::{broadcast, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

/// Cloneable handle to a running reconciler.
#[derive(Clone)]
pub struct FleetHandle {
    actor: ActorRef<ReconcilerMessage>,
    backend: Arc<dyn FleetBackend>,
    events: broadcast::Sender<FleetEvent>,
}

/// Starts the reconciler and runs the initial sync in the background.
pub async fn spawn(
    backend: Arc<dyn FleetBackend>,
    cfg: ReconcileConfig,
) -> Result<FleetHandle, FleetError> {
    let (events, _) = broadcast::channel(cfg.event_capacity.max(1));
    let actor = actor::spawn(backend.clone(), cfg, events.clone()).await?;
    Ok(FleetHandle {
        actor,
        backend,
        events,
    })
}

fn actor_err(op: &str, e: impl std::fmt::Display) -> FleetError {
    FleetError::Actor(format!("{op} RPC failed: {e}"))
}

impl FleetHandle {
    /// Last observed fleet, in creation order.
    pub async fn list(&self) -> Result<Vec<Resource>, FleetError> {
        ractor::call!(self.actor, ReconcilerMessage::List).map_err(|e| actor_err("List", e))
    }

    pub async fn get(&self, id: ResourceId) -> Result<Resource, FleetError> {
        ractor::call!(self.actor, ReconcilerMessage::Get, id)
            .map_err(|e| actor_err("Get", e))?
            .ok_or(FleetError::NotFound(id))
    }

    pub async fn summary(&self) -> Result<FleetSummary, FleetError> {
        ractor::call!(self.actor, ReconcilerMessage::Summary).map_err(|e| actor_err("Summary", e))
    }

    /// Best-effort hint only; the backend decides uniqueness at create time.
    pub async fn is_name_taken(&self, name: &str) -> Result<bool, FleetError> {
        Ok(self.list().await?.iter().any(|r| r.name() == name))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    /// Event stream; lagging subscribers see a `Lagged` item instead of blocking the reconciler.
    pub fn events(&self) -> BroadcastStream<FleetEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Polls now and returns once that tick has been applied.
    pub async fn resync(&self) -> Result<(), FleetError> {
        ractor::call!(self.actor, ReconcilerMessage::Resync).map_err(|e| actor_err("Resync", e))?
    }

    /// Watches `id` until it leaves `awaited`.
    ///
    /// Fires immediately if the registry shows another state, unless a command
    /// heading into `awaited` has not been observed by a poll yet.
    pub async fn watch(&self, id: ResourceId, awaited: ResourceState) -> Result<Watch, FleetError> {
        let (tx, rx) = oneshot::channel();
        let watch_id = ractor::call!(self.actor, ReconcilerMessage::Watch, id, awaited, tx)
            .map_err(|e| actor_err("Watch", e))??;
        Ok(Watch::new(id, awaited, watch_id, rx, self.actor.clone()))
    }

    /// Stops the reconciler. Pending watches resolve as closed.
    pub fn shutdown(&self) {
        self.actor.stop(Some("shutdown requested".to_string()));
    }

    pub async fn create(&self, spec: CreateSpec) -> Result<Provisioned, FleetError> {
        let req = spec.into_request()?;
        let desc = self
            .backend
            .create(&req)
            .await
            .map_err(|e| self.reject(e, None))?;

        let Some(resource) = Resource::from_descriptor(desc)? else {
            return Err(BackendError::Malformed(format!(
                "create of '{}' answered with a destroyed database",
                req.name
            ))
            .into());
        };

        let (tx, rx) = oneshot::channel();
        let watch_id = ractor::call!(self.actor, ReconcilerMessage::Admit, resource.clone(), tx)
            .map_err(|e| actor_err("Admit", e))?;

        info!(
            id = resource.id(),
            name = %resource.name(),
            kind = %resource.kind(),
            state = %resource.state(),
            "Create accepted"
        );

        let watch = Watch::new(
            resource.id(),
            ResourceState::Provisioning,
            watch_id,
            rx,
            self.actor.clone(),
        );
        Ok(Provisioned { resource, watch })
    }

    /// Returns a watch on `STARTING`.
    pub async fn start(&self, id: ResourceId) -> Result<Watch, FleetError> {
        let backend = self.backend.clone();
        self.issue(id, Command::Start, move |_| async move {
            backend.start(id).await.map_err(FleetError::from)
        })
        .await
    }

    /// Returns a watch on `STOPPING`.
    pub async fn stop(&self, id: ResourceId) -> Result<Watch, FleetError> {
        self.stop_as(id, Command::Stop).await
    }

    /// Returns a watch on `UPDATING`.
    pub async fn update(&self, id: ResourceId, spec: UpdateSpec) -> Result<Watch, FleetError> {
        let backend = self.backend.clone();
        self.issue(id, Command::Update, move |current| async move {
            let req = spec.into_request(&current)?;
            backend
                .update(current.name(), &req)
                .await
                .map_err(FleetError::from)
        })
        .await
    }

    /// Returns a watch on `DESTROYING`; a delete completes as `WatchOutcome::Removed`.
    pub async fn delete(&self, id: ResourceId) -> Result<Watch, FleetError> {
        let backend = self.backend.clone();
        self.issue(id, Command::Delete, move |_| async move {
            backend.delete(id).await.map_err(FleetError::from)
        })
        .await
    }

    /// Stop, wait for `STOPPED` to be observed, then start.
    ///
    /// Returns the watch on `STARTING`. If the stop ends anywhere but `STOPPED`,
    /// start is never sent.
    pub async fn restart(&self, id: ResourceId) -> Result<Watch, FleetError> {
        let stopping = self.stop_as(id, Command::Restart).await?;
        match stopping.settle().await? {
            Some(stopped) if stopped.state() == ResourceState::Stopped => {
                info!(id, "Restart: stop observed, starting");
            }
            Some(other) => {
                return Err(FleetError::IllegalTransition {
                    id,
                    state: other.state(),
                    command: Command::Start,
                });
            }
            None => return Err(FleetError::NotFound(id)),
        }
        self.start(id).await
    }

    pub async fn logs(
        &self,
        id: ResourceId,
        tail: usize,
        filter: Option<&str>,
    ) -> Result<ConsoleLogs, FleetError> {
        self.backend
            .logs(id, tail, filter)
            .await
            .map_err(|e| classify_command_error(e, Some(id)))
    }

    pub async fn inspect(&self, id: ResourceId) -> Result<Value, FleetError> {
        self.backend
            .inspect(id)
            .await
            .map_err(|e| classify_command_error(e, Some(id)))
    }

    async fn stop_as(&self, id: ResourceId, command: Command) -> Result<Watch, FleetError> {
        let backend = self.backend.clone();
        self.issue(id, command, move |_| async move {
            backend.stop(id).await.map_err(FleetError::from)
        })
        .await
    }

    /// Reserve, call the backend once, then accept or release.
    async fn issue<F, Fut>(
        &self,
        id: ResourceId,
        command: Command,
        call: F,
    ) -> Result<Watch, FleetError>
    where
        F: FnOnce(Resource) -> Fut,
        Fut: Future<Output = Result<(), FleetError>>,
    {
        let (tx, rx) = oneshot::channel();
        let reservation = Reservation {
            id,
            command,
            watch: tx,
        };
        let Reserved { resource, watch_id } =
            ractor::call!(self.actor, ReconcilerMessage::Reserve, reservation)
                .map_err(|e| actor_err("Reserve", e))??;
        let guard = ReservationGuard {
            actor: self.actor.clone(),
            id,
            watch_id,
            armed: true,
        };

        match call(resource).await {
            Ok(()) => {
                guard.accept(command);
                info!(id, %command, "Command accepted by backend");
                Ok(Watch::new(
                    id,
                    command.intermediate(),
                    watch_id,
                    rx,
                    self.actor.clone(),
                ))
            }
            Err(err) => {
                drop(guard);
                let err = match err {
                    FleetError::Backend(e) => self.reject(e, Some(id)),
                    other => other,
                };
                warn!(id, %command, error = %err, "Command not accepted");
                Err(err)
            }
        }
    }

    /// Classifies a backend refusal; a stale view also triggers a refresh.
    fn reject(&self, err: BackendError, id: Option<ResourceId>) -> FleetError {
        let err = classify_command_error(err, id);
        if err.is_stale_view() || matches!(err, FleetError::NotFound(_)) {
            let _ = ractor::cast!(self.actor, ReconcilerMessage::Tick);
        }
        err
    }
}

/// A reservation held while the backend call runs.
///
/// Dropping it unaccepted releases the claim and its watch, so a cancelled
/// command future leaves the resource free for the next command.
struct ReservationGuard {
    actor: ActorRef<ReconcilerMessage>,
    id: ResourceId,
    watch_id: WatchId,
    armed: bool,
}

impl ReservationGuard {
    fn accept(mut self, command: Command) {
        self.armed = false;
        let accepted = ReconcilerMessage::Accepted {
            id: self.id,
            watch_id: self.watch_id,
        };
        if let Err(e) = self.actor.cast(accepted) {
            warn!(id = self.id, %command, "Accepted command could not be recorded: {}", e);
        }
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.actor.cast(ReconcilerMessage::Release {
                id: self.id,
                watch_id: self.watch_id,
            });
        }
    }
}
