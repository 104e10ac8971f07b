use super::actor::ReconcilerMessage;
use super::lifecycle::ResourceState;
use super::notifier::{WatchId, WatchOutcome};
use super::resource::{Resource, ResourceId};
use crate::error::FleetError;
use ractor::ActorRef;
use tokio::sync::oneshot;

/// One-shot subscription to a resource leaving a transitional state.
///
/// Dropping a `Watch` is the same as abandoning it; the reconciler prunes it on
/// the next tick. Neither affects the backend operation.
#[derive(Debug)]
pub struct Watch {
    resource_id: ResourceId,
    awaited: ResourceState,
    watch_id: WatchId,
    rx: oneshot::Receiver<WatchOutcome>,
    actor: ActorRef<ReconcilerMessage>,
}

impl Watch {
    pub(crate) fn new(
        resource_id: ResourceId,
        awaited: ResourceState,
        watch_id: WatchId,
        rx: oneshot::Receiver<WatchOutcome>,
        actor: ActorRef<ReconcilerMessage>,
    ) -> Self {
        Self {
            resource_id,
            awaited,
            watch_id,
            rx,
            actor,
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn awaited(&self) -> ResourceState {
        self.awaited
    }

    /// Resolves on the first observed change away from `awaited`.
    pub async fn wait(self) -> Result<WatchOutcome, FleetError> {
        self.rx.await.map_err(|_| FleetError::WatchClosed)
    }

    /// Like [`Watch::wait`], but treats `FAILED` as an error.
    ///
    /// `Ok(None)` means the resource is gone, which is how a delete completes.
    pub async fn settle(self) -> Result<Option<Resource>, FleetError> {
        let id = self.resource_id;
        let during = self.awaited;
        match self.wait().await? {
            WatchOutcome::Exited(resource) if resource.state() == ResourceState::Failed => {
                Err(FleetError::OperationFailed { id, during })
            }
            WatchOutcome::Exited(resource) => Ok(Some(resource)),
            WatchOutcome::Removed(_) => Ok(None),
        }
    }

    /// Stops listening without waiting for the next tick to notice.
    pub fn abandon(self) {
        let _ = ractor::cast!(self.actor, ReconcilerMessage::Unwatch(self.watch_id));
    }
}

/// Result of an accepted `create`.
#[derive(Debug)]
pub struct Provisioned {
    /// Descriptor as returned by the backend, normally `PROVISIONING`.
    pub resource: Resource,
    /// Fires when the resource leaves `PROVISIONING`.
    pub watch: Watch,
}
