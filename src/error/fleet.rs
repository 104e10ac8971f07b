use reqwest::StatusCode;
use thiserror::Error as ThisError;

use super::BackendError;
use crate::fleet::{Command, ResourceId, ResourceState};

/// Caller-facing errors of the fleet core.
#[derive(Debug, ThisError)]
pub enum FleetError {
    /// Malformed input, rejected before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The command is not legal from the last observed state.
    #[error("Cannot {command} database {id} while it is {state}")]
    IllegalTransition {
        id: ResourceId,
        state: ResourceState,
        command: Command,
    },

    /// Another command on this resource was accepted and has not been observed yet.
    #[error("Database {id} already has a {command} in flight")]
    CommandInFlight { id: ResourceId, command: Command },

    /// The backend refused a command the client believed legal; resync and retry.
    #[error("Backend rejected command: status={status}, reason={reason}")]
    Precondition { status: StatusCode, reason: String },

    /// Update requested with nothing to change.
    #[error("Update would not change anything")]
    NoOp,

    #[error("Database {0} not found")]
    NotFound(ResourceId),

    /// A poll tick could not reach the backend. The registry was left untouched.
    #[error("Poll failed: {0}")]
    TransientPoll(String),

    /// The backend reports the operation ended in `FAILED`.
    #[error("Database {id} failed while {during}")]
    OperationFailed {
        id: ResourceId,
        during: ResourceState,
    },

    /// A watch was dropped by the reconciler before it fired.
    #[error("Watch closed before the database left its transitional state")]
    WatchClosed,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Ractor error: {0}")]
    Actor(String),
}

impl FleetError {
    /// Whether the caller should force a resync before trying again.
    pub fn is_stale_view(&self) -> bool {
        matches!(self, FleetError::Precondition { .. })
    }
}
