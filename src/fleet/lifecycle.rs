//! Resource lifecycle state machine and the command legality table.
//!
//! States only ever change on authoritative reads; this module answers the
//! client-side question "may this command be sent from the state we last saw".

use dbfleet_schema::DatabaseStatus;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceState {
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Starting,
    Updating,
    Destroying,
    Failed,
}

impl ResourceState {
    /// An asynchronous backend operation is in progress.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            ResourceState::Provisioning
                | ResourceState::Starting
                | ResourceState::Stopping
                | ResourceState::Updating
                | ResourceState::Destroying
        )
    }

    /// No operation is in flight; the resource stays here until a command moves it.
    pub fn is_terminal_stable(self) -> bool {
        matches!(
            self,
            ResourceState::Running | ResourceState::Stopped | ResourceState::Failed
        )
    }

    /// Maps the backend status vocabulary. `DESTROYED` has no state: the resource is gone.
    pub fn from_status(status: DatabaseStatus) -> Option<Self> {
        match status {
            DatabaseStatus::Provisioning => Some(ResourceState::Provisioning),
            DatabaseStatus::Running => Some(ResourceState::Running),
            DatabaseStatus::Stopping => Some(ResourceState::Stopping),
            DatabaseStatus::Stopped => Some(ResourceState::Stopped),
            DatabaseStatus::Starting => Some(ResourceState::Starting),
            DatabaseStatus::Updating => Some(ResourceState::Updating),
            DatabaseStatus::Destroying => Some(ResourceState::Destroying),
            DatabaseStatus::Failed => Some(ResourceState::Failed),
            DatabaseStatus::Destroyed => None,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceState::Provisioning => "PROVISIONING",
            ResourceState::Running => "RUNNING",
            ResourceState::Stopping => "STOPPING",
            ResourceState::Stopped => "STOPPED",
            ResourceState::Starting => "STARTING",
            ResourceState::Updating => "UPDATING",
            ResourceState::Destroying => "DESTROYING",
            ResourceState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Lifecycle commands that target an existing resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Start,
    Stop,
    Update,
    Delete,
    Restart,
}

impl Command {
    /// The transitional state the backend reports while this command executes.
    ///
    /// `Restart` reports `Stopping` first; its second half is an ordinary `Start`.
    pub fn intermediate(self) -> ResourceState {
        match self {
            Command::Start => ResourceState::Starting,
            Command::Stop | Command::Restart => ResourceState::Stopping,
            Command::Update => ResourceState::Updating,
            Command::Delete => ResourceState::Destroying,
        }
    }

    /// Whether the command may be issued from `state`.
    pub fn allowed_from(self, state: ResourceState) -> bool {
        match self {
            Command::Start | Command::Update => state == ResourceState::Stopped,
            Command::Stop | Command::Restart => state == ResourceState::Running,
            Command::Delete => matches!(state, ResourceState::Stopped | ResourceState::Failed),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Update => "update",
            Command::Delete => "delete",
            Command::Restart => "restart",
        };
        f.write_str(s)
    }
}

/// Commands a caller may currently offer for a resource in `state`.
pub fn available_commands(state: ResourceState) -> Vec<Command> {
    [
        Command::Start,
        Command::Stop,
        Command::Restart,
        Command::Update,
        Command::Delete,
    ]
    .into_iter()
    .filter(|cmd| cmd.allowed_from(state))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [ResourceState; 8] = [
        ResourceState::Provisioning,
        ResourceState::Running,
        ResourceState::Stopping,
        ResourceState::Stopped,
        ResourceState::Starting,
        ResourceState::Updating,
        ResourceState::Destroying,
        ResourceState::Failed,
    ];

    #[test]
    fn transitional_and_terminal_partition_all_states() {
        for state in ALL_STATES {
            assert_ne!(
                state.is_transitional(),
                state.is_terminal_stable(),
                "{state} must be exactly one of transitional / terminal-stable"
            );
        }
    }

    #[test]
    fn no_command_is_legal_mid_transition() {
        for state in ALL_STATES.into_iter().filter(|s| s.is_transitional()) {
            assert!(available_commands(state).is_empty(), "{state}");
        }
    }

    #[test]
    fn legality_table() {
        assert_eq!(
            available_commands(ResourceState::Running),
            vec![Command::Stop, Command::Restart]
        );
        assert_eq!(
            available_commands(ResourceState::Stopped),
            vec![Command::Start, Command::Update, Command::Delete]
        );
        assert_eq!(available_commands(ResourceState::Failed), vec![Command::Delete]);
    }

    #[test]
    fn delete_requires_resource_to_be_stopped_first() {
        assert!(!Command::Delete.allowed_from(ResourceState::Running));
        assert!(!Command::Delete.allowed_from(ResourceState::Destroying));
    }

    #[test]
    fn destroyed_status_has_no_state() {
        assert_eq!(ResourceState::from_status(DatabaseStatus::Destroyed), None);
        assert_eq!(
            ResourceState::from_status(DatabaseStatus::Updating),
            Some(ResourceState::Updating)
        );
    }
}
