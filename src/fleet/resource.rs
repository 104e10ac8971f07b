use super::lifecycle::ResourceState;
use crate::error::BackendError;
use chrono::{DateTime, Utc};
use dbfleet_schema::{DatabaseDescriptor, DatabaseKind};
use serde::Serialize;

pub type ResourceId = u64;

/// Where a running instance can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub port: u16,
    pub connection_string: Option<String>,
}

/// One provisioned database instance as last observed.
///
/// Fields are private so the endpoint/state pairing can only come from
/// [`Resource::from_descriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    id: ResourceId,
    name: String,
    kind: DatabaseKind,
    state: ResourceState,
    port: Option<u16>,
    endpoint: Option<Endpoint>,
    container_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl Resource {
    /// Builds a resource from a backend descriptor.
    ///
    /// Returns `Ok(None)` for `DESTROYED` descriptors. A `RUNNING` descriptor
    /// without a port is malformed: the endpoint must exist exactly while running.
    pub fn from_descriptor(desc: DatabaseDescriptor) -> Result<Option<Self>, BackendError> {
        let Some(state) = ResourceState::from_status(desc.state) else {
            return Ok(None);
        };

        let endpoint = match (state, desc.port) {
            (ResourceState::Running, Some(port)) => Some(Endpoint {
                port,
                connection_string: desc.connection_string,
            }),
            (ResourceState::Running, None) => {
                return Err(BackendError::Malformed(format!(
                    "database {} ({}) is RUNNING without a port",
                    desc.id, desc.name
                )));
            }
            _ => None,
        };

        Ok(Some(Self {
            id: desc.id,
            name: desc.name,
            kind: desc.kind,
            state,
            port: desc.port,
            endpoint,
            container_id: desc.container_id,
            created_at: desc.created_at,
            updated_at: desc.updated_at,
        }))
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Configured host port, known even while the instance is not reachable.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Present if and only if the resource is `RUNNING`.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}
