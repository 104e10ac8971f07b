//! The control plane's HTTP contract as an abstract capability set.

mod http;
pub(crate) mod policy;

pub use http::HttpBackend;

use crate::error::BackendError;
use crate::fleet::ResourceId;
use async_trait::async_trait;
use dbfleet_schema::{ConsoleLogs, CreateDatabaseRequest, DatabaseDescriptor, UpdateDatabaseRequest};
use serde_json::Value;

#[async_trait]
pub trait FleetBackend: Send + Sync + 'static {
    /// Full authoritative snapshot (`GET /databases`).
    async fn list(&self) -> Result<Vec<DatabaseDescriptor>, BackendError>;

    /// `POST /databases`; the accepted descriptor is expected in `PROVISIONING`.
    async fn create(&self, req: &CreateDatabaseRequest) -> Result<DatabaseDescriptor, BackendError>;

    /// `PUT /databases/{name}`, addressed by the current name.
    async fn update(&self, name: &str, req: &UpdateDatabaseRequest) -> Result<(), BackendError>;

    /// `DELETE /databases/{id}`.
    async fn delete(&self, id: ResourceId) -> Result<(), BackendError>;

    /// `POST /databases/{id}/start`.
    async fn start(&self, id: ResourceId) -> Result<(), BackendError>;

    /// `POST /databases/{id}/stop`.
    async fn stop(&self, id: ResourceId) -> Result<(), BackendError>;

    /// `GET /databases/{id}/logs?tail=&filter=`.
    async fn logs(
        &self,
        id: ResourceId,
        tail: usize,
        filter: Option<&str>,
    ) -> Result<ConsoleLogs, BackendError>;

    /// `GET /databases/{id}/inspect`; opaque diagnostic document.
    async fn inspect(&self, id: ResourceId) -> Result<Value, BackendError>;
}
