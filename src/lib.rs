pub mod backend;
pub mod config;
pub mod error;
pub mod fleet;
pub mod utils;

pub use backend::{FleetBackend, HttpBackend};
pub use error::{BackendError, FleetError};
pub use fleet::{FleetHandle, Resource, ResourceId, ResourceState};
