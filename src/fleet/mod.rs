//! Reconciliation core: registry, lifecycle rules, convergence loop and commands.

mod actor;
mod dispatcher;
pub mod lifecycle;
mod notifier;
mod poller;
mod registry;
mod resource;
pub mod validation;
mod watch;

pub use dispatcher::{FleetHandle, spawn};
pub use lifecycle::{Command, ResourceState, available_commands};
pub use notifier::{FleetEvent, WatchOutcome};
pub use registry::{FleetSummary, Registry, Transition};
pub use resource::{Endpoint, Resource, ResourceId};
pub use validation::{CreateSpec, UpdateSpec};
pub use watch::{Provisioned, Watch};
