pub mod console;
pub mod database;
pub mod rejection;
pub mod request;

pub use console::ConsoleLogs;
pub use database::{DatabaseDescriptor, DatabaseKind, DatabaseStatus};
pub use rejection::RejectionBody;
pub use request::{CreateDatabaseRequest, UpdateDatabaseRequest};
