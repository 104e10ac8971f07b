mod backend;
mod fleet;

pub use backend::BackendError;
pub use fleet::FleetError;

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
