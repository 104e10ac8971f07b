use dbfleet_schema::RejectionBody;
use reqwest::StatusCode;
use thiserror::Error as ThisError;

use super::IsRetryable;

/// Transport-level failures talking to the control plane.
#[derive(Debug, ThisError)]
pub enum BackendError {
    /// Write endpoint answered 4xx with a (possibly empty) machine-readable reason.
    #[error("Backend rejected request: status={status}, reason={body:?}")]
    Rejected {
        status: StatusCode,
        body: RejectionBody,
    },

    /// Any other non-success status (5xx, unexpected 3xx).
    #[error("Unexpected backend status: status={status}, body={body:.200}")]
    UnexpectedStatus { status: StatusCode, body: String },

    /// DNS, connect, timeouts and body read failures.
    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Response decoded but violates a resource invariant.
    #[error("Malformed backend payload: {0}")]
    Malformed(String),
}

impl IsRetryable for BackendError {
    fn is_retryable(&self) -> bool {
        match self {
            // A body that fails to decode will fail the same way again.
            BackendError::Reqwest(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            BackendError::UnexpectedStatus { status, .. } => status.is_server_error(),
            BackendError::Rejected { .. }
            | BackendError::Json(_)
            | BackendError::Url(_)
            | BackendError::Malformed(_) => false,
        }
    }
}
