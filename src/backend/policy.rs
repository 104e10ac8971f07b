use crate::error::{BackendError, FleetError};
use crate::fleet::ResourceId;
use reqwest::StatusCode;

/// Maps a failed write call onto the caller-facing taxonomy.
///
/// Transport codes never leak: 4xx becomes `NotFound`, `Validation` or
/// `Precondition`; everything else stays a `Backend` error.
pub(crate) fn classify_command_error(err: BackendError, id: Option<ResourceId>) -> FleetError {
    let (status, body) = match err {
        BackendError::Rejected { status, body } => (status, body),
        other => return FleetError::Backend(other),
    };

    let reason = body
        .reason
        .clone()
        .or_else(|| body.message.clone())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("rejected").to_string());

    match status {
        StatusCode::NOT_FOUND => match id {
            Some(id) => FleetError::NotFound(id),
            None => FleetError::Precondition { status, reason },
        },
        StatusCode::BAD_REQUEST if !mentions_state_conflict(&body) => FleetError::Validation(
            body.message
                .clone()
                .unwrap_or_else(|| format!("backend rejected input: {reason}")),
        ),
        _ => FleetError::Precondition { status, reason },
    }
}

/// The backend reports wrong-state and name-taken conflicts as 400 in some paths.
fn mentions_state_conflict(body: &dbfleet_schema::RejectionBody) -> bool {
    [body.reason.as_deref(), body.message.as_deref()]
        .into_iter()
        .flatten()
        .map(str::to_ascii_lowercase)
        .any(|text| {
            ["state", "status", "exist", "conflict", "in use", "already"]
                .iter()
                .any(|needle| text.contains(needle))
        })
}
