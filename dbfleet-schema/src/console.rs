use serde::{Deserialize, Serialize};

/// Response of `GET /databases/{id}/logs`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct ConsoleLogs {
    pub lines: Vec<String>,
    #[serde(default)]
    pub total: usize,
}
