use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Machine-readable reason attached to a 4xx from a write endpoint.
///
/// The backend is not consistent about the envelope, so both a flat object and an
/// `{"error": {...}}` wrapper are accepted, and `code` is read as an alias of `reason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct RejectionBody {
    pub reason: Option<String>,
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct FlatRejection {
    #[serde(default, alias = "code", alias = "error")]
    reason: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

impl<'de> Deserialize<'de> for RejectionBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let flat = FlatRejection::deserialize(deserializer)?;
        match flat.reason {
            Some(Value::Object(inner)) => {
                let nested: FlatRejection =
                    serde_json::from_value(Value::Object(inner)).map_err(serde::de::Error::custom)?;
                Ok(Self {
                    reason: nested.reason.as_ref().and_then(value_as_string),
                    message: nested.message.or(flat.message),
                })
            }
            other => Ok(Self {
                reason: other.as_ref().and_then(value_as_string),
                message: flat.message,
            }),
        }
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
