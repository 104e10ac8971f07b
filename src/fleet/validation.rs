use super::resource::Resource;
use crate::error::FleetError;
use dbfleet_schema::{CreateDatabaseRequest, DatabaseKind, UpdateDatabaseRequest};

/// Lowest host port a database may bind; 5432 belongs to the platform database.
pub const MIN_PORT: u16 = 5433;
pub const MIN_MEMORY_MB: u32 = 128;
pub const MAX_MEMORY_MB: u32 = 2048;

/// Input of `create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSpec {
    pub name: String,
    pub kind: DatabaseKind,
    pub port: Option<u16>,
    pub version: Option<String>,
    pub memory_mb: Option<u32>,
}

impl CreateSpec {
    pub fn new(name: impl Into<String>, kind: DatabaseKind) -> Self {
        Self {
            name: name.into(),
            kind,
            port: None,
            version: None,
            memory_mb: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_memory_mb(mut self, memory_mb: u32) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    pub fn into_request(self) -> Result<CreateDatabaseRequest, FleetError> {
        validate_name("name", &self.name)?;
        if let Some(port) = self.port {
            validate_port(port)?;
        }
        if let Some(version) = self.version.as_deref() {
            validate_version(version)?;
        }
        if let Some(memory_mb) = self.memory_mb {
            if !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&memory_mb) {
                return Err(FleetError::Validation(format!(
                    "memory_mb must be between {MIN_MEMORY_MB} and {MAX_MEMORY_MB}, got {memory_mb}"
                )));
            }
        }

        Ok(CreateDatabaseRequest {
            name: self.name,
            kind: self.kind,
            port: self.port,
            version: self.version,
            memory_mb: self.memory_mb,
        })
    }
}

/// Input of `update`; unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSpec {
    pub new_name: Option<String>,
    pub new_port: Option<u16>,
}

impl UpdateSpec {
    pub fn rename(new_name: impl Into<String>) -> Self {
        Self {
            new_name: Some(new_name.into()),
            new_port: None,
        }
    }

    pub fn port(new_port: u16) -> Self {
        Self {
            new_name: None,
            new_port: Some(new_port),
        }
    }

    /// Builds the request against the current resource, dropping fields that would not change.
    pub fn into_request(self, current: &Resource) -> Result<UpdateDatabaseRequest, FleetError> {
        if let Some(name) = self.new_name.as_deref() {
            validate_name("new_name", name)?;
        }
        if let Some(port) = self.new_port {
            validate_port(port)?;
        }

        let new_name = self.new_name.filter(|n| n != current.name());
        let port = self.new_port.filter(|p| Some(*p) != current.port());
        if new_name.is_none() && port.is_none() {
            return Err(FleetError::NoOp);
        }

        Ok(UpdateDatabaseRequest {
            name: current.name().to_string(),
            new_name,
            port,
        })
    }
}

/// `^[a-z0-9-]+$`
fn validate_name(field: &str, name: &str) -> Result<(), FleetError> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(FleetError::Validation(format!(
            "{field} must contain only lowercase letters, numbers, and hyphens, got {name:?}"
        )))
    }
}

fn validate_port(port: u16) -> Result<(), FleetError> {
    if port < MIN_PORT {
        return Err(FleetError::Validation(format!(
            "port must be between {MIN_PORT} and 65535, got {port}"
        )));
    }
    Ok(())
}

/// `^[0-9][0-9a-zA-Z.-]*$`
fn validate_version(version: &str) -> Result<(), FleetError> {
    let mut bytes = version.bytes();
    let valid = bytes.next().is_some_and(|b| b.is_ascii_digit())
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(FleetError::Validation(format!(
            "version must be a valid tag (e.g. 15, 8.0, 7.2), got {version:?}"
        )))
    }
}
