use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Database engines the backend can provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatabaseKind {
    Postgresql,
    Mysql,
    Mariadb,
    Mongodb,
    Redis,
}

impl DatabaseKind {
    pub const ALL: [DatabaseKind; 5] = [
        DatabaseKind::Postgresql,
        DatabaseKind::Mysql,
        DatabaseKind::Mariadb,
        DatabaseKind::Mongodb,
        DatabaseKind::Redis,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            DatabaseKind::Postgresql => "PostgreSQL",
            DatabaseKind::Mysql => "MySQL",
            DatabaseKind::Mariadb => "MariaDB",
            DatabaseKind::Mongodb => "MongoDB",
            DatabaseKind::Redis => "Redis",
        }
    }

    /// Container image the backend runs for this engine.
    pub fn docker_image(self) -> &'static str {
        match self {
            DatabaseKind::Postgresql => "postgres:15-alpine",
            DatabaseKind::Mysql => "mysql:8.0",
            DatabaseKind::Mariadb => "mariadb:11.1",
            DatabaseKind::Mongodb => "mongo:7.0",
            DatabaseKind::Redis => "redis:7.2-alpine",
        }
    }

    /// Port the engine listens on inside its container.
    pub fn default_internal_port(self) -> u16 {
        match self {
            DatabaseKind::Postgresql => 5432,
            DatabaseKind::Mysql | DatabaseKind::Mariadb => 3306,
            DatabaseKind::Mongodb => 27017,
            DatabaseKind::Redis => 6379,
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Status vocabulary as serialized by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatabaseStatus {
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Starting,
    Updating,
    Destroying,
    Failed,
    Destroyed,
}

/// One database instance as reported by `GET /databases`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDescriptor {
    pub id: u64,
    pub name: String,
    #[serde(alias = "type")]
    pub kind: DatabaseKind,
    #[serde(alias = "status")]
    pub state: DatabaseStatus,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "endpoint")]
    pub connection_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp_lax")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        deserialize_with = "deserialize_opt_timestamp_lax",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Accepts RFC 3339 timestamps as well as naive `LocalDateTime` strings, which are read as UTC.
fn parse_timestamp_lax(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
}

fn deserialize_timestamp_lax<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp_lax(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_opt_timestamp_lax<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp_lax(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
