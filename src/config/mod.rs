mod backend;
mod basic;
mod reconcile;

pub use backend::BackendConfig;
pub use basic::BasicConfig;
pub use reconcile::ReconcileConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::LazyLock};
use thiserror::Error as ThisError;

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Process-level settings (see `basic` table in dbfleet.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Backend HTTP client settings (see `backend` table in dbfleet.toml).
    #[serde(default)]
    pub backend: BackendConfig,

    /// Poll loop tuning (see `reconcile` table in dbfleet.toml).
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("failed to extract configuration: {0}")]
    Extract(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

const DEFAULT_CONFIG_FILE: &str = "dbfleet.toml";
const ENV_PREFIX: &str = "DBFLEET_";

impl Config {
    /// Builds a Figment that merges defaults, an optional `dbfleet.toml` and `DBFLEET_*` env vars.
    ///
    /// Nested keys use `__` as separator, e.g. `DBFLEET_RECONCILE__POLL_INTERVAL_MS=500`.
    pub fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads configuration; a missing config file is not an error.
    pub fn from_optional_file() -> Result<Self, ConfigError> {
        let cfg: Self = Self::figment().extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.backend.base_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "backend.base_url must be http(s), got {}",
                self.backend.base_url
            )));
        }
        if self.reconcile.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconcile.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.reconcile.degraded_after == 0 {
            return Err(ConfigError::Invalid(
                "reconcile.degraded_after must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Global, lazily-initialized configuration instance used by the binary.
pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    Config::from_optional_file().unwrap_or_else(|err| panic!("{err}"))
});

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.reconcile.poll_interval_ms, 3000);
        assert_eq!(cfg.reconcile.degraded_after, 3);
        assert_eq!(cfg.backend.base_url.as_str(), "http://localhost:8080/api/v1");
    }

    #[test]
    fn file_and_env_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [backend]
                base_url = "http://10.0.0.5:9000/api/v1"

                [reconcile]
                poll_interval_ms = 750
                "#,
            )?;
            jail.set_env("DBFLEET_RECONCILE__DEGRADED_AFTER", "5");
            jail.set_env("DBFLEET_BASIC__LOGLEVEL", "debug");

            let cfg = Config::from_optional_file().expect("config loads");
            assert_eq!(cfg.backend.base_url.as_str(), "http://10.0.0.5:9000/api/v1");
            assert_eq!(cfg.reconcile.poll_interval_ms, 750);
            assert_eq!(cfg.reconcile.degraded_after, 5);
            assert_eq!(cfg.basic.loglevel, "debug");
            Ok(())
        });
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("DBFLEET_RECONCILE__POLL_INTERVAL_MS", "0");
            let err = Config::from_optional_file().expect_err("zero interval must fail");
            assert!(matches!(err, ConfigError::Invalid(_)));
            Ok(())
        });
    }
}
