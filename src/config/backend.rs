use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use url::Url;

static DEFAULT_BASE_URL: LazyLock<Url> = LazyLock::new(|| {
    Url::parse("http://localhost:8080/api/v1").expect("valid default backend URL")
});

/// Backend (control plane REST API) client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base URL of the control plane API; `/databases` is appended.
    /// TOML: `backend.base_url`. Default: `http://localhost:8080/api/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: Url,

    /// Optional HTTP proxy for the reqwest client.
    /// TOML: `backend.proxy`. Example: `http://127.0.0.1:1080`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// TOML: `backend.connect_timeout_secs`. Default: `5`.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// TOML: `backend.request_timeout_secs`. Default: `30`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Max retry attempts for read calls (list, logs, inspect). Writes are never retried.
    /// TOML: `backend.retry_max_times`. Default: `2`.
    #[serde(default = "default_retry_max_times")]
    pub retry_max_times: usize,

    /// Allow HTTP/2 multiplexing; disabled forces HTTP/1 with `Connection: close`.
    /// TOML: `backend.enable_multiplexing`. Default: `false`.
    #[serde(default)]
    pub enable_multiplexing: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            proxy: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_max_times: default_retry_max_times(),
            enable_multiplexing: false,
        }
    }
}

fn default_base_url() -> Url {
    DEFAULT_BASE_URL.clone()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_retry_max_times() -> usize {
    2
}
