use super::FleetBackend;
use crate::config::BackendConfig;
use crate::error::{BackendError, IsRetryable};
use crate::fleet::ResourceId;
use crate::utils::logging::with_pretty_json_debug;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use dbfleet_schema::{
    ConsoleLogs, CreateDatabaseRequest, DatabaseDescriptor, RejectionBody, UpdateDatabaseRequest,
};
use reqwest::header::{CONNECTION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub const BODY_PREVIEW_CHARS: usize = 300;

/// reqwest-backed client for the control plane REST API.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    read_retry: ExponentialBuilder,
}

impl HttpBackend {
    pub fn new(cfg: &BackendConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("dbfleet/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.request_timeout_secs));

        if let Some(proxy_url) = cfg.proxy.as_ref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
        }

        if !cfg.enable_multiplexing {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));

            builder = builder
                .http1_only()
                .pool_max_idle_per_host(0)
                .pool_idle_timeout(Duration::from_secs(0));
        } else {
            builder = builder.http2_adaptive_window(true);
        }

        let client = builder.default_headers(headers).build()?;

        let read_retry = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300))
            .with_max_times(cfg.retry_max_times)
            .with_jitter();

        info!(
            base_url = %cfg.base_url,
            proxy = %cfg.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
            enable_multiplexing = cfg.enable_multiplexing,
            retry_max_times = cfg.retry_max_times,
            "HttpBackend runtime config loaded"
        );

        Ok(Self {
            client,
            base_url: cfg.base_url.clone(),
            read_retry,
        })
    }

    /// `{base}/databases/{segments..}` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                BackendError::Malformed(format!("base URL cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .push("databases")
            .extend(segments);
        Ok(url)
    }

    /// GET with retry on transport failures and 5xx.
    async fn get_json<T>(&self, url: Url, query: &[(&str, String)]) -> Result<T, BackendError>
    where
        T: DeserializeOwned,
    {
        let client = self.client.clone();
        (|| {
            let client = client.clone();
            let url = url.clone();
            async move {
                let resp = client.get(url).query(query).send().await?;
                let resp = ensure_success(resp).await?;
                Ok(resp.json::<T>().await?)
            }
        })
        .retry(self.read_retry)
        .when(|e: &BackendError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!(url = %url, "Backend read retrying after error {} in {:?}", err, dur);
        })
        .await
    }

    /// Write calls go out exactly once; the caller decides on retries.
    async fn send_write(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let resp = request.send().await?;
        ensure_success(resp).await
    }
}

/// Turns non-success statuses into [`BackendError`], keeping the 4xx reason.
async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let bytes = resp.bytes().await.unwrap_or_default();
    if status.is_client_error() {
        let body = serde_json::from_slice::<RejectionBody>(&bytes).unwrap_or_else(|_| {
            let raw = String::from_utf8_lossy(&bytes);
            RejectionBody {
                reason: None,
                message: (!raw.trim().is_empty())
                    .then(|| format!("{:.len$}", raw, len = BODY_PREVIEW_CHARS)),
            }
        });
        debug!(%status, ?body, "Backend rejected request");
        return Err(BackendError::Rejected { status, body });
    }

    let raw = String::from_utf8_lossy(&bytes);
    let body = format!("{:.len$}", raw, len = BODY_PREVIEW_CHARS);
    debug!(%status, body = %body, "Backend returned unexpected status");
    Err(BackendError::UnexpectedStatus { status, body })
}

#[async_trait]
impl FleetBackend for HttpBackend {
    async fn list(&self) -> Result<Vec<DatabaseDescriptor>, BackendError> {
        let descriptors: Vec<DatabaseDescriptor> = self.get_json(self.url(&[])?, &[]).await?;
        with_pretty_json_debug(&descriptors, |pretty| {
            debug!(count = descriptors.len(), snapshot = %pretty, "Fetched database snapshot");
        });
        Ok(descriptors)
    }

    async fn create(
        &self,
        req: &CreateDatabaseRequest,
    ) -> Result<DatabaseDescriptor, BackendError> {
        let url = self.url(&[])?;
        let resp = self.send_write(self.client.post(url).json(req)).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn update(&self, name: &str, req: &UpdateDatabaseRequest) -> Result<(), BackendError> {
        let url = self.url(&[name])?;
        self.send_write(self.client.put(url).json(req)).await?;
        Ok(())
    }

    async fn delete(&self, id: ResourceId) -> Result<(), BackendError> {
        let url = self.url(&[id.to_string().as_str()])?;
        self.send_write(self.client.delete(url)).await?;
        Ok(())
    }

    async fn start(&self, id: ResourceId) -> Result<(), BackendError> {
        let url = self.url(&[id.to_string().as_str(), "start"])?;
        self.send_write(self.client.post(url)).await?;
        Ok(())
    }

    async fn stop(&self, id: ResourceId) -> Result<(), BackendError> {
        let url = self.url(&[id.to_string().as_str(), "stop"])?;
        self.send_write(self.client.post(url)).await?;
        Ok(())
    }

    async fn logs(
        &self,
        id: ResourceId,
        tail: usize,
        filter: Option<&str>,
    ) -> Result<ConsoleLogs, BackendError> {
        let url = self.url(&[id.to_string().as_str(), "logs"])?;
        let mut query = vec![("tail", tail.to_string())];
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            query.push(("filter", filter.to_string()));
        }
        self.get_json(url, &query).await
    }

    async fn inspect(&self, id: ResourceId) -> Result<Value, BackendError> {
        let url = self.url(&[id.to_string().as_str(), "inspect"])?;
        self.get_json(url, &[]).await
    }
}
