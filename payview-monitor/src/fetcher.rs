//! View-count fetching
//!
//! [`ViewFetcher`] is the seam to whatever scrapes or queries a platform.
//! Callers must tolerate arbitrary latency and transient failure, so every
//! call goes through [`fetch_with_timeout`].

use async_trait::async_trait;
use payview_common::config::FetcherConfig;
use payview_common::db::Platform;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("payview-monitor/", env!("CARGO_PKG_VERSION"));

/// Fetch failures; always transient from the scheduler's point of view
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    /// Content missing, deleted or private
    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream error {0}: {1}")]
    Upstream(u16, String),
}

/// Retrieves the current view count for a platform handle or video URL
#[async_trait]
pub trait ViewFetcher: Send + Sync {
    async fn fetch(&self, platform: Platform, handle: &str) -> Result<i64, FetchError>;
}

/// Run a fetch with an upper bound so a stuck call cannot hold a rate slot
pub async fn fetch_with_timeout(
    fetcher: &dyn ViewFetcher,
    platform: Platform,
    handle: &str,
    timeout: Duration,
) -> Result<i64, FetchError> {
    match tokio::time::timeout(timeout, fetcher.fetch(platform, handle)).await {
        Ok(Ok(count)) if count < 0 => Err(FetchError::Parse(format!("negative view count {}", count))),
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}

#[derive(Debug, Deserialize)]
struct ViewCountResponse {
    view_count: i64,
}

/// Fetcher backed by an HTTP scraper gateway
///
/// `GET {base_url}/v1/views?platform=<p>&url=<handle>` → `{"view_count": N}`
pub struct HttpViewFetcher {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpViewFetcher {
    pub fn new(config: &FetcherConfig, timeout: Duration) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ViewFetcher for HttpViewFetcher {
    async fn fetch(&self, platform: Platform, handle: &str) -> Result<i64, FetchError> {
        let url = format!("{}/v1/views", self.base_url);

        tracing::debug!(platform = %platform, handle = %handle, "Querying view gateway");

        let mut request = self
            .http_client
            .get(&url)
            .query(&[("platform", platform.as_str()), ("url", handle)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Network(format!("request timed out: {}", e))
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let status = response.status();

        if status == 404 || status == 410 {
            return Err(FetchError::NotFound(handle.to_string()));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(FetchError::Upstream(status.as_u16(), error_text));
        }

        let body: ViewCountResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        Ok(body.view_count)
    }
}
