//! Remote debrid service client -- one function per API operation.
//!
//! Every call is bounded by a fixed timeout and returns a uniform result
//! shape. HTTP-level and network-level failures come back as `ApiError`
//! values, never as panics; only a malformed base URL can fail at client
//! construction.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Fixed timeout for every remote service call.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A failed remote call. `status` is `None` when no HTTP response arrived
/// (timeout, connection refused, DNS failure).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: Option<u16>,
    pub message: String,
    pub elapsed_ms: u64,
}

/// A successful remote call with its timing.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub elapsed_ms: u64,
    pub data: T,
}

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    #[serde(rename = "type", default)]
    pub account_type: String,
    #[serde(default)]
    pub premium: i64,
}

/// A cached item in the account (summary from the list endpoint, full
/// detail including `links` from the info endpoint).
#[derive(Debug, Clone, Deserialize)]
pub struct CachedItem {
    pub id: String,
    pub hash: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadEntry {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    /// The original restricted link (download-page URL).
    #[serde(default)]
    pub link: String,
    /// The directly fetchable URL.
    #[serde(default)]
    pub download: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnrestrictedLink {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub download: String,
}

/// The remote operations the health checker needs. A trait so tests can
/// inject a scripted remote.
#[async_trait]
pub trait DebridApi: Send + Sync {
    /// Whether an auth token was configured at construction time.
    fn token_configured(&self) -> bool;

    /// Hit the authenticated user endpoint; doubles as the API health probe.
    async fn check_auth(&self) -> ApiResult<UserInfo>;

    /// List the account's cached items.
    async fn list_cached(&self) -> ApiResult<Vec<CachedItem>>;

    /// Full info (including retrievable links) for one cached item.
    async fn cached_item_info(&self, id: &str) -> ApiResult<CachedItem>;

    /// List the account's downloads.
    async fn list_downloads(&self) -> ApiResult<Vec<DownloadEntry>>;

    /// Resolve a restricted link to a direct URL.
    async fn unrestrict_link(&self, link: &str) -> ApiResult<UnrestrictedLink>;
}

/// reqwest-backed client for a Real-Debrid-compatible REST API.
pub struct DebridClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl DebridClient {
    pub fn new(base_url: &str, token: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(CALL_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn token(&self) -> Result<&str, ApiError> {
        self.token.as_deref().ok_or_else(|| ApiError {
            status: None,
            message: "no api token configured".to_string(),
            elapsed_ms: 0,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let token = self.token()?;
        let started = Instant::now();
        let result = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await;
        Self::into_api_result(result, started).await
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: &[(&str, &str)]) -> ApiResult<T> {
        let token = self.token()?;
        let started = Instant::now();
        let result = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .form(form)
            .send()
            .await;
        Self::into_api_result(result, started).await
    }

    async fn into_api_result<T: DeserializeOwned>(
        result: Result<reqwest::Response, reqwest::Error>,
        started: Instant,
    ) -> ApiResult<T> {
        let elapsed = |s: Instant| s.elapsed().as_millis() as u64;
        let resp = result.map_err(|e| ApiError {
            status: e.status().map(|s| s.as_u16()),
            message: if e.is_timeout() {
                format!("request timed out after {}s", CALL_TIMEOUT.as_secs())
            } else {
                e.to_string()
            },
            elapsed_ms: elapsed(started),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let mut message = format!("HTTP {}", status.as_u16());
            if !body.is_empty() {
                // Error bodies are small JSON blobs; cap just in case.
                let snippet: String = body.chars().take(200).collect();
                message = format!("{message}: {snippet}");
            }
            return Err(ApiError {
                status: Some(status.as_u16()),
                message,
                elapsed_ms: elapsed(started),
            });
        }

        let code = status.as_u16();
        let elapsed_ms = elapsed(started);
        let data = resp.json::<T>().await.map_err(|e| ApiError {
            status: Some(code),
            message: format!("invalid response body: {e}"),
            elapsed_ms,
        })?;
        Ok(ApiResponse {
            status: code,
            elapsed_ms,
            data,
        })
    }
}

#[async_trait]
impl DebridApi for DebridClient {
    fn token_configured(&self) -> bool {
        self.token.is_some()
    }

    async fn check_auth(&self) -> ApiResult<UserInfo> {
        self.get_json("/user").await
    }

    async fn list_cached(&self) -> ApiResult<Vec<CachedItem>> {
        self.get_json("/torrents").await
    }

    async fn cached_item_info(&self, id: &str) -> ApiResult<CachedItem> {
        self.get_json(&format!("/torrents/info/{id}")).await
    }

    async fn list_downloads(&self) -> ApiResult<Vec<DownloadEntry>> {
        self.get_json("/downloads").await
    }

    async fn unrestrict_link(&self, link: &str) -> ApiResult<UnrestrictedLink> {
        self.post_form("/unrestrict/link", &[("link", link)]).await
    }
}
