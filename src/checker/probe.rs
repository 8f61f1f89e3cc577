//! CDN delivery probe -- header-only request measuring time-to-first-byte.

use async_trait::async_trait;
use reqwest::header::RANGE;
use reqwest::{redirect, Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::debug;

/// Fixed timeout for a single probe attempt.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Raw probe measurement. `status == 0` means no HTTP response arrived even
/// after the fallback attempt.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub status: u16,
    pub ttfb_ms: u64,
    /// Final hostname after redirects.
    pub final_host: Option<String>,
    pub error: Option<String>,
}

/// Probe interface, a trait so the checker can be exercised without a
/// live CDN.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn head_with_ttfb(&self, url: &str) -> ProbeResult;
}

/// reqwest-backed prober: HEAD following redirects, with a byte-range GET
/// fallback for servers that reject HEAD.
pub struct HttpProber {
    client: Client,
}

impl Default for HttpProber {
    fn default() -> Self {
        Self {
            client: Client::builder()
                .timeout(PROBE_TIMEOUT)
                .redirect(redirect::Policy::limited(10))
                .build()
                .expect("failed to build probe client"),
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn head_with_ttfb(&self, url: &str) -> ProbeResult {
        let started = Instant::now();
        match self.client.head(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
                    debug!(%status, "HEAD rejected, retrying with ranged GET");
                    return self.range_fallback(url, started, None).await;
                }
                ProbeResult {
                    status: status.as_u16(),
                    ttfb_ms: started.elapsed().as_millis() as u64,
                    final_host: resp.url().host_str().map(str::to_string),
                    error: None,
                }
            }
            // Network-level failure degrades to the fallback path too; some
            // CDN edges drop HEAD on the floor instead of answering 405.
            Err(e) => {
                debug!(error = %e, "HEAD failed, retrying with ranged GET");
                self.range_fallback(url, started, Some(probe_error_message(&e))).await
            }
        }
    }
}

impl HttpProber {
    /// Byte-range-limited GET, still timed from the original start so the
    /// reported TTFB covers the whole probe.
    async fn range_fallback(&self, url: &str, started: Instant, head_error: Option<String>) -> ProbeResult {
        match self.client.get(url).header(RANGE, "bytes=0-0").send().await {
            Ok(resp) => ProbeResult {
                status: resp.status().as_u16(),
                ttfb_ms: started.elapsed().as_millis() as u64,
                final_host: resp.url().host_str().map(str::to_string),
                error: None,
            },
            Err(e) => ProbeResult {
                status: 0,
                ttfb_ms: started.elapsed().as_millis() as u64,
                final_host: None,
                error: Some(head_error.unwrap_or_else(|| probe_error_message(&e))),
            },
        }
    }
}

fn probe_error_message(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("probe timed out after {}s", PROBE_TIMEOUT.as_secs())
    } else if e.is_connect() {
        format!("connection error: {e}")
    } else {
        e.to_string()
    }
}
