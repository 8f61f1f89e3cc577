//! Target resolution -- turn a configured stream into a measured probe.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::probe::Prober;
use super::{classify_error, CheckFailure, CheckOutcome, ErrorKind, FailureStep};
use crate::config::{ResolveMode, StreamTarget};
use crate::debrid::{ApiError, DebridApi};

/// Resolves targets through the remote service and probes the resulting
/// direct URL. `check` never errors: every failure mode comes back as a
/// classified `CheckOutcome`.
#[derive(Clone)]
pub struct HealthChecker {
    api: Arc<dyn DebridApi>,
    prober: Arc<dyn Prober>,
}

impl HealthChecker {
    pub fn new(api: Arc<dyn DebridApi>, prober: Arc<dyn Prober>) -> Self {
        Self { api, prober }
    }

    pub async fn check(&self, target: &StreamTarget) -> CheckOutcome {
        let started = Instant::now();
        let direct_url = match &target.mode {
            ResolveMode::ByHash(hash) => self.resolve_by_hash(hash).await,
            ResolveMode::ByUrl(url) => self.resolve_by_url(url).await,
        };
        let direct_url = match direct_url {
            Ok(url) => url,
            Err(outcome) => return outcome,
        };
        let resolution_time_ms = started.elapsed().as_millis() as u64;
        debug!(target = %target.id, url = %direct_url, resolution_time_ms, "resolved direct url");
        self.probe_resolved(&direct_url, resolution_time_ms).await
    }

    /// Hash protocol: cached list -> item info -> unrestrict -> probe.
    /// Read-only against the account; nothing is added or removed.
    async fn resolve_by_hash(&self, hash: &str) -> Result<String, CheckOutcome> {
        let cached = self
            .api
            .list_cached()
            .await
            .map_err(|e| classified(FailureStep::CacheNotInAccount, &e))?;
        let item = cached
            .data
            .iter()
            .find(|c| c.hash.eq_ignore_ascii_case(hash))
            .ok_or_else(|| CheckOutcome::failure(FailureStep::CacheNotInAccount, ErrorKind::Unknown))?;

        let info = self
            .api
            .cached_item_info(&item.id)
            .await
            .map_err(|e| classified(FailureStep::NoLinks, &e))?;
        let link = info
            .data
            .links
            .first()
            .filter(|l| !l.is_empty())
            .cloned()
            .ok_or_else(|| CheckOutcome::failure(FailureStep::NoLinks, ErrorKind::Unknown))?;

        let unrestricted = self
            .api
            .unrestrict_link(&link)
            .await
            .map_err(|e| classified(FailureStep::UnrestrictFailed, &e))?;
        if unrestricted.data.download.is_empty() {
            return Err(CheckOutcome::failure(FailureStep::UnrestrictFailed, ErrorKind::Unknown));
        }
        Ok(unrestricted.data.download)
    }

    /// URL protocol: parse the download-page identifier, find it in the
    /// downloads list, take that entry's direct URL.
    async fn resolve_by_url(&self, page_url: &str) -> Result<String, CheckOutcome> {
        let ident = parse_download_id(page_url)
            .ok_or_else(|| CheckOutcome::failure(FailureStep::DownloadNotFound, ErrorKind::Unknown))?;

        let downloads = self
            .api
            .list_downloads()
            .await
            .map_err(|e| classified(FailureStep::DownloadNotFound, &e))?;
        let entry = downloads
            .data
            .iter()
            .find(|d| {
                d.id.eq_ignore_ascii_case(&ident)
                    || d.link.ends_with(&ident)
                    || parse_download_id(&d.link).is_some_and(|i| i.eq_ignore_ascii_case(&ident))
            })
            .ok_or_else(|| CheckOutcome::failure(FailureStep::DownloadNotFound, ErrorKind::Unknown))?;

        if entry.download.is_empty() {
            return Err(CheckOutcome::failure(FailureStep::DownloadNotFound, ErrorKind::Unknown));
        }
        Ok(entry.download.clone())
    }

    async fn probe_resolved(&self, url: &str, resolution_time_ms: u64) -> CheckOutcome {
        let probe = self.prober.head_with_ttfb(url).await;
        let host = probe
            .final_host
            .clone()
            .or_else(|| host_of(url));

        if (200..400).contains(&probe.status) {
            CheckOutcome::success(
                resolution_time_ms,
                probe.ttfb_ms,
                host.unwrap_or_default(),
                probe.status,
            )
        } else {
            let kind = classify_error(Some(probe.status), probe.error.as_deref().unwrap_or_default());
            CheckOutcome::Failure(CheckFailure {
                success: false,
                error_kind: kind,
                failure_step: FailureStep::CdnProbeFailed,
                cdn_host: host,
                http_status: (probe.status != 0).then_some(probe.status),
            })
        }
    }
}

fn classified(step: FailureStep, e: &ApiError) -> CheckOutcome {
    CheckOutcome::failure(step, classify_error(e.status, &e.message))
}

/// Last non-empty path segment of a download-page URL.
fn parse_download_id(page_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(page_url).ok()?;
    let ident = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()?
        .to_string();
    if ident.is_empty() {
        None
    } else {
        Some(ident)
    }
}

fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::super::probe::{ProbeResult, Prober};
    use super::*;
    use crate::debrid::{
        ApiResponse, ApiResult, CachedItem, DownloadEntry, UnrestrictedLink, UserInfo,
    };
    use async_trait::async_trait;

    const HASH: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn ok<T>(data: T) -> ApiResult<T> {
        Ok(ApiResponse { status: 200, elapsed_ms: 5, data })
    }

    fn api_err(status: Option<u16>, message: &str) -> ApiError {
        ApiError { status, message: message.to_string(), elapsed_ms: 5 }
    }

    /// Scripted remote: each operation either answers from the script or
    /// fails with the scripted error.
    #[derive(Default)]
    struct ScriptedApi {
        cached: Option<Result<Vec<CachedItem>, ApiError>>,
        info: Option<Result<CachedItem, ApiError>>,
        downloads: Option<Result<Vec<DownloadEntry>, ApiError>>,
        unrestrict: Option<Result<UnrestrictedLink, ApiError>>,
    }

    #[async_trait]
    impl DebridApi for ScriptedApi {
        fn token_configured(&self) -> bool {
            true
        }

        async fn check_auth(&self) -> ApiResult<UserInfo> {
            ok(UserInfo {
                id: 1,
                username: "probe".into(),
                account_type: "premium".into(),
                premium: 1,
            })
        }

        async fn list_cached(&self) -> ApiResult<Vec<CachedItem>> {
            match self.cached.clone() {
                Some(Ok(v)) => ok(v),
                Some(Err(e)) => Err(e),
                None => ok(vec![]),
            }
        }

        async fn cached_item_info(&self, _id: &str) -> ApiResult<CachedItem> {
            match self.info.clone() {
                Some(Ok(v)) => ok(v),
                Some(Err(e)) => Err(e),
                None => Err(api_err(Some(404), "not found")),
            }
        }

        async fn list_downloads(&self) -> ApiResult<Vec<DownloadEntry>> {
            match self.downloads.clone() {
                Some(Ok(v)) => ok(v),
                Some(Err(e)) => Err(e),
                None => ok(vec![]),
            }
        }

        async fn unrestrict_link(&self, _link: &str) -> ApiResult<UnrestrictedLink> {
            match self.unrestrict.clone() {
                Some(Ok(v)) => ok(v),
                Some(Err(e)) => Err(e),
                None => Err(api_err(Some(404), "not found")),
            }
        }
    }

    struct FixedProber(ProbeResult);

    #[async_trait]
    impl Prober for FixedProber {
        async fn head_with_ttfb(&self, _url: &str) -> ProbeResult {
            self.0.clone()
        }
    }

    fn cached_item(hash: &str, links: Vec<String>) -> CachedItem {
        CachedItem {
            id: "abc123".into(),
            hash: hash.into(),
            filename: "show.mkv".into(),
            status: "downloaded".into(),
            links,
        }
    }

    fn checker(api: ScriptedApi, probe: ProbeResult) -> HealthChecker {
        HealthChecker::new(Arc::new(api), Arc::new(FixedProber(probe)))
    }

    fn probe_200() -> ProbeResult {
        ProbeResult {
            status: 200,
            ttfb_ms: 420,
            final_host: Some("cdn77.example.net".into()),
            error: None,
        }
    }

    fn hash_target() -> StreamTarget {
        StreamTarget { id: "tv".into(), mode: ResolveMode::ByHash(HASH.into()) }
    }

    fn url_target(url: &str) -> StreamTarget {
        StreamTarget { id: "movie".into(), mode: ResolveMode::ByUrl(url.into()) }
    }

    #[tokio::test]
    async fn hash_target_resolves_and_probes() {
        let api = ScriptedApi {
            cached: Some(Ok(vec![cached_item(&HASH.to_uppercase(), vec![])])),
            info: Some(Ok(cached_item(HASH, vec!["https://rd.example/dl/1".into()]))),
            unrestrict: Some(Ok(UnrestrictedLink {
                id: "u1".into(),
                filename: "show.mkv".into(),
                download: "https://cdn77.example.net/show.mkv".into(),
            })),
            ..Default::default()
        };
        let outcome = checker(api, probe_200()).check(&hash_target()).await;
        match outcome {
            CheckOutcome::Success(s) => {
                assert_eq!(s.time_to_first_byte_ms, 420);
                assert_eq!(s.http_status, 200);
                assert_eq!(s.cdn_host, "cdn77.example.net");
            }
            CheckOutcome::Failure(f) => panic!("expected success, got {:?}", f),
        }
    }

    #[tokio::test]
    async fn missing_hash_fails_at_cache_stage() {
        let api = ScriptedApi {
            cached: Some(Ok(vec![cached_item("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", vec![])])),
            ..Default::default()
        };
        let outcome = checker(api, probe_200()).check(&hash_target()).await;
        assert_eq!(outcome.failure_step(), Some(FailureStep::CacheNotInAccount));
    }

    #[tokio::test]
    async fn cache_list_failure_maps_to_cache_stage_with_classified_kind() {
        let api = ScriptedApi {
            cached: Some(Err(api_err(Some(503), "service unavailable"))),
            ..Default::default()
        };
        let outcome = checker(api, probe_200()).check(&hash_target()).await;
        match outcome {
            CheckOutcome::Failure(f) => {
                assert_eq!(f.failure_step, FailureStep::CacheNotInAccount);
                assert_eq!(f.error_kind, ErrorKind::ServerError);
            }
            CheckOutcome::Success(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn item_without_links_fails_at_links_stage() {
        let api = ScriptedApi {
            cached: Some(Ok(vec![cached_item(HASH, vec![])])),
            info: Some(Ok(cached_item(HASH, vec![]))),
            ..Default::default()
        };
        let outcome = checker(api, probe_200()).check(&hash_target()).await;
        assert_eq!(outcome.failure_step(), Some(FailureStep::NoLinks));
    }

    #[tokio::test]
    async fn unrestrict_rate_limit_is_classified() {
        let api = ScriptedApi {
            cached: Some(Ok(vec![cached_item(HASH, vec![])])),
            info: Some(Ok(cached_item(HASH, vec!["https://rd.example/dl/1".into()]))),
            unrestrict: Some(Err(api_err(Some(429), "too many requests"))),
            ..Default::default()
        };
        let outcome = checker(api, probe_200()).check(&hash_target()).await;
        match outcome {
            CheckOutcome::Failure(f) => {
                assert_eq!(f.failure_step, FailureStep::UnrestrictFailed);
                assert_eq!(f.error_kind, ErrorKind::RateLimit);
            }
            CheckOutcome::Success(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn url_target_matches_download_by_page_identifier() {
        let api = ScriptedApi {
            downloads: Some(Ok(vec![DownloadEntry {
                id: "DL1".into(),
                filename: "movie.mkv".into(),
                link: "https://real-debrid.com/d/ABCDEF123".into(),
                download: "https://cdn.example.org/movie.mkv".into(),
            }])),
            ..Default::default()
        };
        let outcome = checker(api, probe_200())
            .check(&url_target("https://real-debrid.com/d/ABCDEF123"))
            .await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn url_target_absent_from_downloads_fails() {
        let api = ScriptedApi {
            downloads: Some(Ok(vec![])),
            ..Default::default()
        };
        let outcome = checker(api, probe_200())
            .check(&url_target("https://real-debrid.com/d/MISSING"))
            .await;
        assert_eq!(outcome.failure_step(), Some(FailureStep::DownloadNotFound));
    }

    #[tokio::test]
    async fn unparsable_page_url_fails_without_remote_calls() {
        let outcome = checker(ScriptedApi::default(), probe_200())
            .check(&url_target("not a url"))
            .await;
        assert_eq!(outcome.failure_step(), Some(FailureStep::DownloadNotFound));
    }

    #[tokio::test]
    async fn probe_4xx_fails_at_probe_stage_with_host() {
        let api = ScriptedApi {
            cached: Some(Ok(vec![cached_item(HASH, vec![])])),
            info: Some(Ok(cached_item(HASH, vec!["https://rd.example/dl/1".into()]))),
            unrestrict: Some(Ok(UnrestrictedLink {
                id: "u1".into(),
                filename: "f".into(),
                download: "https://cdn.example.org/f.mkv".into(),
            })),
            ..Default::default()
        };
        let probe = ProbeResult {
            status: 429,
            ttfb_ms: 50,
            final_host: Some("edge.example.org".into()),
            error: None,
        };
        let outcome = checker(api, probe).check(&hash_target()).await;
        match outcome {
            CheckOutcome::Failure(f) => {
                assert_eq!(f.failure_step, FailureStep::CdnProbeFailed);
                assert_eq!(f.error_kind, ErrorKind::RateLimit);
                assert_eq!(f.cdn_host.as_deref(), Some("edge.example.org"));
                assert_eq!(f.http_status, Some(429));
            }
            CheckOutcome::Success(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn probe_network_failure_is_timeout_at_status_zero() {
        let api = ScriptedApi {
            cached: Some(Ok(vec![cached_item(HASH, vec![])])),
            info: Some(Ok(cached_item(HASH, vec!["https://rd.example/dl/1".into()]))),
            unrestrict: Some(Ok(UnrestrictedLink {
                id: "u1".into(),
                filename: "f".into(),
                download: "https://cdn.example.org/f.mkv".into(),
            })),
            ..Default::default()
        };
        let probe = ProbeResult { status: 0, ttfb_ms: 15000, final_host: None, error: None };
        let outcome = checker(api, probe).check(&hash_target()).await;
        match outcome {
            CheckOutcome::Failure(f) => {
                assert_eq!(f.failure_step, FailureStep::CdnProbeFailed);
                assert_eq!(f.error_kind, ErrorKind::Timeout);
                assert_eq!(f.http_status, None);
                // Falls back to the hostname of the resolved URL.
                assert_eq!(f.cdn_host.as_deref(), Some("cdn.example.org"));
            }
            CheckOutcome::Success(_) => panic!("expected failure"),
        }
    }
}
