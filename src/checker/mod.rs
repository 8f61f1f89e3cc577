//! Health checking -- failure taxonomy, outcome types, and classification.
//!
//! The resolver turns a configured target into a direct URL and the probe
//! measures delivery against it; both live in submodules. Everything here is
//! infallible from the caller's point of view: a check produces a
//! `CheckOutcome`, never an error.

pub mod probe;
mod resolve;

pub use resolve::HealthChecker;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport-level failure classification. Applied uniformly no matter
/// which resolution stage produced the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    RateLimit,
    Forbidden,
    ServerError,
    Timeout,
    Network,
    Unknown,
}

/// The stage at which resolution or probing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureStep {
    CacheNotInAccount,
    NoLinks,
    UnrestrictFailed,
    DownloadNotFound,
    CdnProbeFailed,
}

impl fmt::Display for FailureStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStep::CacheNotInAccount => "content hash not in account cache",
            FailureStep::NoLinks => "cached item has no retrievable links",
            FailureStep::UnrestrictFailed => "link could not be unrestricted",
            FailureStep::DownloadNotFound => "download entry not found",
            FailureStep::CdnProbeFailed => "CDN probe failed",
        };
        f.write_str(s)
    }
}

/// Classify a failure from its HTTP status and/or error message.
/// Status takes precedence; status 0 means no HTTP response arrived.
pub fn classify_error(status: Option<u16>, message: &str) -> ErrorKind {
    match status {
        Some(429) => return ErrorKind::RateLimit,
        Some(403) => return ErrorKind::Forbidden,
        Some(s) if s >= 500 => return ErrorKind::ServerError,
        Some(0) => return ErrorKind::Timeout,
        _ => {}
    }
    let m = message.to_ascii_lowercase();
    if m.contains("timeout") || m.contains("timed out") {
        ErrorKind::Timeout
    } else if m.contains("network")
        || m.contains("connection")
        || m.contains("connect")
        || m.contains("dns")
        || m.contains("reset")
        || m.contains("refused")
    {
        ErrorKind::Network
    } else {
        ErrorKind::Unknown
    }
}

/// Successful check: resolution and probe timings plus where delivery
/// actually came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSuccess {
    pub success: bool,
    pub resolution_time_ms: u64,
    pub time_to_first_byte_ms: u64,
    pub cdn_host: String,
    pub http_status: u16,
}

/// Failed check: the stage that failed and the transport classification.
/// `cdn_host`/`http_status` are present only when the probe got far enough
/// to observe them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFailure {
    pub success: bool,
    pub error_kind: ErrorKind,
    pub failure_step: FailureStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdn_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

/// Per-target, per-cycle result. Success fields and failure fields can
/// never coexist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckOutcome {
    Success(CheckSuccess),
    Failure(CheckFailure),
}

impl CheckOutcome {
    pub fn success(
        resolution_time_ms: u64,
        time_to_first_byte_ms: u64,
        cdn_host: String,
        http_status: u16,
    ) -> Self {
        CheckOutcome::Success(CheckSuccess {
            success: true,
            resolution_time_ms,
            time_to_first_byte_ms,
            cdn_host,
            http_status,
        })
    }

    pub fn failure(step: FailureStep, kind: ErrorKind) -> Self {
        CheckOutcome::Failure(CheckFailure {
            success: false,
            error_kind: kind,
            failure_step: step,
            cdn_host: None,
            http_status: None,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CheckOutcome::Success(_))
    }

    pub fn failure_step(&self) -> Option<FailureStep> {
        match self {
            CheckOutcome::Success(_) => None,
            CheckOutcome::Failure(f) => Some(f.failure_step),
        }
    }
}
