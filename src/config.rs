//! Configuration loading -- TOML file plus environment overrides.
//!
//! The config file is re-read by the scheduler at every scheduling decision,
//! so interval, target list, and the api-check flag can be changed without a
//! restart. The auth token is read once at startup (client construction).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Environment variable that overrides `api_token` from the config file.
pub const TOKEN_ENV: &str = "STREAMPULSE_API_TOKEN";

/// How a stream target is resolved to a directly fetchable URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveMode {
    /// 40-char content hash looked up in the account's cached items.
    ByHash(String),
    /// Download-page URL matched against the account's downloads list.
    ByUrl(String),
}

/// One configured logical stream to health-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub id: String,
    pub mode: ResolveMode,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    id: String,
    hash: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_interval")]
    interval_seconds: u64,
    #[serde(default = "default_true")]
    api_check_enabled: bool,
    #[serde(default = "default_history_path")]
    history_path: String,
    #[serde(default = "default_base_url")]
    api_base_url: String,
    api_token: Option<String>,
    #[serde(default)]
    streams: Vec<RawTarget>,
}

fn default_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_history_path() -> String {
    "data/history.jsonl".to_string()
}

fn default_base_url() -> String {
    "https://api.real-debrid.com/rest/1.0".to_string()
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub interval_seconds: u64,
    pub api_check_enabled: bool,
    pub history_path: String,
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub streams: Vec<StreamTarget>,
}

impl Config {
    /// Load and validate configuration from a TOML file.
    ///
    /// A missing file is an error; a missing token is not (checks that need
    /// it are skipped at cycle time).
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))?;

        let mut seen = HashSet::new();
        let mut streams = Vec::with_capacity(raw.streams.len());
        for t in raw.streams {
            if !seen.insert(t.id.clone()) {
                bail!("duplicate stream id '{}'", t.id);
            }
            streams.push(validate_target(t)?);
        }

        // Env var wins over the file so tokens can stay out of committed config.
        let api_token = std::env::var(TOKEN_ENV).ok().or(raw.api_token);

        if raw.interval_seconds == 0 {
            bail!("interval_seconds must be at least 1");
        }

        Ok(Config {
            interval_seconds: raw.interval_seconds,
            api_check_enabled: raw.api_check_enabled,
            history_path: raw.history_path,
            api_base_url: raw.api_base_url,
            api_token,
            streams,
        })
    }
}

fn validate_target(raw: RawTarget) -> Result<StreamTarget> {
    if raw.id.trim().is_empty() {
        bail!("stream target with empty id");
    }
    let mode = match (raw.hash, raw.url) {
        (Some(hash), None) => {
            if hash.len() != 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                bail!("stream '{}': hash must be 40 hex characters", raw.id);
            }
            ResolveMode::ByHash(hash)
        }
        (None, Some(url)) => ResolveMode::ByUrl(url),
        (Some(_), Some(_)) => bail!("stream '{}': set either hash or url, not both", raw.id),
        (None, None) => bail!("stream '{}': one of hash or url is required", raw.id),
    };
    Ok(StreamTarget { id: raw.id, mode })
}
