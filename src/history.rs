//! Append-only check history with bounded retention.
//!
//! One JSON object per line in a single file. Appends load, prune, and
//! atomically rewrite; a missing or corrupt file is treated as empty
//! history, never as a fatal condition.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::checker::CheckOutcome;

/// Records older than this are dropped on every write (and filtered on
/// every read).
pub const RETENTION_DAYS: i64 = 7;

/// Outcome of probing the remote service's own auth endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealthOutcome {
    pub success: bool,
    pub response_time_ms: u64,
    pub http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One completed check cycle. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_health: Option<ApiHealthOutcome>,
    /// Keyed by target id; BTreeMap keeps assembly deterministic by
    /// identifier rather than completion order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streams: Option<BTreeMap<String, CheckOutcome>>,
}

/// Durable JSONL store. Cloning shares the same file and write lock, so
/// the scheduled cycle and the on-demand check-now path serialize their
/// read-modify-write appends against each other.
#[derive(Clone)]
pub struct HistoryStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Append one record, dropping everything older than the retention
    /// window, and rewrite the file atomically.
    pub async fn append(&self, record: HistoryRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load();
        records.push(record);
        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
        records.retain(|r| r.timestamp >= cutoff);
        self.rewrite(&records)
    }

    /// All retained records in insertion order. Prunes on read without
    /// persisting, so stale records never leak past the window even when
    /// no write has happened recently.
    pub fn read_all(&self) -> Vec<HistoryRecord> {
        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
        self.load()
            .into_iter()
            .filter(|r| r.timestamp >= cutoff)
            .collect()
    }

    fn load(&self) -> Vec<HistoryRecord> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        let mut records = Vec::new();
        let mut skipped = 0usize;
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(line) {
                Ok(r) => records.push(r),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(path = %self.path.display(), skipped, "skipped corrupt history lines");
        }
        records
    }

    fn rewrite(&self, records: &[HistoryRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let mut buf = String::new();
        for r in records {
            buf.push_str(&serde_json::to_string(r)?);
            buf.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &buf)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{CheckOutcome, ErrorKind, FailureStep};

    fn record_at(ts: DateTime<Utc>) -> HistoryRecord {
        HistoryRecord {
            timestamp: ts,
            api_health: Some(ApiHealthOutcome {
                success: true,
                response_time_ms: 80,
                http_status: 200,
                error: None,
            }),
            streams: None,
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> HistoryStore {
        HistoryStore::new(dir.path().join("history.jsonl"))
    }

    #[tokio::test]
    async fn append_then_read_returns_the_record_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.append(record_at(Utc::now() - Duration::hours(1))).await.unwrap();
        let latest = record_at(Utc::now());
        store.append(latest.clone()).await.unwrap();

        let all = store.read_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all.last(), Some(&latest));
    }

    #[tokio::test]
    async fn append_prunes_expired_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.append(record_at(Utc::now() - Duration::days(8))).await.unwrap();
        store.append(record_at(Utc::now() - Duration::days(6))).await.unwrap();
        store.append(record_at(Utc::now())).await.unwrap();

        let all = store.read_all();
        assert_eq!(all.len(), 2);
        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
        assert!(all.iter().all(|r| r.timestamp >= cutoff));
    }

    #[tokio::test]
    async fn read_prunes_without_rewriting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let old = record_at(Utc::now() - Duration::days(9));
        let fresh = record_at(Utc::now());
        let contents = format!(
            "{}\n{}\n",
            serde_json::to_string(&old).unwrap(),
            serde_json::to_string(&fresh).unwrap()
        );
        std::fs::write(&path, &contents).unwrap();

        let store = HistoryStore::new(&path);
        assert_eq!(store.read_all().len(), 1);
        // File untouched: the stale line is still on disk.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), contents);
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped_and_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.read_all().is_empty());

        let path = dir.path().join("history.jsonl");
        let good = record_at(Utc::now());
        std::fs::write(
            &path,
            format!("not json at all\n{}\n{{\"half\":", serde_json::to_string(&good).unwrap()),
        )
        .unwrap();
        let all = store.read_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], good);
    }

    #[tokio::test]
    async fn stream_outcomes_roundtrip_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut streams = BTreeMap::new();
        streams.insert("tv".to_string(), CheckOutcome::success(10, 420, "cdn.example".into(), 200));
        streams.insert(
            "movie".to_string(),
            CheckOutcome::failure(FailureStep::DownloadNotFound, ErrorKind::Unknown),
        );
        let record = HistoryRecord {
            timestamp: Utc::now(),
            api_health: None,
            streams: Some(streams),
        };
        store.append(record.clone()).await.unwrap();

        let all = store.read_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], record);
        let keys: Vec<_> = all[0].streams.as_ref().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["movie".to_string(), "tv".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_appends_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(record_at(Utc::now())).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.read_all().len(), 8);
    }
}
