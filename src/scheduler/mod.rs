//! Check cycle scheduling -- drives the periodic health checks.

pub mod engine;

pub use engine::CycleEngine;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Process-lifetime scheduler state. Single writer (the engine after each
/// cycle); collaborators only ever see cloned snapshots.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    pub start_time: DateTime<Utc>,
    pub last_run_timestamp: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            start_time: Utc::now(),
            last_run_timestamp: None,
            last_error_message: None,
        }
    }
}

/// Engine lifecycle phase. `Running` only while a cycle is actually in
/// flight; between cycles the engine sits in `Idle` waiting on the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopping,
}
