//! The cycle engine: single-flight check cycles at a reloadable cadence.
//!
//! One background task owns the loop. A cycle is never abandoned mid-flight:
//! `stop` cancels the pending timer and then polls until any running cycle
//! has finished and appended its record.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{Phase, SchedulerState};
use crate::checker::probe::Prober;
use crate::checker::{CheckOutcome, ErrorKind, FailureStep, HealthChecker};
use crate::config::{Config, StreamTarget};
use crate::debrid::DebridApi;
use crate::history::{ApiHealthOutcome, HistoryRecord, HistoryStore};

const STOP_POLL: Duration = Duration::from_millis(100);
const FALLBACK_INTERVAL: Duration = Duration::from_secs(300);

/// Cheap-to-clone handle; all clones share the same engine.
#[derive(Clone)]
pub struct CycleEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config_path: PathBuf,
    store: HistoryStore,
    api: Arc<dyn DebridApi>,
    checker: HealthChecker,
    phase: Mutex<Phase>,
    state: Mutex<SchedulerState>,
    started: AtomicBool,
    in_flight: AtomicBool,
    stop_signal: Notify,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CycleEngine {
    pub fn new(
        config_path: impl Into<PathBuf>,
        store: HistoryStore,
        api: Arc<dyn DebridApi>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        let checker = HealthChecker::new(api.clone(), prober);
        Self {
            inner: Arc::new(Inner {
                config_path: config_path.into(),
                store,
                api,
                checker,
                phase: Mutex::new(Phase::Idle),
                state: Mutex::new(SchedulerState::new()),
                started: AtomicBool::new(false),
                in_flight: AtomicBool::new(false),
                stop_signal: Notify::new(),
            }),
        }
    }

    /// Snapshot of the scheduler state for read-only collaborators.
    pub fn state(&self) -> SchedulerState {
        lock(&self.inner.state).clone()
    }

    pub fn store(&self) -> &HistoryStore {
        &self.inner.store
    }

    /// Begin the check loop. Valid once, from idle; the first cycle runs
    /// immediately with no initial delay.
    pub fn start(&self) -> Result<()> {
        if *lock(&self.inner.phase) == Phase::Stopping {
            bail!("cycle engine is stopping");
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            bail!("cycle engine already started");
        }
        let engine = self.clone();
        tokio::spawn(async move { engine.run_loop().await });
        Ok(())
    }

    /// Stop the loop. Cancels the pending timer immediately, then waits for
    /// any in-flight cycle to finish and append its record.
    pub async fn stop(&self) {
        *lock(&self.inner.phase) = Phase::Stopping;
        self.inner.stop_signal.notify_waiters();
        while self.inner.in_flight.load(Ordering::SeqCst) {
            tokio::time::sleep(STOP_POLL).await;
        }
        info!("cycle engine stopped");
    }

    /// Run one cycle in the foreground (CLI `check`). Fails rather than
    /// overlapping with a cycle already in flight.
    pub async fn run_once(&self) -> Result<Option<HistoryRecord>> {
        if self.inner.in_flight.swap(true, Ordering::SeqCst) {
            bail!("a check cycle is already in flight");
        }
        self.set_phase_running();
        let result = self.run_cycle().await;
        self.record_result(&result);
        self.set_phase_idle();
        self.inner.in_flight.store(false, Ordering::SeqCst);
        result
    }

    /// On-demand API health probe: probes the auth endpoint and appends an
    /// api-only record. Returns `Ok(None)` without appending when no token
    /// is configured, like the scheduled path. Serialized against scheduled
    /// appends by the store's write lock.
    pub async fn run_one_off_api_check(&self) -> Result<Option<ApiHealthOutcome>> {
        if !self.inner.api.token_configured() {
            warn!("check-now skipped: no api token configured");
            return Ok(None);
        }
        let outcome = self.api_health_probe().await;
        let record = HistoryRecord {
            timestamp: Utc::now(),
            api_health: Some(outcome.clone()),
            streams: None,
        };
        self.inner.store.append(record).await?;
        Ok(Some(outcome))
    }

    async fn run_loop(&self) {
        info!(config = %self.inner.config_path.display(), "cycle engine started");
        loop {
            if self.stopping() {
                break;
            }
            self.run_cycle_guarded().await;
            if self.stopping() {
                break;
            }
            // Interval is re-read here, so a config change takes effect on
            // the next scheduled cycle, never the in-flight one.
            let interval = self.next_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.inner.stop_signal.notified() => break,
            }
        }
        info!("cycle engine loop exited");
    }

    fn stopping(&self) -> bool {
        *lock(&self.inner.phase) == Phase::Stopping
    }

    fn set_phase_running(&self) {
        let mut phase = lock(&self.inner.phase);
        if *phase == Phase::Idle {
            *phase = Phase::Running;
        }
    }

    fn set_phase_idle(&self) {
        let mut phase = lock(&self.inner.phase);
        if *phase == Phase::Running {
            *phase = Phase::Idle;
        }
    }

    fn next_interval(&self) -> Duration {
        match Config::load(&self.inner.config_path) {
            Ok(cfg) => Duration::from_secs(cfg.interval_seconds),
            Err(e) => {
                warn!(error = %e, "failed to re-read config, keeping fallback interval");
                FALLBACK_INTERVAL
            }
        }
    }

    /// Single-flight wrapper: a timer firing while a cycle is still running
    /// is coalesced, never a second concurrent cycle.
    async fn run_cycle_guarded(&self) {
        if self.inner.in_flight.swap(true, Ordering::SeqCst) {
            return;
        }
        // stop() may have flipped the phase between the loop's check and
        // the swap above; it saw in_flight clear and already resolved, so
        // a cycle started now would outlive the shutdown wait.
        if self.stopping() {
            self.inner.in_flight.store(false, Ordering::SeqCst);
            return;
        }
        self.set_phase_running();
        let result = self.run_cycle().await;
        self.record_result(&result);
        self.set_phase_idle();
        self.inner.in_flight.store(false, Ordering::SeqCst);
    }

    /// Cycle-boundary state update: success clears the error, failure sets
    /// it. Nothing propagates past here from the loop.
    fn record_result(&self, result: &Result<Option<HistoryRecord>>) {
        let mut state = lock(&self.inner.state);
        match result {
            Ok(record) => {
                if let Some(r) = record {
                    state.last_run_timestamp = Some(r.timestamp);
                }
                state.last_error_message = None;
            }
            Err(e) => {
                error!(error = %e, "check cycle failed");
                state.last_error_message = Some(e.to_string());
            }
        }
    }

    /// One full cycle: API health probe plus every configured target, in
    /// configured order. Returns `Ok(None)` when there was nothing to check.
    async fn run_cycle(&self) -> Result<Option<HistoryRecord>> {
        let cycle = Uuid::new_v4();
        let cfg = Config::load(&self.inner.config_path)?;
        let have_token = self.inner.api.token_configured();
        let timestamp = Utc::now();

        let api_health = if cfg.api_check_enabled && have_token {
            Some(self.api_health_probe().await)
        } else {
            None
        };

        let streams = if !cfg.streams.is_empty() && have_token {
            let mut map = BTreeMap::new();
            for target in &cfg.streams {
                let outcome = self.run_target_guarded(target).await;
                if let CheckOutcome::Failure(f) = &outcome {
                    warn!(
                        cycle = %cycle,
                        target = %target.id,
                        stage = %f.failure_step,
                        kind = ?f.error_kind,
                        "stream check failed"
                    );
                }
                map.insert(target.id.clone(), outcome);
            }
            Some(map)
        } else {
            None
        };

        if api_health.is_none() && streams.is_none() {
            warn!(cycle = %cycle, "nothing to check: no token or all checks disabled");
            return Ok(None);
        }

        let record = HistoryRecord { timestamp, api_health, streams };
        self.inner.store.append(record.clone()).await?;

        let (ok, failed) = match &record.streams {
            Some(map) => {
                let ok = map.values().filter(|o| o.is_success()).count();
                (ok, map.len() - ok)
            }
            None => (0, 0),
        };
        let failures = record.streams.as_ref().map(summarize_failures).unwrap_or_default();
        info!(
            cycle = %cycle,
            streams_ok = ok,
            streams_failed = failed,
            failures = %failures,
            api_ok = ?record.api_health.as_ref().map(|a| a.success),
            "check cycle complete"
        );
        Ok(Some(record))
    }

    /// Per-target failure isolation: even a panicking check yields an
    /// unknown-classified failure entry instead of aborting the cycle.
    async fn run_target_guarded(&self, target: &StreamTarget) -> CheckOutcome {
        let checker = self.inner.checker.clone();
        let t = target.clone();
        match tokio::spawn(async move { checker.check(&t).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(target = %target.id, error = %e, "stream check aborted unexpectedly");
                CheckOutcome::failure(FailureStep::CdnProbeFailed, ErrorKind::Unknown)
            }
        }
    }

    async fn api_health_probe(&self) -> ApiHealthOutcome {
        match self.inner.api.check_auth().await {
            Ok(resp) => ApiHealthOutcome {
                success: true,
                response_time_ms: resp.elapsed_ms,
                http_status: resp.status,
                error: None,
            },
            Err(e) => ApiHealthOutcome {
                success: false,
                response_time_ms: e.elapsed_ms,
                http_status: e.status.unwrap_or(0),
                error: Some(e.message),
            },
        }
    }
}

/// One `target: human-readable stage` entry per failed stream, for the
/// cycle summary line.
fn summarize_failures(streams: &BTreeMap<String, CheckOutcome>) -> String {
    streams
        .iter()
        .filter_map(|(id, outcome)| match outcome {
            CheckOutcome::Failure(f) => Some(format!("{id}: {}", f.failure_step)),
            CheckOutcome::Success(_) => None,
        })
        .collect::<Vec<_>>()
        .join("; ")
}
