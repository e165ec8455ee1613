//! Periodic orchestration of change-detection runs.
//!
//! - [`ActiveWindow`]: local-hour range in which scheduled runs may execute
//! - [`RunGate`]: guarantees at most one run at a time and publishes status
//! - [`Scheduler`]: fixed-interval timer loop driving the gate
//! - [`initialize_store`]: startup schema creation under the retry policy
//!
//! # States
//!
//! ```text
//! Idle ──tick, window open──► Running ──► Idle
//!   └──tick, window closed──► Idle (timer re-armed)
//! ```
//!
//! Runs execute in their own task holding the gate's owned lock, so a panic
//! or error in one run never reaches the timer loop, and a dropped manual
//! trigger cannot release the gate while its run is still going.

use chrono::{DateTime, Local, NaiveTime, Timelike, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::engine::{ChangeDetector, RunReport};
use crate::error::{StoreError, TriggerError};
use crate::outputs::NotifyOutcome;
use crate::retry::RetryPolicy;
use crate::store::RecordStore;

/// Local wall-clock hours during which scheduled runs are allowed.
///
/// `start <= hour < end`. When `start > end` the window wraps midnight; when
/// they are equal it is always open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl ActiveWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour: start_hour % 24,
            end_hour: end_hour % 24,
        }
    }

    #[cfg(test)]
    pub fn always() -> Self {
        Self::new(0, 0)
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        let (start, end) = (self.start_hour, self.end_hour);
        if start == end {
            true
        } else if start < end {
            start <= hour && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    pub fn is_open_at(&self, time: NaiveTime) -> bool {
        self.contains_hour(time.hour())
    }
}

/// Summary of the most recent run.
#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
    pub entries_seen: usize,
    pub new_items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotifyOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot readable without waiting on a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub ticks_skipped: u64,
    pub last_run: Option<LastRun>,
}

/// Serializes runs coming from the timer and from manual triggers.
pub struct RunGate {
    detector: Arc<ChangeDetector>,
    lock: Arc<Mutex<()>>,
    status: RwLock<SchedulerStatus>,
}

impl RunGate {
    pub fn new(detector: Arc<ChangeDetector>) -> Arc<Self> {
        Arc::new(Self {
            detector,
            lock: Arc::new(Mutex::new(())),
            status: RwLock::new(SchedulerStatus::default()),
        })
    }

    pub fn detector(&self) -> &Arc<ChangeDetector> {
        &self.detector
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update_status(&self, f: impl FnOnce(&mut SchedulerStatus)) {
        let mut status = self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut status);
    }

    fn note_skipped_tick(&self) {
        self.update_status(|s| s.ticks_skipped += 1);
    }

    /// Run now, waiting for any in-progress run to finish first.
    ///
    /// # Errors
    ///
    /// [`TriggerError::Run`] when the run itself failed, or
    /// [`TriggerError::Aborted`] when its task panicked.
    pub async fn run_exclusive(self: &Arc<Self>) -> Result<RunReport, TriggerError> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        self.execute(guard).await
    }

    /// Run now unless a run is already in progress.
    ///
    /// # Errors
    ///
    /// [`TriggerError::Busy`] without side effects when the gate is held;
    /// otherwise as [`RunGate::run_exclusive`].
    pub async fn try_run(self: &Arc<Self>) -> Result<RunReport, TriggerError> {
        let guard = Arc::clone(&self.lock)
            .try_lock_owned()
            .map_err(|_| TriggerError::Busy)?;
        self.execute(guard).await
    }

    async fn execute(self: &Arc<Self>, guard: OwnedMutexGuard<()>) -> Result<RunReport, TriggerError> {
        self.update_status(|s| {
            s.running = true;
            s.runs_started += 1;
        });

        let gate = Arc::clone(self);
        let task = tokio::spawn(async move {
            let started_at = Utc::now();
            let result = gate.detector.run().await;
            gate.record_result(started_at, result.as_ref().map_err(|e| e.to_string()));
            drop(guard);
            result.map_err(TriggerError::from)
        });

        match task.await {
            Ok(result) => result,
            Err(join_err) => {
                // The task died before recording anything.
                let reason = join_err.to_string();
                error!(error = %reason, "Run task aborted");
                let now = Utc::now();
                self.record_result(now, Err(reason.clone()));
                Err(TriggerError::Aborted(reason))
            }
        }
    }

    fn record_result(&self, started_at: DateTime<Utc>, result: Result<&RunReport, String>) {
        let last = match result {
            Ok(report) => LastRun {
                started_at: report.started_at,
                finished_at: report.finished_at,
                succeeded: true,
                entries_seen: report.entries_seen,
                new_items: report.new_items.len(),
                notification: Some(report.notification.clone()),
                error: None,
            },
            Err(reason) => LastRun {
                started_at,
                finished_at: Utc::now(),
                succeeded: false,
                entries_seen: 0,
                new_items: 0,
                notification: None,
                error: Some(reason),
            },
        };
        self.update_status(|s| {
            s.running = false;
            if last.succeeded {
                s.runs_completed += 1;
            } else {
                s.runs_failed += 1;
            }
            s.last_run = Some(last);
        });
    }
}

/// What a single timer tick did.
#[derive(Debug)]
pub enum TickOutcome {
    OutsideWindow,
    Ran(RunReport),
    Failed(TriggerError),
}

/// Fixed-interval driver for scheduled runs.
pub struct Scheduler {
    gate: Arc<RunGate>,
    interval: Duration,
    window: ActiveWindow,
}

impl Scheduler {
    /// Create a scheduler over a shared gate.
    ///
    /// # Arguments
    ///
    /// * `gate` - Gate shared with the manual trigger, so the two never overlap
    /// * `interval` - Time between ticks; clamped to at least one millisecond
    /// * `window` - Local hours in which a tick may start a run
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let scheduler = Scheduler::new(gate, Duration::from_secs(15 * 60), ActiveWindow::new(9, 18));
    /// scheduler.run_until(shutdown_rx).await;
    /// ```
    pub fn new(gate: Arc<RunGate>, interval: Duration, window: ActiveWindow) -> Self {
        Self {
            gate,
            interval: interval.max(Duration::from_millis(1)),
            window,
        }
    }

    /// Tick on the fixed interval until `shutdown` turns true or its sender
    /// goes away. The first tick fires immediately.
    ///
    /// A run in progress is finished before shutdown is observed. When both
    /// a tick and shutdown are ready, shutdown wins.
    #[instrument(level = "info", skip_all, fields(interval_secs = self.interval.as_secs()))]
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            start_hour = self.window.start_hour,
            end_hour = self.window.end_hour,
            "Scheduler started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.tick_at(Local::now().time()).await {
                        TickOutcome::OutsideWindow => {}
                        TickOutcome::Ran(report) => {
                            info!(new = report.new_items.len(), "Completed scheduled check");
                        }
                        TickOutcome::Failed(e) => {
                            warn!(error = %e, "Scheduled check failed");
                        }
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }

    /// One tick evaluated against the given local time.
    pub async fn tick_at(&self, now: NaiveTime) -> TickOutcome {
        if !self.window.is_open_at(now) {
            info!(%now, "Outside active window, skipping check");
            self.gate.note_skipped_tick();
            return TickOutcome::OutsideWindow;
        }

        info!("Starting scheduled check");
        match self.gate.run_exclusive().await {
            Ok(report) => TickOutcome::Ran(report),
            Err(e) => TickOutcome::Failed(e),
        }
    }
}

/// Create the store schema, retrying per `policy`. Exhaustion returns the
/// last error; callers treat it as fatal.
pub async fn initialize_store(
    store: &dyn RecordStore,
    policy: &RetryPolicy,
) -> Result<(), StoreError> {
    info!(
        max_attempts = policy.max_attempts,
        delay_ms = policy.delay.as_millis() as u64,
        "Initializing record store"
    );
    policy.retry("store.initialize", || store.initialize()).await
}
