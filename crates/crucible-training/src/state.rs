//! Shared run state observed by the status surface while a worker trains.
//!
//! A single writer (the orchestrator thread and the progress tracker it owns)
//! mutates the record; any other thread may take a best-effort snapshot at any
//! time. Scalar fields are atomics, string and payload fields sit behind
//! short-lived mutexes, so a reader never blocks the worker for long and never
//! needs multi-field consistency.

use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Maximum number of retained log lines; older lines are evicted first.
pub const LOG_CAPACITY: usize = 100;

/// Lifecycle status of the training engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum RunStatus {
    /// No run active; initial state and the target of a reset.
    Idle,
    /// Dataset files are being received by the host application.
    Uploading,
    /// A background worker is executing the training lifecycle.
    Training,
    /// The run completed normally.
    Finished,
    /// The run aborted with an error.
    Error,
    /// The run was stopped cooperatively by the user.
    Interrupted,
}

impl RunStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Uploading,
            2 => Self::Training,
            3 => Self::Finished,
            4 => Self::Error,
            5 => Self::Interrupted,
            _ => Self::Idle,
        }
    }

    /// True for states that end a run (reset is required to leave them).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Interrupted)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Uploading => "UPLOADING",
            Self::Training => "TRAINING",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
            Self::Interrupted => "INTERRUPTED",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct StateInner {
    status: AtomicU8,
    /// Percentage in [0, 100], stored as f64 bits. Writes keep the maximum so
    /// progress never moves backwards within a run.
    progress: AtomicU64,
    stop: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    duration: Mutex<String>,
    etr: Mutex<String>,
    logs: Mutex<VecDeque<String>>,
    output_archive: Mutex<Option<PathBuf>>,
    error_msg: Mutex<Option<String>>,
    val_metrics: Mutex<Option<BTreeMap<String, f64>>>,
}

/// Handle to the one-per-process run state. Cheap to clone; all clones share
/// the same record.
#[derive(Debug, Clone)]
pub struct SharedRunState {
    inner: Arc<StateInner>,
}

impl Default for SharedRunState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedRunState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StateInner {
                status: AtomicU8::new(RunStatus::Idle as u8),
                progress: AtomicU64::new(0f64.to_bits()),
                stop: AtomicBool::new(false),
                started_at: Mutex::new(None),
                duration: Mutex::new("00:00".to_string()),
                etr: Mutex::new("--:--".to_string()),
                logs: Mutex::new(VecDeque::new()),
                output_archive: Mutex::new(None),
                error_msg: Mutex::new(None),
                val_metrics: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> RunStatus {
        RunStatus::from_u8(self.inner.status.load(Ordering::SeqCst))
    }

    pub(crate) fn set_status(&self, status: RunStatus) {
        self.inner.status.store(status as u8, Ordering::SeqCst);
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.inner.progress.load(Ordering::SeqCst))
    }

    /// Records progress, keeping the running maximum.
    pub(crate) fn set_progress(&self, value: f64) {
        let clamped = value.clamp(0.0, 100.0);
        let _ = self
            .inner
            .progress
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                let current = f64::from_bits(bits);
                if clamped > current { Some(clamped.to_bits()) } else { None }
            });
    }

    /// Admits a new run. Fails while another run is training; from any other
    /// state the record is cleared and the status moves to `Training`.
    pub fn begin_run(&self) -> TrainingResult<()> {
        let mut current = self.inner.status.load(Ordering::SeqCst);
        loop {
            if current == RunStatus::Training as u8 {
                return Err(TrainingError::RunInProgress);
            }
            match self.inner.status.compare_exchange(
                current,
                RunStatus::Training as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.inner.progress.store(0f64.to_bits(), Ordering::SeqCst);
        self.inner.stop.store(false, Ordering::SeqCst);
        if let Ok(mut started) = self.inner.started_at.lock() {
            *started = Some(Utc::now());
        }
        if let Ok(mut duration) = self.inner.duration.lock() {
            *duration = "00:00".to_string();
        }
        if let Ok(mut etr) = self.inner.etr.lock() {
            *etr = "--:--".to_string();
        }
        if let Ok(mut logs) = self.inner.logs.lock() {
            logs.clear();
        }
        if let Ok(mut archive) = self.inner.output_archive.lock() {
            *archive = None;
        }
        if let Ok(mut error) = self.inner.error_msg.lock() {
            *error = None;
        }
        if let Ok(mut metrics) = self.inner.val_metrics.lock() {
            *metrics = None;
        }
        Ok(())
    }

    /// Requests cooperative cancellation. Only meaningful while training;
    /// otherwise a no-op that returns false. The worker reacts at the next
    /// step boundary, so cancellation latency is bounded by one step.
    pub fn request_stop(&self) -> bool {
        if self.status() != RunStatus::Training {
            return false;
        }
        self.inner.stop.store(true, Ordering::SeqCst);
        true
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    /// Returns a terminal run to `Idle`, clearing all per-run fields.
    /// Refused (returns false) while a run is training.
    pub fn reset(&self) -> bool {
        if self.status() == RunStatus::Training {
            return false;
        }
        self.set_status(RunStatus::Idle);
        self.inner.progress.store(0f64.to_bits(), Ordering::SeqCst);
        self.inner.stop.store(false, Ordering::SeqCst);
        if let Ok(mut started) = self.inner.started_at.lock() {
            *started = None;
        }
        if let Ok(mut duration) = self.inner.duration.lock() {
            *duration = "00:00".to_string();
        }
        if let Ok(mut etr) = self.inner.etr.lock() {
            *etr = "--:--".to_string();
        }
        if let Ok(mut logs) = self.inner.logs.lock() {
            logs.clear();
        }
        if let Ok(mut archive) = self.inner.output_archive.lock() {
            *archive = None;
        }
        if let Ok(mut error) = self.inner.error_msg.lock() {
            *error = None;
        }
        if let Ok(mut metrics) = self.inner.val_metrics.lock() {
            *metrics = None;
        }
        true
    }

    /// Appends a line to the bounded log ring, evicting the oldest line once
    /// the ring holds [`LOG_CAPACITY`] entries.
    pub(crate) fn push_log(&self, line: impl Into<String>) {
        if let Ok(mut logs) = self.inner.logs.lock() {
            if logs.len() >= LOG_CAPACITY {
                logs.pop_front();
            }
            logs.push_back(line.into());
        }
    }

    pub(crate) fn set_duration(&self, value: String) {
        if let Ok(mut duration) = self.inner.duration.lock() {
            *duration = value;
        }
    }

    pub(crate) fn set_etr(&self, value: String) {
        if let Ok(mut etr) = self.inner.etr.lock() {
            *etr = value;
        }
    }

    pub(crate) fn set_output_archive(&self, path: PathBuf) {
        if let Ok(mut archive) = self.inner.output_archive.lock() {
            *archive = Some(path);
        }
    }

    pub(crate) fn set_error_msg(&self, message: String) {
        if let Ok(mut error) = self.inner.error_msg.lock() {
            *error = Some(message);
        }
    }

    pub(crate) fn set_val_metrics(&self, metrics: BTreeMap<String, f64>) {
        if let Ok(mut slot) = self.inner.val_metrics.lock() {
            *slot = Some(metrics);
        }
    }

    /// Best-effort snapshot for the status surface. Fields are read
    /// independently; a snapshot taken mid-update may mix old and new values,
    /// which is acceptable because every field is meaningful on its own.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status(),
            progress: self.progress(),
            logs: self
                .inner
                .logs
                .lock()
                .map(|logs| logs.iter().cloned().collect())
                .unwrap_or_default(),
            started_at: self.inner.started_at.lock().map(|s| *s).unwrap_or(None),
            duration: self
                .inner
                .duration
                .lock()
                .map(|d| d.clone())
                .unwrap_or_default(),
            etr: self.inner.etr.lock().map(|e| e.clone()).unwrap_or_default(),
            output_archive: self
                .inner
                .output_archive
                .lock()
                .map(|a| a.clone())
                .unwrap_or(None),
            error_msg: self
                .inner
                .error_msg
                .lock()
                .map(|e| e.clone())
                .unwrap_or(None),
            val_metrics: self
                .inner
                .val_metrics
                .lock()
                .map(|m| m.clone())
                .unwrap_or(None),
        }
    }
}

/// Read-only projection of [`SharedRunState`] served to external observers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: RunStatus,
    pub progress: f64,
    pub logs: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration: String,
    pub etr: String,
    pub output_archive: Option<PathBuf>,
    pub error_msg: Option<String>,
    pub val_metrics: Option<BTreeMap<String, f64>>,
}
