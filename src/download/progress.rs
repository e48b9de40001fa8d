//! Progress reporting: engine-side counters and the snapshot stream.
//!
//! The engine is the only writer of the shared counters; the reporter
//! task reads them on a fixed cadence and pushes [`StatusReport`]
//! snapshots to a single subscriber. Staleness between a counter update
//! and the next snapshot is acceptable, so plain relaxed atomics are
//! enough. Log entries are buffered on the shared state and drained
//! into the next snapshot, leaving presentation to the consumer.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::constants::{ETA_FACTOR_MS, REPORT_INTERVAL};

/// Severity of a buffered log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Informational event (stage transition, resume decision).
    Info,
    /// Something worth the user's attention (ignored target line).
    Warning,
}

/// One buffered log message, delivered through the snapshot stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Severity of the message.
    pub level: LogLevel,
    /// The message text.
    pub message: String,
}

/// A point-in-time view of the running export.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Estimated time to completion of the current target.
    pub eta: Duration,
    /// Chunk size currently in use.
    pub chunk_size: u64,
    /// Rows of the current target already written.
    pub done_elements: u64,
    /// Total rows of the current target.
    pub total_elements: u64,
    /// Current request mode ("pages" or "links").
    pub mode: String,
    /// Gateway timeouts observed so far.
    pub timeouts_count: u64,
    /// Non-200 responses and transport retries observed so far.
    pub errors_count: u64,
    /// Progress of the current target in percent.
    pub progress_percentage: f64,
    /// The output filename rows are appended to.
    pub output_filename: String,
    /// Log entries buffered since the previous snapshot.
    pub logs: Vec<LogEntry>,
    /// Whether the job iterates a list of targets.
    pub targets_mode: bool,
    /// Number of target IDs in the list (targets mode only).
    pub total_ids: u64,
    /// Ordinal of the target currently being exported (targets mode only).
    pub current_id_ordinal: u64,
}

impl StatusReport {
    /// True once the current target reached 100%.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.progress_percentage >= 100.0
    }
}

/// Mode and filename strings the engine rewrites at stage transitions.
#[derive(Debug, Default)]
struct ProgressMeta {
    mode: String,
    output_filename: String,
}

/// Counters shared between the engine (writer) and the reporter (reader).
#[derive(Debug)]
pub(crate) struct ProgressState {
    done: AtomicU64,
    total: AtomicU64,
    chunk_size: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
    /// Smoothed seconds per 1000 rows, stored as f64 bits.
    speed_bits: AtomicU64,
    targets_mode: AtomicBool,
    total_ids: AtomicU64,
    current_id_ordinal: AtomicU64,
    meta: Mutex<ProgressMeta>,
    logs: Mutex<Vec<LogEntry>>,
}

impl ProgressState {
    pub(crate) fn new(mode: &str, output_filename: &str, chunk_size: u64) -> Self {
        Self {
            done: AtomicU64::new(0),
            total: AtomicU64::new(0),
            chunk_size: AtomicU64::new(chunk_size),
            timeouts: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            speed_bits: AtomicU64::new(1.0_f64.to_bits()),
            targets_mode: AtomicBool::new(false),
            total_ids: AtomicU64::new(0),
            current_id_ordinal: AtomicU64::new(0),
            meta: Mutex::new(ProgressMeta {
                mode: mode.to_string(),
                output_filename: output_filename.to_string(),
            }),
            logs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_target_progress(&self, done: u64, total: u64) {
        self.done.store(done, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
    }

    pub(crate) fn set_chunk_size(&self, chunk_size: u64) {
        self.chunk_size.store(chunk_size, Ordering::Relaxed);
    }

    pub(crate) fn add_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub(crate) fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub(crate) fn speed(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_speed(&self, seconds_per_1000: f64) {
        self.speed_bits
            .store(seconds_per_1000.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_targets_progress(&self, total_ids: u64, current_ordinal: u64) {
        self.targets_mode.store(true, Ordering::Relaxed);
        self.total_ids.store(total_ids, Ordering::Relaxed);
        self.current_id_ordinal
            .store(current_ordinal, Ordering::Relaxed);
    }

    pub(crate) fn set_stage(&self, mode: &str, output_filename: &str) {
        if let Ok(mut meta) = self.meta.lock() {
            meta.mode = mode.to_string();
            meta.output_filename = output_filename.to_string();
        }
    }

    pub(crate) fn push_log(&self, level: LogLevel, message: impl Into<String>) {
        if let Ok(mut logs) = self.logs.lock() {
            logs.push(LogEntry {
                level,
                message: message.into(),
            });
        }
    }

    /// Builds a snapshot, draining the buffered log entries.
    pub(crate) fn snapshot(&self) -> StatusReport {
        let done = self.done.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        let speed = self.speed();

        let progress_percentage = if total > 0 && done > 0 {
            (done as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        let remaining = total.saturating_sub(done);
        let eta_units = if speed > 0.0 {
            (remaining as f64 / 1000.0) / speed
        } else {
            0.0
        };
        let eta = Duration::from_millis(eta_units as u64 * ETA_FACTOR_MS);

        let (mode, output_filename) = match self.meta.lock() {
            Ok(meta) => (meta.mode.clone(), meta.output_filename.clone()),
            Err(_) => (String::new(), String::new()),
        };
        let logs = match self.logs.lock() {
            Ok(mut logs) => std::mem::take(&mut *logs),
            Err(_) => Vec::new(),
        };

        StatusReport {
            eta,
            chunk_size: self.chunk_size.load(Ordering::Relaxed),
            done_elements: done,
            total_elements: total,
            mode,
            timeouts_count: self.timeouts(),
            errors_count: self.errors(),
            progress_percentage,
            output_filename,
            logs,
            targets_mode: self.targets_mode.load(Ordering::Relaxed),
            total_ids: self.total_ids.load(Ordering::Relaxed),
            current_id_ordinal: self.current_id_ordinal.load(Ordering::Relaxed),
        }
    }
}

/// Spawns the reporter task: a snapshot every tick, one final snapshot
/// when the done signal fires, then the sink is dropped (closing the
/// channel exactly once).
pub(crate) fn spawn_reporter(
    state: std::sync::Arc<ProgressState>,
    sink: mpsc::UnboundedSender<StatusReport>,
    mut done: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *done.borrow() {
                let _ = sink.send(state.snapshot());
                return;
            }
            tokio::select! {
                changed = done.changed() => {
                    if changed.is_err() || *done.borrow() {
                        let _ = sink.send(state.snapshot());
                        return;
                    }
                }
                () = tokio::time::sleep(REPORT_INTERVAL) => {
                    if sink.send(state.snapshot()).is_err() {
                        // Subscriber went away; nothing left to report to.
                        return;
                    }
                }
            }
        }
    })
}
