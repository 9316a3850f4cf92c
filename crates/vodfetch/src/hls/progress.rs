// HLS Progress: per-job counters, throughput and size estimation.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::hls::events::{JobEvent, JobId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    /// Cancellation requested; workers are draining.
    Cancelling,
    Cancelled,
    Failed,
    Succeeded,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a job's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    /// Completed segments over total segments, in `0.0..=100.0`.
    pub percent: f64,
    pub bytes_downloaded: u64,
    /// Average completed-segment size times the segment count. Never below
    /// `bytes_downloaded`; exact once every segment is done.
    pub estimated_total_bytes: u64,
    /// Bytes per second of active (unpaused) time.
    pub throughput_bytes_per_sec: f64,
    pub eta: Option<Duration>,
    pub completed_segments: usize,
    pub total_segments: usize,
}

/// Status plus progress, as returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub progress: ProgressSnapshot,
}

/// Mutable job state shared by the runner, the control handle and the aggregator.
#[derive(Debug)]
pub struct JobState {
    pub status: JobStatus,
    pub total_segments: usize,
    pub completed_segments: usize,
    pub bytes_downloaded: u64,
    started_at: Option<Instant>,
    paused_since: Option<Instant>,
    paused_total: Duration,
    finished_at: Option<Instant>,
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

impl JobState {
    pub fn new() -> Self {
        Self {
            status: JobStatus::Queued,
            total_segments: 0,
            completed_segments: 0,
            bytes_downloaded: 0,
            started_at: None,
            paused_since: None,
            paused_total: Duration::ZERO,
            finished_at: None,
        }
    }

    /// Move out of `Queued` once the segment count is known.
    pub fn start(&mut self, total_segments: usize, paused: bool, now: Instant) {
        if self.status != JobStatus::Queued {
            return;
        }
        self.total_segments = total_segments;
        self.started_at = Some(now);
        if paused {
            self.status = JobStatus::Paused;
            self.paused_since = Some(now);
        } else {
            self.status = JobStatus::Running;
        }
    }

    pub fn mark_cancelling(&mut self, now: Instant) {
        if self.status.is_terminal() || self.status == JobStatus::Cancelling {
            return;
        }
        if let Some(since) = self.paused_since.take() {
            self.paused_total += now.saturating_duration_since(since);
        }
        self.status = JobStatus::Cancelling;
    }

    pub fn mark_paused(&mut self, now: Instant) {
        if self.status == JobStatus::Running {
            self.status = JobStatus::Paused;
            self.paused_since = Some(now);
        }
    }

    pub fn mark_resumed(&mut self, now: Instant) {
        if self.status == JobStatus::Paused {
            self.status = JobStatus::Running;
            if let Some(since) = self.paused_since.take() {
                self.paused_total += now.saturating_duration_since(since);
            }
        }
    }

    /// Enter a terminal status. Returns `false` if the job was already terminal.
    pub fn finish(&mut self, status: JobStatus, now: Instant) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if let Some(since) = self.paused_since.take() {
            self.paused_total += now.saturating_duration_since(since);
        }
        self.status = status;
        self.finished_at = Some(now);
        true
    }

    /// Time spent running, excluding pauses.
    pub fn active_elapsed(&self, now: Instant) -> Duration {
        let Some(started) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.finished_at.unwrap_or(now);
        let paused_now = self
            .paused_since
            .map(|since| end.saturating_duration_since(since))
            .unwrap_or_default();
        end.saturating_duration_since(started)
            .saturating_sub(self.paused_total)
            .saturating_sub(paused_now)
    }

    pub fn percent(&self) -> f64 {
        if self.total_segments == 0 {
            return 0.0;
        }
        (self.completed_segments as f64 / self.total_segments as f64 * 100.0).min(100.0)
    }

    pub fn estimated_total_bytes(&self) -> u64 {
        if self.completed_segments == 0 {
            return 0;
        }
        if self.completed_segments >= self.total_segments {
            return self.bytes_downloaded;
        }
        let average = self.bytes_downloaded as f64 / self.completed_segments as f64;
        let estimate = (average * self.total_segments as f64).round() as u64;
        estimate.max(self.bytes_downloaded)
    }

    pub fn throughput(&self, now: Instant) -> f64 {
        let secs = self.active_elapsed(now).as_secs_f64();
        if secs <= f64::EPSILON {
            return 0.0;
        }
        self.bytes_downloaded as f64 / secs
    }

    pub fn snapshot(&self, job_id: JobId, now: Instant) -> ProgressSnapshot {
        let estimated_total_bytes = self.estimated_total_bytes();
        let throughput = self.throughput(now);
        let remaining = estimated_total_bytes.saturating_sub(self.bytes_downloaded);
        let eta = if self.completed_segments >= self.total_segments && self.total_segments > 0 {
            Some(Duration::ZERO)
        } else if throughput > 0.0 && estimated_total_bytes > 0 {
            Some(Duration::from_secs_f64(remaining as f64 / throughput))
        } else {
            None
        };

        ProgressSnapshot {
            job_id,
            percent: self.percent(),
            bytes_downloaded: self.bytes_downloaded,
            estimated_total_bytes,
            throughput_bytes_per_sec: throughput,
            eta,
            completed_segments: self.completed_segments,
            total_segments: self.total_segments,
        }
    }
}

/// Folds segment completions into the job state and emits a progress event per completion.
#[derive(Clone)]
pub struct ProgressAggregator {
    job_id: JobId,
    state: Arc<Mutex<JobState>>,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl ProgressAggregator {
    pub fn new(
        job_id: JobId,
        state: Arc<Mutex<JobState>>,
        events: mpsc::UnboundedSender<JobEvent>,
    ) -> Self {
        Self {
            job_id,
            state,
            events,
        }
    }

    /// Record one completed segment of `bytes` payload bytes.
    pub fn record(&self, bytes: u64) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return;
        }
        state.completed_segments += 1;
        state.bytes_downloaded += bytes;
        let snapshot = state.snapshot(self.job_id, Instant::now());
        // Sent under the lock so observers see completions in counter order
        // and nothing arrives after a terminal status.
        let _ = self.events.send(JobEvent::Progress(snapshot));
    }
}
