use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;
use uuid::Uuid;

use crate::hls::progress::{JobStatus, ProgressSnapshot};

/// Opaque identifier of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Hex form without hyphens, used in file names.
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Final report of a job, delivered exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Human readable result; names the failing segment or the remuxer
    /// diagnostic on failure.
    pub message: String,
    pub output: Option<PathBuf>,
}

impl JobOutcome {
    pub fn success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// Receives a job's progress and completion notifications.
///
/// Callbacks run on a dedicated dispatcher task, never on a segment worker,
/// one at a time and in emission order.
pub trait JobObserver: Send + Sync {
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}

    fn on_complete(&self, _outcome: &JobOutcome) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl JobObserver for NoopObserver {}

#[derive(Debug, Clone)]
pub enum JobEvent {
    Progress(ProgressSnapshot),
    Completed(JobOutcome),
}

/// Forward events to the observer until the completion event has been delivered
/// or every sender is gone.
pub fn spawn_dispatcher(
    observer: Arc<dyn JobObserver>,
    mut events: mpsc::UnboundedReceiver<JobEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                JobEvent::Progress(snapshot) => observer.on_progress(&snapshot),
                JobEvent::Completed(outcome) => {
                    trace!(job_id = %outcome.job_id, status = %outcome.status, "Delivering completion");
                    observer.on_complete(&outcome);
                    break;
                }
            }
        }
    })
}
