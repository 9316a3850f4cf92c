//! Download Manager: runs any number of jobs and exposes their control surface.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use reqwest::Client;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::DownloadError;
use crate::config::{HttpConfig, create_client};
use crate::hls::control::JobControl;
use crate::hls::events::{JobId, JobObserver, JobOutcome};
use crate::hls::fetcher::{HttpSegmentFetcher, SegmentSource};
use crate::hls::job::{JobComponents, JobRequest, run_job};
use crate::hls::playlist::{PlaylistEngine, PlaylistResolver};
use crate::hls::progress::{JobSnapshot, JobState, JobStatus};
use crate::hls::remux::Remuxer;

struct JobEntry {
    control: JobControl,
    outcome: watch::Receiver<Option<JobOutcome>>,
}

/// Entry point for callers: submit jobs, control them, observe them.
///
/// Jobs are independent; each has its own worker pool, storage and control
/// handle. Terminal jobs stay queryable until [`acknowledge`](Self::acknowledge)d.
pub struct DownloadManager {
    components: JobComponents,
    jobs: DashMap<JobId, JobEntry>,
}

impl DownloadManager {
    /// Manager backed by HTTP for playlists, keys and segments.
    pub fn new(http: HttpConfig, remuxer: Arc<dyn Remuxer>) -> Result<Self, DownloadError> {
        let client = create_client(&http)?;
        Ok(Self::with_components(
            Arc::new(PlaylistEngine::new(client.clone())),
            Arc::new(HttpSegmentFetcher::new(client.clone())),
            client,
            remuxer,
        ))
    }

    pub fn with_components(
        resolver: Arc<dyn PlaylistResolver>,
        source: Arc<dyn SegmentSource>,
        key_client: Client,
        remuxer: Arc<dyn Remuxer>,
    ) -> Self {
        Self {
            components: JobComponents {
                resolver,
                source,
                key_client,
                remuxer,
            },
            jobs: DashMap::new(),
        }
    }

    /// Start a job on the current tokio runtime and return its id immediately.
    pub fn submit(&self, request: JobRequest, observer: Arc<dyn JobObserver>) -> JobId {
        let job_id = JobId::new();
        let control = JobControl::new(Arc::new(parking_lot::Mutex::new(JobState::new())));
        let (outcome_tx, outcome_rx) = watch::channel(None);

        self.jobs.insert(
            job_id,
            JobEntry {
                control: control.clone(),
                outcome: outcome_rx,
            },
        );

        info!(%job_id, url = %request.manifest_url, destination = %request.destination.display(), "Job submitted");
        let components = self.components.clone();
        tokio::spawn(async move {
            let outcome = run_job(job_id, request, control, components, observer).await;
            outcome_tx.send_replace(Some(outcome));
        });
        job_id
    }

    pub fn pause(&self, job_id: JobId) -> bool {
        self.with_control(job_id, JobControl::pause)
    }

    pub fn resume(&self, job_id: JobId) -> bool {
        self.with_control(job_id, JobControl::resume)
    }

    pub fn cancel(&self, job_id: JobId) -> bool {
        self.with_control(job_id, JobControl::cancel)
    }

    pub fn cancel_all(&self) {
        for entry in self.jobs.iter() {
            entry.control.cancel();
        }
    }

    fn with_control(&self, job_id: JobId, op: impl FnOnce(&JobControl)) -> bool {
        match self.jobs.get(&job_id) {
            Some(entry) => {
                op(&entry.control);
                true
            }
            None => {
                debug!(%job_id, "Control request for unknown job");
                false
            }
        }
    }

    pub fn status(&self, job_id: JobId) -> Option<JobSnapshot> {
        let entry = self.jobs.get(&job_id)?;
        let state = entry.control.state().lock();
        Some(JobSnapshot {
            status: state.status,
            progress: state.snapshot(job_id, Instant::now()),
        })
    }

    /// Wait for the job to finish. `None` for unknown ids.
    pub async fn wait(&self, job_id: JobId) -> Option<JobOutcome> {
        let mut rx = self.jobs.get(&job_id)?.outcome.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        Some(outcome.unwrap_or_else(|| JobOutcome {
            job_id,
            status: JobStatus::Failed,
            message: DownloadError::internal("job task ended without an outcome").to_string(),
            output: None,
        }))
    }

    /// Forget a terminal job. Returns `false` if the job is unknown or still running.
    pub fn acknowledge(&self, job_id: JobId) -> bool {
        self.jobs
            .remove_if(&job_id, |_, entry| {
                entry.outcome.borrow().is_some()
            })
            .is_some()
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|entry| *entry.key()).collect()
    }
}
