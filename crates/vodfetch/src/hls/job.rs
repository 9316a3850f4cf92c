// HLS Job: the per-job pipeline from playlist URL to remuxed output.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::DownloadError;
use crate::hls::config::JobConfig;
use crate::hls::control::JobControl;
use crate::hls::decryption::KeyProvider;
use crate::hls::events::{JobEvent, JobId, JobObserver, JobOutcome, spawn_dispatcher};
use crate::hls::fetcher::SegmentSource;
use crate::hls::playlist::PlaylistResolver;
use crate::hls::progress::{JobStatus, ProgressAggregator};
use crate::hls::reassembler::reassemble;
use crate::hls::remux::Remuxer;
use crate::hls::scheduler::{SchedulerSettings, SegmentScheduler};
use crate::hls::segment::segment_extension;
use crate::hls::storage::SegmentStore;

/// What to download and where to put it.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub manifest_url: String,
    pub destination: PathBuf,
    pub config: JobConfig,
}

impl JobRequest {
    pub fn new(manifest_url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            destination: destination.into(),
            config: JobConfig::default(),
        }
    }

    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    /// The job's private segment directory: `<stem>_segments_<job id>` next to
    /// the destination, or under the configured work directory.
    pub fn work_dir(&self, job_id: JobId) -> PathBuf {
        let stem = self
            .destination
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "download".to_string());
        let parent = self
            .config
            .work_dir
            .clone()
            .unwrap_or_else(|| destination_dir(&self.destination));
        parent.join(format!("{stem}_segments_{}", job_id.simple()))
    }
}

fn destination_dir(destination: &Path) -> PathBuf {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Collaborators shared by every job a manager runs.
#[derive(Clone)]
pub struct JobComponents {
    pub resolver: Arc<dyn PlaylistResolver>,
    pub source: Arc<dyn SegmentSource>,
    pub key_client: Client,
    pub remuxer: Arc<dyn Remuxer>,
}

/// Run one job to a terminal state.
///
/// Temporary storage is removed before the status turns terminal, and the
/// completion event is the last thing the observer receives.
#[instrument(
    name = "job",
    skip_all,
    fields(job_id = %job_id, url = %request.manifest_url)
)]
pub async fn run_job(
    job_id: JobId,
    request: JobRequest,
    control: JobControl,
    components: JobComponents,
    observer: Arc<dyn JobObserver>,
) -> JobOutcome {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let dispatcher = spawn_dispatcher(observer, events_rx);

    let mut store = None;
    let result = execute(
        job_id,
        &request,
        &control,
        &components,
        events_tx.clone(),
        &mut store,
    )
    .await;

    if let Some(store) = &store {
        store.cleanup().await;
    }

    let (status, message, output) = match result {
        Ok(path) => {
            info!(output = %path.display(), "Download complete");
            let message = format!("Download complete: {}", path.display());
            (JobStatus::Succeeded, message, Some(path))
        }
        Err(DownloadError::Cancelled) => {
            info!("Download cancelled");
            (JobStatus::Cancelled, "Cancelled".to_string(), None)
        }
        Err(err) => {
            warn!(error = %err, "Download failed");
            (JobStatus::Failed, err.to_string(), None)
        }
    };
    control.state().lock().finish(status, Instant::now());

    let outcome = JobOutcome {
        job_id,
        status,
        message,
        output,
    };
    let _ = events_tx.send(JobEvent::Completed(outcome.clone()));
    drop(events_tx);
    if let Err(e) = dispatcher.await {
        warn!(error = %e, "Observer dispatcher ended abnormally");
    }
    outcome
}

async fn execute(
    job_id: JobId,
    request: &JobRequest,
    control: &JobControl,
    components: &JobComponents,
    events: mpsc::UnboundedSender<JobEvent>,
    store_slot: &mut Option<Arc<SegmentStore>>,
) -> Result<PathBuf, DownloadError> {
    let config = request.config.clone().validated()?;

    let output_dir = destination_dir(&request.destination);
    tokio::fs::create_dir_all(&output_dir).await.map_err(|e| {
        DownloadError::io(
            &format!("cannot create output directory {}", output_dir.display()),
            e,
        )
    })?;

    control.gate().await?;
    let resolved = control
        .guard(
            components
                .resolver
                .resolve(&request.manifest_url, config.request_timeout),
        )
        .await??;
    let segments = resolved.segments;

    let keys = Arc::new(KeyProvider::new(
        components.key_client.clone(),
        config.request_timeout,
    ));
    control.gate().await?;
    control.guard(keys.resolve_all(&segments)).await??;

    let total = segments.len();
    {
        let mut state = control.state().lock();
        let paused = control.is_paused();
        state.start(total, paused, Instant::now());
    }
    info!(
        media_url = %resolved.media_url,
        segments = total,
        variant_selected = resolved.variant_selected,
        concurrency = config.concurrency,
        "Job started"
    );

    let store = Arc::new(
        SegmentStore::create(
            request.work_dir(job_id),
            config.storage,
            segment_extension(&segments),
            total,
        )
        .await?,
    );
    *store_slot = Some(Arc::clone(&store));

    let scheduler = Arc::new(SegmentScheduler::new(
        Arc::clone(&components.source),
        keys,
        Arc::clone(&store),
        ProgressAggregator::new(job_id, Arc::clone(control.state()), events),
        control.clone(),
        SchedulerSettings {
            policy: config.retry_policy(),
            request_timeout: config.request_timeout,
            min_segment_bytes: config.min_segment_bytes,
            offload_decryption: config.offload_decryption,
            concurrency: config.concurrency,
        },
    ));
    scheduler.run(segments).await?;

    if control.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }

    let remuxed = control
        .guard(reassemble(
            &store,
            components.remuxer.as_ref(),
            &request.destination,
        ))
        .await
        .and_then(|result| result);
    if matches!(
        remuxed,
        Err(DownloadError::Cancelled | DownloadError::Remux(_))
    ) {
        // Whatever the remuxer wrote is incomplete.
        remove_partial_output(&request.destination).await;
    }
    remuxed
}

async fn remove_partial_output(destination: &Path) {
    match tokio::fs::remove_file(destination).await {
        Ok(()) => info!(path = %destination.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, "Failed to remove partial output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_dir_sits_next_to_destination() {
        let job_id = JobId::new();
        let request = JobRequest::new("https://x/a.m3u8", "/videos/show/ep1.mp4");
        assert_eq!(
            request.work_dir(job_id),
            PathBuf::from(format!("/videos/show/ep1_segments_{}", job_id.simple()))
        );
    }

    #[test]
    fn work_dir_honours_configured_parent() {
        let job_id = JobId::new();
        let request = JobRequest::new("https://x/a.m3u8", "ep1.mp4")
            .with_config(JobConfig::default().with_work_dir("/scratch"));
        assert_eq!(
            request.work_dir(job_id),
            PathBuf::from(format!("/scratch/ep1_segments_{}", job_id.simple()))
        );

        let bare = JobRequest::new("https://x/a.m3u8", "ep1.mp4");
        assert!(bare.work_dir(job_id).starts_with("."));
    }

    #[test]
    fn same_stem_jobs_get_distinct_work_dirs() {
        let ts = JobRequest::new("https://x/a.m3u8", "/videos/show.ts");
        let mkv = JobRequest::new("https://x/b.m3u8", "/videos/show.mkv");
        assert_ne!(ts.work_dir(JobId::new()), mkv.work_dir(JobId::new()));
    }
}
