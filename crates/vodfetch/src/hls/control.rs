// Job control: pause gate and cancellation shared by a job's workers.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::DownloadError;
use crate::hls::progress::{JobState, JobStatus};

/// Handle used both by callers (pause/resume/cancel) and by workers (gate/sleep).
///
/// All operations are idempotent and do nothing once the job is terminal.
#[derive(Clone)]
pub struct JobControl {
    paused: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
    state: Arc<Mutex<JobState>>,
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new(Arc::new(Mutex::new(JobState::new())))
    }
}

impl JobControl {
    pub fn new(state: Arc<Mutex<JobState>>) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused: Arc::new(paused),
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub fn state(&self) -> &Arc<Mutex<JobState>> {
        &self.state
    }

    /// Stop workers from starting new attempts. In-flight requests finish.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.status.is_terminal() || self.is_cancelled() {
            return;
        }
        self.paused.send_replace(true);
        state.mark_paused(Instant::now());
        debug!(status = %state.status, "Job paused");
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        if state.status.is_terminal() || self.is_cancelled() {
            return;
        }
        self.paused.send_replace(false);
        state.mark_resumed(Instant::now());
        debug!(status = %state.status, "Job resumed");
    }

    /// Request cancellation; the runner reports `Cancelled` once workers have stopped.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return;
        }
        state.mark_cancelling(Instant::now());
        self.cancel.cancel();
        // Wake paused workers so they observe the cancellation.
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Wait while paused; fail if the job is cancelled first.
    pub async fn gate(&self) -> Result<(), DownloadError> {
        if self.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let mut rx = self.paused.subscribe();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            res = rx.wait_for(|paused| !*paused) => {
                let resumed = res.is_ok();
                if resumed && !self.is_cancelled() {
                    Ok(())
                } else {
                    Err(DownloadError::Cancelled)
                }
            }
        }
    }

    /// Sleep that ends early with `Cancelled`.
    pub async fn sleep(&self, duration: Duration) -> Result<(), DownloadError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Drive `fut` to completion unless the job is cancelled first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, DownloadError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            out = fut => Ok(out),
        }
    }
}
