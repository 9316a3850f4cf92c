// HLS Segment Scheduler: a bounded pool of workers draining the job's segment queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace};

use crate::hls::control::JobControl;
use crate::hls::decryption::{DecryptionKey, KeyProvider, decrypt_offloaded, iv_for};
use crate::hls::fetcher::SegmentSource;
use crate::hls::progress::ProgressAggregator;
use crate::hls::retry::{RetryError, RetryPolicy, retry_with_backoff};
use crate::hls::segment::SegmentDescriptor;
use crate::hls::storage::SegmentStore;
use crate::{DownloadError, SegmentError};

/// Everything a worker needs to take a segment from URI to stored payload.
pub struct SegmentScheduler {
    source: Arc<dyn SegmentSource>,
    keys: Arc<KeyProvider>,
    store: Arc<SegmentStore>,
    progress: ProgressAggregator,
    control: JobControl,
    policy: RetryPolicy,
    request_timeout: Duration,
    min_segment_bytes: usize,
    offload_decryption: bool,
    concurrency: usize,
    queue: Mutex<VecDeque<SegmentDescriptor>>,
    stop: AtomicBool,
    failure: Mutex<Option<DownloadError>>,
}

/// Knobs copied from the job configuration.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub policy: RetryPolicy,
    pub request_timeout: Duration,
    pub min_segment_bytes: usize,
    pub offload_decryption: bool,
    pub concurrency: usize,
}

impl SegmentScheduler {
    pub fn new(
        source: Arc<dyn SegmentSource>,
        keys: Arc<KeyProvider>,
        store: Arc<SegmentStore>,
        progress: ProgressAggregator,
        control: JobControl,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            source,
            keys,
            store,
            progress,
            control,
            policy: settings.policy,
            request_timeout: settings.request_timeout,
            min_segment_bytes: settings.min_segment_bytes,
            offload_decryption: settings.offload_decryption,
            concurrency: settings.concurrency.max(1),
            queue: Mutex::new(VecDeque::new()),
            stop: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    /// Download every segment. Returns once all workers have exited.
    ///
    /// Segments are handed out in ascending index order. After the first
    /// segment exhausts its retries no new segments are started; requests
    /// already in flight are allowed to finish.
    pub async fn run(self: Arc<Self>, segments: Vec<SegmentDescriptor>) -> Result<(), DownloadError> {
        let total = segments.len();
        {
            let mut queue = self.queue.lock();
            queue.extend(segments);
            queue.make_contiguous().sort_by_key(|s| s.index);
        }
        let workers = self.concurrency.min(total.max(1));
        info!(segments = total, workers, "Starting segment workers");

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let scheduler = Arc::clone(&self);
            set.spawn(async move { scheduler.worker(worker_id).await });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Segment worker panicked");
                self.stop.store(true, Ordering::SeqCst);
                self.record_failure(DownloadError::internal(format!("segment worker failed: {e}")));
            }
        }

        if let Some(err) = self.failure.lock().take() {
            return Err(err);
        }
        if self.control.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        if !self.store.all_complete() {
            return Err(DownloadError::internal(
                "workers exited with segments outstanding",
            ));
        }
        Ok(())
    }

    async fn worker(&self, worker_id: usize) {
        loop {
            if self.stop.load(Ordering::SeqCst) || self.control.is_cancelled() {
                break;
            }
            let Some(segment) = self.queue.lock().pop_front() else {
                break;
            };
            trace!(worker_id, index = segment.index, "Worker picked segment");

            match self.download_one(&segment).await {
                Ok(()) => {}
                Err(DownloadError::Cancelled) => break,
                Err(err) => {
                    self.stop.store(true, Ordering::SeqCst);
                    self.record_failure(err);
                    break;
                }
            }
        }
        trace!(worker_id, "Worker exiting");
    }

    fn record_failure(&self, err: DownloadError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(err);
        }
    }

    async fn download_one(&self, segment: &SegmentDescriptor) -> Result<(), DownloadError> {
        let index = segment.index;
        if !self.store.claim(index) {
            return Err(DownloadError::internal(format!(
                "segment {index} was claimed twice"
            )));
        }
        let key = self
            .keys
            .key_for(segment)
            .map_err(|e| DownloadError::internal(e.to_string()))?;

        let result = retry_with_backoff(&self.policy, &self.control, |attempt| {
            if attempt > 1 {
                self.store.mark_retrying(index);
            }
            self.attempt(segment, key)
        })
        .await;

        match result {
            Ok(data) => {
                let size = self.store.complete(index, data).await?;
                self.progress.record(size);
                debug!(index, size, "Segment complete");
                Ok(())
            }
            Err(RetryError::Cancelled) => Err(DownloadError::Cancelled),
            Err(RetryError::Exhausted { attempts, last }) => {
                self.store.fail(index);
                error!(index, attempts, error = %last, "Segment failed permanently");
                Err(DownloadError::RetryExhausted {
                    index,
                    attempts,
                    source: last,
                })
            }
        }
    }

    /// One fetch plus decryption and size validation.
    async fn attempt(
        &self,
        segment: &SegmentDescriptor,
        key: Option<DecryptionKey>,
    ) -> Result<Bytes, SegmentError> {
        let data = self.source.fetch(segment, self.request_timeout).await?;
        match key {
            Some(key) => {
                decrypt_offloaded(
                    data,
                    key,
                    iv_for(segment),
                    self.min_segment_bytes,
                    self.offload_decryption,
                )
                .await
            }
            None if data.len() < self.min_segment_bytes => Err(SegmentError::corrupt(format!(
                "payload is {} bytes, expected at least {}",
                data.len(),
                self.min_segment_bytes
            ))),
            None => Ok(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::config::StorageMode;
    use crate::hls::events::{JobEvent, JobId};
    use crate::hls::progress::JobState;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use tokio::sync::mpsc;
    use url::Url;

    /// Serves `index`-filled payloads, failing a segment a scripted number of times.
    struct ScriptedSource {
        failures: Mutex<HashMap<usize, u32>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(failures: &[(usize, u32)], delay: Duration) -> Self {
            Self {
                failures: Mutex::new(failures.iter().copied().collect()),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl SegmentSource for ScriptedSource {
        async fn fetch(
            &self,
            segment: &SegmentDescriptor,
            _timeout: Duration,
        ) -> Result<Bytes, SegmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut failures = self.failures.lock();
            if let Some(left) = failures.get_mut(&segment.index)
                && *left > 0
            {
                *left -= 1;
                return Err(SegmentError::Transport {
                    reason: "connection reset".to_string(),
                });
            }
            Ok(Bytes::from(vec![segment.index as u8; 200]))
        }
    }

    struct Harness {
        scheduler: Arc<SegmentScheduler>,
        store: Arc<SegmentStore>,
        control: JobControl,
        events: mpsc::UnboundedReceiver<JobEvent>,
        segments: Vec<SegmentDescriptor>,
        _tmp: tempfile::TempDir,
    }

    async fn harness(source: Arc<ScriptedSource>, count: usize, max_retries: u32) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SegmentStore::create(tmp.path().join("seg"), StorageMode::Disk, "ts", count)
                .await
                .unwrap(),
        );
        let state = Arc::new(Mutex::new(JobState::new()));
        state.lock().start(count, false, Instant::now());
        let control = JobControl::new(state.clone());
        let (tx, events) = mpsc::unbounded_channel();
        let progress = ProgressAggregator::new(JobId::new(), state, tx);
        let keys = Arc::new(KeyProvider::new(
            reqwest::Client::new(),
            Duration::from_secs(1),
        ));
        let settings = SchedulerSettings {
            policy: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            request_timeout: Duration::from_secs(1),
            min_segment_bytes: 128,
            offload_decryption: false,
            concurrency: 2,
        };
        let scheduler = Arc::new(SegmentScheduler::new(
            source,
            keys,
            store.clone(),
            progress,
            control.clone(),
            settings,
        ));
        let segments = (0..count)
            .map(|i| {
                SegmentDescriptor::plain(
                    i,
                    Url::parse(&format!("https://cdn.example.com/{i}.ts")).unwrap(),
                )
            })
            .collect();
        Harness {
            scheduler,
            store,
            control,
            events,
            segments,
            _tmp: tmp,
        }
    }

    #[tokio::test]
    async fn downloads_everything_within_worker_bound() {
        let source = Arc::new(ScriptedSource::new(&[], Duration::from_millis(10)));
        let mut h = harness(source.clone(), 6, 3).await;

        h.scheduler.clone().run(h.segments.clone()).await.unwrap();

        assert!(h.store.all_complete());
        assert_eq!(source.calls.load(Ordering::SeqCst), 6);
        assert!(source.max_in_flight.load(Ordering::SeqCst) <= 2);

        let mut progress = 0;
        while let Ok(JobEvent::Progress(_)) = h.events.try_recv() {
            progress += 1;
        }
        assert_eq!(progress, 6);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let source = Arc::new(ScriptedSource::new(&[(1, 2)], Duration::ZERO));
        let h = harness(source.clone(), 3, 2).await;

        h.scheduler.clone().run(h.segments.clone()).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn exhausted_segment_fails_the_run() {
        let source = Arc::new(ScriptedSource::new(&[(2, 10)], Duration::ZERO));
        let h = harness(source.clone(), 4, 1).await;

        let err = h.scheduler.clone().run(h.segments.clone()).await.unwrap_err();
        match err {
            DownloadError::RetryExhausted {
                index, attempts, ..
            } => {
                assert_eq!(index, 2);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.store.state(2), Some(crate::hls::storage::SegmentState::Failed));
    }

    #[tokio::test]
    async fn cancellation_stops_workers() {
        let source = Arc::new(ScriptedSource::new(&[], Duration::from_millis(50)));
        let h = harness(source.clone(), 20, 0).await;

        let control = h.control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            control.cancel();
        });
        let err = h.scheduler.clone().run(h.segments.clone()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(source.calls.load(Ordering::SeqCst) < 20);
    }
}
