use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DownloadError;
use crate::hls::retry::RetryPolicy;

/// Upper bound for the per-job worker pool.
pub const MAX_CONCURRENCY: usize = 64;

/// Where completed segment payloads live until reassembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum StorageMode {
    /// One file per segment in the job's work directory.
    #[default]
    Disk,
    /// Payloads stay in memory and are joined into a single file before remuxing.
    Memory,
}

/// Per-job settings. Each job carries its own copy; nothing here is global.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Number of segment workers (clamped to `1..=MAX_CONCURRENCY`).
    pub concurrency: usize,
    /// Retries per segment after the first attempt.
    pub max_retries: u32,
    /// Linear backoff base: the n-th retry waits `retry_base_delay * n`.
    pub retry_base_delay: Duration,
    /// Upper bound on a single backoff sleep.
    pub retry_max_delay: Duration,
    /// Timeout applied to every playlist, key and segment request.
    pub request_timeout: Duration,
    /// Payloads shorter than this (after decryption) are treated as corrupt.
    pub min_segment_bytes: usize,
    pub storage: StorageMode,
    /// Parent of the job's private segment directory. Defaults to the
    /// destination's directory.
    pub work_dir: Option<PathBuf>,
    /// Run AES decryption on the blocking thread pool.
    pub offload_decryption: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            min_segment_bytes: 128,
            storage: StorageMode::Disk,
            work_dir: None,
            offload_decryption: true,
        }
    }
}

impl JobConfig {
    /// Clamp the pool size and reject settings no job can run with.
    pub fn validated(mut self) -> Result<Self, DownloadError> {
        if self.request_timeout.is_zero() {
            return Err(DownloadError::invalid_config(
                "request timeout must be greater than zero",
            ));
        }
        if self.retry_max_delay < self.retry_base_delay {
            return Err(DownloadError::invalid_config(
                "retry max delay must not be shorter than the base delay",
            ));
        }
        self.concurrency = self.concurrency.clamp(1, MAX_CONCURRENCY);
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_min_segment_bytes(mut self, bytes: usize) -> Self {
        self.min_segment_bytes = bytes;
        self
    }

    pub fn with_storage(mut self, storage: StorageMode) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }
}
