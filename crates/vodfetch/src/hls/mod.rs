// HLS VOD download engine: resolve, fetch concurrently, reassemble in order.

pub mod config;
pub mod control;
pub mod decryption;
pub mod events;
pub mod fetcher;
pub mod job;
pub mod playlist;
pub mod progress;
pub mod reassembler;
pub mod remux;
pub mod retry;
pub mod scheduler;
pub mod segment;
pub mod storage;

// Re-exports for easier access
pub use config::{JobConfig, MAX_CONCURRENCY, StorageMode};
pub use control::JobControl;
pub use decryption::{DecryptionKey, KeyProvider, decrypt_segment};
pub use events::{JobEvent, JobId, JobObserver, JobOutcome, NoopObserver};
pub use fetcher::{HttpSegmentFetcher, SegmentSource};
pub use job::{JobComponents, JobRequest, run_job};
pub use playlist::{PlaylistEngine, PlaylistResolver, ResolvedPlaylist};
pub use progress::{JobSnapshot, JobStatus, ProgressSnapshot};
pub use remux::{ConcatRemuxer, FfmpegRemuxer, RemuxInput, Remuxer};
pub use retry::RetryPolicy;
pub use segment::{ByteRange, IvSource, KeyRef, SegmentDescriptor};
