//! Concurrent HLS (VOD) downloader engine.
//!
//! A [`DownloadManager`] resolves a playlist into segment descriptors, fetches
//! the segments with a bounded per-job worker pool (retrying, decrypting
//! AES-128 where needed), and hands the completed segments in playlist order
//! to a [`Remuxer`](hls::Remuxer) that produces the final file. Progress and
//! completion are reported through a [`JobObserver`](hls::JobObserver).

pub mod config;
pub mod error;
pub mod hls;
pub mod manager;
pub mod proxy;

pub use config::{HttpConfig, create_client};
pub use error::{DownloadError, ManifestError, RemuxError, SegmentError};
pub use manager::DownloadManager;
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
