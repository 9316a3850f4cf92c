//! In-process HTTP origin for integration tests.
//!
//! Serves registered bodies by path, honours `Range`, and can be scripted to
//! fail or delay individual paths. Every request is counted.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aes::Aes128;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use parking_lot::Mutex;
use vodfetch_engine::hls::{
    ConcatRemuxer, JobConfig, JobObserver, JobOutcome, ProgressSnapshot, RemuxInput, Remuxer,
};
use vodfetch_engine::{DownloadManager, HttpConfig, RemuxError};

#[derive(Default)]
pub struct OriginState {
    files: Mutex<HashMap<String, Bytes>>,
    failures: Mutex<HashMap<String, u32>>,
    delays: Mutex<HashMap<String, Duration>>,
    hits: Mutex<HashMap<String, u32>>,
}

pub struct TestOrigin {
    addr: SocketAddr,
    state: Arc<OriginState>,
}

impl TestOrigin {
    pub async fn start() -> Self {
        let state = Arc::new(OriginState::default());
        let app = Router::new()
            .route("/{*path}", get(serve))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    pub fn put(&self, path: &str, body: impl Into<Bytes>) {
        self.state.files.lock().insert(path.to_string(), body.into());
    }

    /// Answer the next `times` requests for `path` with 503.
    pub fn fail(&self, path: &str, times: u32) {
        self.state.failures.lock().insert(path.to_string(), times);
    }

    pub fn delay(&self, path: &str, delay: Duration) {
        self.state.delays.lock().insert(path.to_string(), delay);
    }

    pub fn hits(&self, path: &str) -> u32 {
        self.state.hits.lock().get(path).copied().unwrap_or(0)
    }

    pub fn hits_with_suffix(&self, suffix: &str) -> u32 {
        self.state
            .hits
            .lock()
            .iter()
            .filter(|(path, _)| path.ends_with(suffix))
            .map(|(_, n)| *n)
            .sum()
    }
}

async fn serve(
    State(state): State<Arc<OriginState>>,
    UrlPath(path): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    *state.hits.lock().entry(path.clone()).or_insert(0) += 1;

    let delay = state.delays.lock().get(&path).copied();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    {
        let mut failures = state.failures.lock();
        if let Some(left) = failures.get_mut(&path)
            && *left > 0
        {
            *left -= 1;
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    let Some(body) = state.files.lock().get(&path).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range)
    {
        Some((start, end)) if start <= end && end < body.len() => Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{}", body.len()),
            )
            .body(Body::from(body.slice(start..=end)))
            .unwrap(),
        Some(_) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        None => Response::new(Body::from(body)),
    }
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Distinct, recognisable payload for segment `index` (376 bytes, two TS packets).
pub fn segment_payload(index: usize) -> Bytes {
    let mut data = vec![0u8; 376];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (index as u8).wrapping_mul(31).wrapping_add(i as u8);
    }
    data[0] = 0x47;
    data[188] = 0x47;
    Bytes::from(data)
}

pub fn encrypt(plain: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Bytes {
    let mut buffer = plain.to_vec();
    buffer.resize(plain.len() + 16, 0);
    let len = cbc::Encryptor::<Aes128>::new(key.into(), iv.into())
        .encrypt_padded_mut::<Pkcs7>(&mut buffer, plain.len())
        .unwrap()
        .len();
    buffer.truncate(len);
    Bytes::from(buffer)
}

/// Media playlist listing `names`, optionally preceded by extra header lines.
pub fn media_playlist(header_lines: &[&str], names: &[String]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n");
    for line in header_lines {
        out.push_str(line);
        out.push('\n');
    }
    for name in names {
        out.push_str("#EXTINF:4.0,\n");
        out.push_str(name);
        out.push('\n');
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

/// Register `count` plain segments under `dir/` plus `dir/index.m3u8`.
pub fn publish_plain(origin: &TestOrigin, dir: &str, count: usize) -> String {
    let names: Vec<String> = (0..count).map(|i| format!("seg{i}.ts")).collect();
    for (i, name) in names.iter().enumerate() {
        origin.put(&format!("{dir}/{name}"), segment_payload(i));
    }
    origin.put(&format!("{dir}/index.m3u8"), media_playlist(&[], &names));
    origin.url(&format!("{dir}/index.m3u8"))
}

pub fn expected_output(count: usize) -> Vec<u8> {
    (0..count).flat_map(|i| segment_payload(i).to_vec()).collect()
}

/// Segment folders still present under `dir`.
pub fn work_dirs_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains("_segments_"))
        })
        .collect()
}

pub fn fast_config() -> JobConfig {
    JobConfig::default()
        .with_retry_base_delay(Duration::from_millis(10))
        .with_request_timeout(Duration::from_secs(5))
}

pub fn manager(remuxer: Arc<dyn Remuxer>) -> DownloadManager {
    let http = HttpConfig {
        use_system_proxy: false,
        ..HttpConfig::default()
    };
    DownloadManager::new(http, remuxer).unwrap()
}

/// Concatenating remuxer that records how it was called.
#[derive(Default)]
pub struct RecordingRemuxer {
    pub calls: AtomicUsize,
    pub input_counts: Mutex<Vec<usize>>,
    pub list_contents: Mutex<Vec<String>>,
}

impl RecordingRemuxer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Remuxer for RecordingRemuxer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn remux(&self, input: &RemuxInput, destination: &Path) -> Result<(), RemuxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.input_counts.lock().push(input.segments.len());
        let list = tokio::fs::read_to_string(&input.list_file)
            .await
            .map_err(|e| RemuxError::new(e.to_string()))?;
        self.list_contents.lock().push(list);
        ConcatRemuxer.remux(input, destination).await
    }
}

/// Remuxer that always fails like a tool rejecting its input.
pub struct FailingRemuxer;

#[async_trait]
impl Remuxer for FailingRemuxer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn remux(&self, _input: &RemuxInput, _destination: &Path) -> Result<(), RemuxError> {
        Err(RemuxError::new(
            "segments.txt: Invalid data found when processing input",
        ))
    }
}

/// Remuxer that writes the start of the output and then hangs until dropped.
#[derive(Default)]
pub struct StallingRemuxer {
    pub started: tokio::sync::Notify,
}

#[async_trait]
impl Remuxer for StallingRemuxer {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn remux(&self, _input: &RemuxInput, destination: &Path) -> Result<(), RemuxError> {
        tokio::fs::write(destination, b"partial output")
            .await
            .map_err(|e| RemuxError::new(e.to_string()))?;
        self.started.notify_one();
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

/// Remuxer that leaves a truncated output behind and then fails.
pub struct TruncatingRemuxer;

#[async_trait]
impl Remuxer for TruncatingRemuxer {
    fn name(&self) -> &str {
        "truncating"
    }

    async fn remux(&self, _input: &RemuxInput, destination: &Path) -> Result<(), RemuxError> {
        tokio::fs::write(destination, b"trunc")
            .await
            .map_err(|e| RemuxError::new(e.to_string()))?;
        Err(RemuxError::new("Conversion failed!"))
    }
}

#[derive(Debug, Clone)]
pub enum Observed {
    Progress(ProgressSnapshot),
    Complete(JobOutcome),
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    pub fn progress(&self) -> Vec<ProgressSnapshot> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Observed::Progress(p) => Some(p.clone()),
                Observed::Complete(_) => None,
            })
            .collect()
    }

    pub fn completions(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, Observed::Complete(_)))
            .count()
    }

    pub fn last_is_completion(&self) -> bool {
        matches!(self.events.lock().last(), Some(Observed::Complete(_)))
    }
}

impl JobObserver for RecordingObserver {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.events.lock().push(Observed::Progress(snapshot.clone()));
    }

    fn on_complete(&self, outcome: &JobOutcome) {
        self.events.lock().push(Observed::Complete(outcome.clone()));
    }
}
