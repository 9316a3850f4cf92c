// Segment storage: per-segment state plus the bytes of completed segments.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::DownloadError;
use crate::hls::config::StorageMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Pending,
    InFlight,
    Retrying,
    Complete,
    Failed,
}

#[derive(Debug)]
struct SegmentSlot {
    state: SegmentState,
    size: u64,
    data: Option<Bytes>,
}

/// Holds completed segments for one job, keyed by playlist index.
///
/// A segment is written at most once. The store creates its directory itself
/// and refuses one that already exists; [`cleanup`](Self::cleanup) removes it
/// whatever the outcome of the job.
pub struct SegmentStore {
    mode: StorageMode,
    dir: PathBuf,
    extension: &'static str,
    width: usize,
    slots: Mutex<Vec<SegmentSlot>>,
    cleaned: AtomicBool,
}

impl SegmentStore {
    pub async fn create(
        dir: impl Into<PathBuf>,
        mode: StorageMode,
        extension: &'static str,
        count: usize,
    ) -> Result<Self, DownloadError> {
        let dir = dir.into();
        if let Some(parent) = dir.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DownloadError::io(&format!("cannot create {}", parent.display()), e)
            })?;
        }
        // The directory must be new: cleanup removes it wholesale.
        tokio::fs::create_dir(&dir).await.map_err(|e| {
            DownloadError::io(&format!("cannot create work directory {}", dir.display()), e)
        })?;
        debug!(dir = %dir.display(), ?mode, count, "Created segment store");

        let width = count.saturating_sub(1).to_string().len().max(5);
        let slots = (0..count)
            .map(|_| SegmentSlot {
                state: SegmentState::Pending,
                size: 0,
                data: None,
            })
            .collect();
        Ok(Self {
            mode,
            dir,
            extension,
            width,
            slots: Mutex::new(slots),
            cleaned: AtomicBool::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero-padded file name, so lexical and numeric order agree.
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.dir
            .join(format!("{index:0width$}.{}", self.extension, width = self.width))
    }

    pub fn state(&self, index: usize) -> Option<SegmentState> {
        self.slots.lock().get(index).map(|s| s.state)
    }

    /// Move a `Pending` slot to `InFlight`. Any other state is refused.
    pub fn claim(&self, index: usize) -> bool {
        match self.slots.lock().get_mut(index) {
            Some(slot) if slot.state == SegmentState::Pending => {
                slot.state = SegmentState::InFlight;
                true
            }
            _ => false,
        }
    }

    pub fn mark_retrying(&self, index: usize) {
        self.set_state(index, SegmentState::Retrying);
    }

    pub fn fail(&self, index: usize) {
        self.set_state(index, SegmentState::Failed);
    }

    fn set_state(&self, index: usize, state: SegmentState) {
        if let Some(slot) = self.slots.lock().get_mut(index)
            && slot.state != SegmentState::Complete
        {
            slot.state = state;
        }
    }

    /// Persist the final payload of segment `index` and mark it complete.
    pub async fn complete(&self, index: usize, data: Bytes) -> Result<u64, DownloadError> {
        {
            let slots = self.slots.lock();
            match slots.get(index) {
                None => {
                    return Err(DownloadError::internal(format!(
                        "segment index {index} out of range"
                    )));
                }
                Some(slot) if slot.state == SegmentState::Complete => {
                    return Err(DownloadError::internal(format!(
                        "segment {index} stored twice"
                    )));
                }
                Some(_) => {}
            }
        }

        let size = data.len() as u64;
        let data = match self.mode {
            StorageMode::Disk => {
                let path = self.segment_path(index);
                tokio::fs::write(&path, &data).await.map_err(|e| {
                    DownloadError::io(&format!("cannot write {}", path.display()), e)
                })?;
                None
            }
            StorageMode::Memory => Some(data),
        };

        let mut slots = self.slots.lock();
        let slot = &mut slots[index];
        slot.state = SegmentState::Complete;
        slot.size = size;
        slot.data = data;
        Ok(size)
    }

    pub fn all_complete(&self) -> bool {
        self.slots
            .lock()
            .iter()
            .all(|s| s.state == SegmentState::Complete)
    }

    pub fn total_bytes(&self) -> u64 {
        self.slots.lock().iter().map(|s| s.size).sum()
    }

    /// Files to hand to the remuxer, in playlist order.
    ///
    /// Memory-backed stores first join their payloads into a single file.
    pub async fn ordered_inputs(&self) -> Result<Vec<PathBuf>, DownloadError> {
        if !self.all_complete() {
            return Err(DownloadError::internal(
                "reassembly requested before every segment completed",
            ));
        }

        match self.mode {
            StorageMode::Disk => Ok((0..self.len()).map(|i| self.segment_path(i)).collect()),
            StorageMode::Memory => {
                let payloads: Vec<Bytes> = self
                    .slots
                    .lock()
                    .iter()
                    .filter_map(|s| s.data.clone())
                    .collect();
                let joined = self.dir.join(format!("joined.{}", self.extension));
                let mut file = tokio::fs::File::create(&joined).await.map_err(|e| {
                    DownloadError::io(&format!("cannot create {}", joined.display()), e)
                })?;
                for payload in payloads {
                    file.write_all(&payload).await?;
                }
                file.flush().await?;
                Ok(vec![joined])
            }
        }
    }

    /// Remove the work directory and drop buffered payloads. Safe to call repeatedly.
    pub async fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in self.slots.lock().iter_mut() {
            slot.data = None;
        }
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!(dir = %self.dir.display(), "Removed work directory"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "Failed to remove work directory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(byte: u8) -> Bytes {
        Bytes::from(vec![byte; 64])
    }

    #[tokio::test]
    async fn disk_store_writes_padded_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(tmp.path().join("work"), StorageMode::Disk, "ts", 3)
            .await
            .unwrap();

        assert_eq!(
            store.segment_path(2).file_name().unwrap().to_str().unwrap(),
            "00002.ts"
        );

        // Completion order does not matter.
        for index in [2, 0, 1] {
            assert!(store.claim(index));
            assert!(!store.claim(index));
            store.complete(index, payload(index as u8)).await.unwrap();
        }
        assert!(store.all_complete());
        assert_eq!(store.total_bytes(), 192);

        let inputs = store.ordered_inputs().await.unwrap();
        assert_eq!(inputs.len(), 3);
        for (i, path) in inputs.iter().enumerate() {
            assert_eq!(std::fs::read(path).unwrap(), vec![i as u8; 64]);
        }
    }

    #[tokio::test]
    async fn second_write_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(tmp.path().join("w"), StorageMode::Memory, "ts", 1)
            .await
            .unwrap();
        store.complete(0, payload(1)).await.unwrap();
        assert!(store.complete(0, payload(2)).await.is_err());
        store.fail(0);
        assert_eq!(store.state(0), Some(SegmentState::Complete));
    }

    #[tokio::test]
    async fn memory_store_joins_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(tmp.path().join("mem"), StorageMode::Memory, "aac", 2)
            .await
            .unwrap();
        store.complete(1, Bytes::from_static(b"world")).await.unwrap();
        assert!(store.ordered_inputs().await.is_err());
        store.complete(0, Bytes::from_static(b"hello ")).await.unwrap();

        let inputs = store.ordered_inputs().await.unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(std::fs::read(&inputs[0]).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn cleanup_removes_directory_once() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("gone");
        let store = SegmentStore::create(&dir, StorageMode::Disk, "ts", 1)
            .await
            .unwrap();
        store.complete(0, payload(9)).await.unwrap();
        assert!(dir.exists());

        store.cleanup().await;
        store.cleanup().await;
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn existing_directory_is_never_adopted() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("taken");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("notes.txt"), b"keep me").unwrap();

        let err = SegmentStore::create(&dir, StorageMode::Disk, "ts", 1)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DownloadError::Io { .. }), "{err}");
        assert_eq!(std::fs::read(dir.join("notes.txt")).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn missing_parents_are_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a").join("b").join("work");
        let store = SegmentStore::create(&dir, StorageMode::Disk, "ts", 1)
            .await
            .unwrap();
        assert!(store.dir().is_dir());
    }

    #[test]
    fn wide_playlists_get_wider_names() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let store = rt
            .block_on(SegmentStore::create(
                tmp.path().join("big"),
                StorageMode::Memory,
                "ts",
                200_000,
            ))
            .unwrap();
        assert_eq!(
            store.segment_path(7).file_name().unwrap().to_str().unwrap(),
            "000007.ts"
        );
    }
}
