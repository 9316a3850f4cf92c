// Reassembler: hands the completed segments, in playlist order, to the remuxer.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::DownloadError;
use crate::hls::remux::{RemuxInput, Remuxer};
use crate::hls::storage::SegmentStore;

pub const CONCAT_LIST_NAME: &str = "segments.txt";

/// Render an ffmpeg concat-demuxer list for `paths`.
pub fn concat_list(paths: &[PathBuf]) -> String {
    let mut list = String::new();
    for path in paths {
        let path = path.to_string_lossy().replace('\\', "/").replace('\'', r"'\''");
        list.push_str("file '");
        list.push_str(&path);
        list.push_str("'\n");
    }
    list
}

pub async fn write_concat_list(paths: &[PathBuf], list_path: &Path) -> Result<(), DownloadError> {
    tokio::fs::write(list_path, concat_list(paths))
        .await
        .map_err(|e| DownloadError::io(&format!("cannot write {}", list_path.display()), e))
}

/// Produce `destination` from a fully downloaded store.
pub async fn reassemble(
    store: &SegmentStore,
    remuxer: &dyn Remuxer,
    destination: &Path,
) -> Result<PathBuf, DownloadError> {
    let segments = store.ordered_inputs().await?;
    let list_file = store.dir().join(CONCAT_LIST_NAME);
    write_concat_list(&segments, &list_file).await?;

    info!(
        remuxer = remuxer.name(),
        inputs = segments.len(),
        output = %destination.display(),
        "Reassembling segments"
    );
    let input = RemuxInput {
        segments,
        list_file,
    };
    remuxer.remux(&input, destination).await?;
    Ok(destination.to_path_buf())
}
