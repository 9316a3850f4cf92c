// Remux step: turns the ordered segment files into the destination container.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::RemuxError;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Ordered inputs for a remux run.
#[derive(Debug, Clone)]
pub struct RemuxInput {
    /// Segment files in playlist order.
    pub segments: Vec<PathBuf>,
    /// ffmpeg concat-demuxer list referencing `segments`.
    pub list_file: PathBuf,
}

/// External step that produces the final file. Must not modify its inputs.
#[async_trait]
pub trait Remuxer: Send + Sync {
    fn name(&self) -> &str;

    async fn remux(&self, input: &RemuxInput, destination: &Path) -> Result<(), RemuxError>;
}

/// Stream-copies the concat list into the destination with ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegRemuxer {
    binary: PathBuf,
}

impl Default for FfmpegRemuxer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegRemuxer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, input: &RemuxInput, destination: &Path) -> tokio::process::Command {
        let mut cmd = hidden_command(&self.binary);
        cmd.args(["-y", "-hide_banner", "-loglevel", "error"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&input.list_file)
            .args(["-c", "copy"])
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn remux(&self, input: &RemuxInput, destination: &Path) -> Result<(), RemuxError> {
        let mut cmd = self.command(input, destination);
        debug!(command = ?cmd.as_std(), "Running ffmpeg");

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                RemuxError::new(format!("FFmpeg not found: {}", self.binary.display()))
            } else {
                RemuxError::new(format!("failed to start {}: {e}", self.binary.display()))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(RemuxError::new(if stderr.is_empty() {
                format!("ffmpeg exited with {}", output.status)
            } else {
                stderr.to_string()
            }));
        }

        info!(output = %destination.display(), "Remux finished");
        Ok(())
    }
}

/// Byte-level concatenation of the segments, for containers that need no remux.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatRemuxer;

#[async_trait]
impl Remuxer for ConcatRemuxer {
    fn name(&self) -> &str {
        "concat"
    }

    async fn remux(&self, input: &RemuxInput, destination: &Path) -> Result<(), RemuxError> {
        let io_err = |what: &str, path: &Path, e: std::io::Error| {
            RemuxError::new(format!("{what} {}: {e}", path.display()))
        };
        let mut out = tokio::fs::File::create(destination)
            .await
            .map_err(|e| io_err("cannot create", destination, e))?;
        for segment in &input.segments {
            let mut file = tokio::fs::File::open(segment)
                .await
                .map_err(|e| io_err("cannot open", segment, e))?;
            tokio::io::copy(&mut file, &mut out)
                .await
                .map_err(|e| io_err("cannot copy", segment, e))?;
        }
        out.flush()
            .await
            .map_err(|e| io_err("cannot flush", destination, e))?;
        Ok(())
    }
}

/// A tokio command that opens no console window on Windows.
fn hidden_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    #[allow(unused_mut)]
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.as_std_mut().creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}
