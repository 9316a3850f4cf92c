use std::path::PathBuf;

use clap::Parser;
use vodfetch_engine::ProxyType;
use vodfetch_engine::hls::StorageMode;

/// Download HLS (VOD) streams concurrently and remux them into a single file.
///
/// While downloading, type `p` + Enter to pause, `r` to resume and `c` to
/// cancel. Ctrl-C cancels and cleans up.
#[derive(Parser, Debug, Clone)]
#[command(name = "vodfetch", author, version, about, long_about = None)]
pub struct Args {
    /// Playlist URLs (master or media playlists)
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Output file (only valid with a single URL)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Directory for output files named after their playlist
    #[arg(short = 'd', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Extension for generated output names (mp4, ts, mkv, ...)
    #[arg(long, value_name = "EXT")]
    pub format: Option<String>,

    /// Concurrent segment downloads per job [default: 8]
    #[arg(short = 'c', long, value_name = "N")]
    pub connections: Option<usize>,

    /// Retries per segment after the first attempt [default: 3]
    #[arg(short = 'r', long, value_name = "N")]
    pub retries: Option<u32>,

    /// Per-request timeout in seconds [default: 10]
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Backoff base in milliseconds; retry n waits n times this [default: 500]
    #[arg(long, value_name = "MS")]
    pub retry_delay: Option<u64>,

    /// Segments smaller than this many bytes are treated as corrupt [default: 128]
    #[arg(long, value_name = "BYTES")]
    pub min_segment_size: Option<usize>,

    /// Where finished segments are kept until reassembly
    #[arg(long, value_enum)]
    pub storage: Option<StorageMode>,

    /// Parent directory for temporary segment folders
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Path to the ffmpeg binary [default: ffmpeg]
    #[arg(long, value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Join segments byte-for-byte instead of remuxing with ffmpeg
    #[arg(long)]
    pub no_remux: bool,

    /// Extra request header, as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    #[arg(long, value_name = "UA")]
    pub user_agent: Option<String>,

    /// Proxy URL
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    #[arg(long, value_enum, default_value = "http")]
    pub proxy_type: ProxyType,

    #[arg(long, requires = "proxy")]
    pub proxy_username: Option<String>,

    #[arg(long, requires = "proxy")]
    pub proxy_password: Option<String>,

    /// Accept invalid TLS certificates
    #[arg(long)]
    pub insecure: bool,

    /// Do not read pause/resume/cancel commands from stdin
    #[arg(long)]
    pub no_input: bool,

    /// Print the final summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Configuration file [default: <config dir>/vodfetch/config.toml]
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
