//! Settings: command-line flags layered over an optional TOML file.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;
use vodfetch_engine::hls::{JobConfig, StorageMode};
use vodfetch_engine::{HttpConfig, ProxyConfig};

use crate::cli::Args;
use crate::error::AppError;

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub connections: Option<usize>,
    pub retries: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub min_segment_size: Option<usize>,
    pub storage: Option<StorageMode>,
    pub output_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub format: Option<String>,
    pub ffmpeg: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vodfetch").join("config.toml"))
    }

    /// Load `explicit` (which must exist) or the default file (which may not).
    pub fn load(explicit: Option<&Path>) -> Result<Self, AppError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };
        debug!(path = %path.display(), "Loading configuration file");
        let text = std::fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text).map_err(|e| AppError::Config(format!("{}: {e}", path.display())))
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Effective settings for a run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub job: JobConfig,
    pub http: HttpConfig,
    pub ffmpeg: PathBuf,
    pub output_dir: PathBuf,
    pub format: String,
    pub no_remux: bool,
}

impl Settings {
    /// Flags win over the file, the file wins over built-in defaults.
    pub fn resolve(args: &Args, file: FileConfig) -> Result<Self, AppError> {
        let defaults = JobConfig::default();
        let mut job = JobConfig {
            concurrency: args
                .connections
                .or(file.connections)
                .unwrap_or(defaults.concurrency),
            max_retries: args.retries.or(file.retries).unwrap_or(defaults.max_retries),
            retry_base_delay: args
                .retry_delay
                .or(file.retry_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            request_timeout: args
                .timeout
                .or(file.timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            min_segment_bytes: args
                .min_segment_size
                .or(file.min_segment_size)
                .unwrap_or(defaults.min_segment_bytes),
            storage: args.storage.or(file.storage).unwrap_or_default(),
            work_dir: args.work_dir.clone().or(file.work_dir),
            ..defaults
        };
        if job.retry_max_delay < job.retry_base_delay {
            job.retry_max_delay = job.retry_base_delay;
        }
        let job = job.validated()?;

        let mut http = HttpConfig {
            danger_accept_invalid_certs: args.insecure,
            ..HttpConfig::default()
        };
        if let Some(ua) = args.user_agent.clone().or(file.user_agent) {
            http.user_agent = ua;
        }
        for (name, value) in &file.headers {
            http = http.with_header(name, value)?;
        }
        for header in &args.headers {
            let (name, value) = parse_header(header)?;
            http = http.with_header(name, value)?;
        }
        if let Some(url) = args.proxy.clone().or(file.proxy) {
            let mut proxy = ProxyConfig::new(url, args.proxy_type);
            if let Some(username) = &args.proxy_username {
                proxy = proxy.with_auth(
                    username.clone(),
                    args.proxy_password.clone().unwrap_or_default(),
                );
            }
            http.proxy = Some(proxy);
        }

        let format = args
            .format
            .clone()
            .or(file.format)
            .unwrap_or_else(|| if args.no_remux { "ts" } else { "mp4" }.to_string());

        Ok(Self {
            job,
            http,
            ffmpeg: args
                .ffmpeg
                .clone()
                .or(file.ffmpeg)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            output_dir: args
                .output_dir
                .clone()
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            format: format.trim_start_matches('.').to_string(),
            no_remux: args.no_remux,
        })
    }
}

/// Split `Name: value`.
pub fn parse_header(header: &str) -> Result<(&str, &str), AppError> {
    header
        .split_once(':')
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| AppError::InvalidInput(format!("invalid header '{header}', expected 'Name: value'")))
}

const GENERIC_STEMS: [&str; 5] = ["index", "playlist", "master", "prog_index", "chunklist"];

/// Output name for a playlist URL: the file stem, or the parent directory
/// when the stem says nothing (`index`, `master`, ...).
pub fn output_name(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return "video".to_string();
    };
    let parts: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    let stem_of = |part: &str| {
        part.rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or_else(|| part.to_string())
    };

    let mut candidates = parts.iter().rev().map(|p| stem_of(p));
    let name = match candidates.next() {
        Some(stem) if GENERIC_STEMS.contains(&stem.to_ascii_lowercase().as_str()) => {
            candidates.next().unwrap_or(stem)
        }
        Some(stem) => stem,
        None => "video".to_string(),
    };
    sanitize(&name)
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Destination for every URL, with numeric suffixes on name clashes.
pub fn plan_outputs(
    urls: &[String],
    output: Option<&Path>,
    settings: &Settings,
) -> Result<Vec<PathBuf>, AppError> {
    if let Some(output) = output {
        if urls.len() != 1 {
            return Err(AppError::InvalidInput(
                "--output can only be used with a single URL".to_string(),
            ));
        }
        return Ok(vec![output.to_path_buf()]);
    }

    let mut used = HashSet::new();
    let mut paths = Vec::with_capacity(urls.len());
    for url in urls {
        let base = output_name(url);
        let mut name = format!("{base}.{}", settings.format);
        let mut n = 1;
        while !used.insert(name.clone()) {
            n += 1;
            name = format!("{base}_{n}.{}", settings.format);
        }
        paths.push(settings.output_dir.join(name));
    }
    Ok(paths)
}
