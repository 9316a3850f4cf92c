use reqwest::StatusCode;

/// Failures while turning a playlist URL into segment descriptors.
///
/// All of these are fatal and reported before any segment worker starts.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ManifestError {
    #[error("playlist {url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("playlist {url} is malformed: {reason}")]
    Malformed { url: String, reason: String },

    #[error("playlist {url} contains no segments")]
    EmptyPlaylist { url: String },

    #[error("master playlist {url} has no usable variants")]
    NoVariants { url: String },

    #[error("unsupported encryption method `{method}`")]
    UnsupportedEncryption { method: String },

    #[error("unsupported playlist feature: {feature}")]
    Unsupported { feature: String },
}

impl ManifestError {
    pub fn unreachable(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unreachable {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Malformed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// Per-segment failures. Every variant is retried by the scheduler and only
/// surfaces wrapped in [`DownloadError::RetryExhausted`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SegmentError {
    #[error("transport error: {reason}")]
    Transport { reason: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("corrupt segment: {reason}")]
    Corrupt { reason: String },
}

impl SegmentError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }

    pub fn from_reqwest(err: reqwest::Error, timeout: std::time::Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            Self::Transport {
                reason: err.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{diagnostic}")]
pub struct RemuxError {
    pub diagnostic: String,
}

impl RemuxError {
    pub fn new(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostic: diagnostic.into(),
        }
    }
}

/// Job-level terminal causes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("failed to obtain decryption key from {uri}: {reason}")]
    Key { uri: String, reason: String },

    #[error("segment {index} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        index: usize,
        attempts: u32,
        #[source]
        source: SegmentError,
    },

    #[error("remux failed: {0}")]
    Remux(#[from] RemuxError),

    #[error("I/O error: {reason}")]
    Io { reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("HTTP client error: {reason}")]
    Client { reason: String },

    #[error("proxy configuration error: {reason}")]
    ProxyConfiguration { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DownloadError {
    pub fn key(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::Key {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub fn proxy_configuration(reason: impl Into<String>) -> Self {
        Self::ProxyConfiguration {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    pub fn io(context: &str, err: std::io::Error) -> Self {
        Self::Io {
            reason: format!("{context}: {err}"),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Errors raised before any segment work starts.
    pub fn is_pre_work(&self) -> bool {
        matches!(
            self,
            Self::Manifest(_) | Self::Key { .. } | Self::InvalidConfig { .. }
        )
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_exhausted_message_names_segment() {
        let err = DownloadError::RetryExhausted {
            index: 7,
            attempts: 4,
            source: SegmentError::HttpStatus {
                status: StatusCode::SERVICE_UNAVAILABLE,
                url: "https://cdn.example.com/seg7.ts".to_string(),
            },
        };
        let message = err.to_string();
        assert!(message.contains("segment 7"));
        assert!(message.contains("4 attempts"));
        assert!(message.contains("503"));
    }

    #[test]
    fn manifest_errors_are_pre_work() {
        let err: DownloadError = ManifestError::EmptyPlaylist {
            url: "https://example.com/index.m3u8".to_string(),
        }
        .into();
        assert!(err.is_pre_work());
        assert!(!DownloadError::Cancelled.is_pre_work());
        assert!(DownloadError::key("k", "missing").is_pre_work());
    }

    #[test]
    fn remux_error_keeps_diagnostic_text() {
        let err: DownloadError = RemuxError::new("Invalid data found when processing input").into();
        assert_eq!(
            err.to_string(),
            "remux failed: Invalid data found when processing input"
        );
    }
}
