use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download error: {0}")]
    Download(#[from] vodfetch_engine::DownloadError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{failed} of {total} downloads failed")]
    JobsFailed { failed: usize, total: usize },

    #[error("Download cancelled")]
    Cancelled,
}

impl AppError {
    /// Process exit status: 2 for a user cancellation, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => 2,
            _ => 1,
        }
    }
}
