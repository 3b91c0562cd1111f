use focusflow_core::FocusError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Focus(#[from] FocusError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Timer host stopped before replying")]
    HostGone,
}

pub type Result<T> = std::result::Result<T, CliError>;
