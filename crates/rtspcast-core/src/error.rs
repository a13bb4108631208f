use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Capture is already running")]
    AlreadyRunning,

    #[error("Operation cancelled")]
    OperationCancelled,

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Failures caused by the video source rather than by the caller or this process
    pub fn is_source_failure(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::Connection(_))
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Failure to hand something to a publisher sink. Never escalated past the service.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Transport error: {0}")]
    Transport(String),
}
