use thiserror::Error;

/// Capture device errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("device failed to open: {0}")]
    Open(String),

    #[error("failed to start capture: {0}")]
    Start(String),

    #[error("failed to stop capture: {0}")]
    Stop(String),

    #[error("failed to close device: {0}")]
    Close(String),

    #[error("statistics query failed: {0}")]
    Statistics(String),

    #[error("capture stopped abnormally: {0}")]
    AbnormalStop(String),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, DeviceError>;

