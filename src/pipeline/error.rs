use thiserror::Error;

use crate::device::error::DeviceError;
use crate::pipeline::capture::PipelineState;

/// A failure delivering to the presentation sink. Logged and suppressed by
/// the capture worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("presentation failed: {0}")]
pub struct PresentationError(pub String);

/// Capture pipeline errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: PipelineState,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Presentation(#[from] PresentationError),

    #[error("failed to spawn capture worker: {0}")]
    Spawn(String),

    #[error("capture worker did not exit within {0:?}")]
    WorkerStalled(std::time::Duration),

    #[error("capture worker panicked")]
    WorkerPanicked,
}

/// Coarse error taxonomy used to decide recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lifecycle call from the wrong state; the caller can retry.
    InvalidState,
    /// The session is over; the device has been or must be released.
    Device,
    /// A dropped UI refresh; never fatal.
    Presentation,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Presentation(_) => ErrorKind::Presentation,
            Self::Device(_)
            | Self::Spawn(_)
            | Self::WorkerStalled(_)
            | Self::WorkerPanicked => ErrorKind::Device,
        }
    }

    /// Whether the error ends the current capture session.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Device
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
