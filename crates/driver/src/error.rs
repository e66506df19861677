//! Driver error types

use thiserror::Error;

/// Errors surfaced by device and stream operations
#[derive(Debug, Error)]
pub enum Error {
    /// Allocation failure during stream setup
    #[error("allocation failed: {0}")]
    Memory(String),

    /// Transfer submission or completion failed at the backend
    #[error("USB I/O error: {0}")]
    Io(String),

    /// No completion within the configured bound
    #[error("operation timed out")]
    Timeout,

    /// The backend returned a result the driver cannot interpret
    #[error("unexpected backend result: {0}")]
    Unexpected(String),

    /// Operation not valid in the current stream/device state
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Caller-supplied argument rejected before touching the device
    #[error("invalid argument: {0}")]
    InvalidParam(&'static str),

    /// No device matched the probe criteria, or the device went away
    #[error("no matching device found")]
    NoDevice,

    /// The requested backend is not in the registry
    #[error("backend {0} is not registered")]
    NoBackend(crate::backend::BackendId),

    /// Malformed sample or metadata framing
    #[error(transparent)]
    Wire(#[from] wire::WireError),
}

/// Coarse classification recorded on a stream when its loop terminates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Memory,
    Io,
    Timeout,
    Unexpected,
    InvalidState,
}

impl Error {
    /// Classify this error for stream bookkeeping
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Memory(_) => ErrorKind::Memory,
            Error::Timeout => ErrorKind::Timeout,
            Error::Unexpected(_) => ErrorKind::Unexpected,
            Error::InvalidState(_) | Error::InvalidParam(_) => ErrorKind::InvalidState,
            _ => ErrorKind::Io,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Memory => Error::Memory("stream setup failed".to_string()),
            ErrorKind::Io => Error::Io("stream terminated".to_string()),
            ErrorKind::Timeout => Error::Timeout,
            ErrorKind::Unexpected => Error::Unexpected("stream terminated".to_string()),
            ErrorKind::InvalidState => Error::InvalidState("stream terminated"),
        }
    }
}

/// Type alias for driver results
pub type Result<T> = std::result::Result<T, Error>;
