//! Wire-level error types

use thiserror::Error;

/// Errors produced while packing or parsing stream buffers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Destination or source slice has the wrong length for the operation
    #[error("buffer length mismatch: needed {needed} bytes, got {available}")]
    LengthMismatch { needed: usize, available: usize },

    /// Sample slice does not hold whole I/Q pairs
    #[error("sample slice length {0} is not a whole number of I/Q pairs")]
    UnpairedSamples(usize),

    /// Buffer too short to contain a metadata header
    #[error("truncated metadata header: expected {expected} bytes, got {actual}")]
    TruncatedHeader { expected: usize, actual: usize },
}

/// Type alias for wire results
pub type Result<T> = std::result::Result<T, WireError>;
