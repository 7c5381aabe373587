//! Error types for the Pilum library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`PilumError`] enum. Errors fall into three broad kinds (see [`ErrorKind`]):
//!
//! - **I/O**: device or permission faults raised by the storage layer. A caller
//!   higher up may decide to retry these.
//! - **Corruption**: a header, footer or checksum did not validate, or the
//!   persisted field attributes describe a state that cannot be satisfied.
//!   Retrying against the same bytes reproduces the same failure.
//! - **Consistency**: the caller asked for something that violates an
//!   invariant of the format (for example a file name that does not belong to
//!   its segment). These indicate programming errors.
//!
//! # Examples
//!
//! ```
//! use pilum::error::{ErrorKind, PilumError, Result};
//!
//! fn open_segment() -> Result<()> {
//!     Err(PilumError::corruption("checksum mismatch in _0.si"))
//! }
//!
//! match open_segment() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => assert_eq!(e.kind(), ErrorKind::Corruption),
//! }
//! ```

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for Pilum operations.
#[derive(Error, Debug)]
pub enum PilumError {
    /// I/O errors (file operations, device faults).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Persisted bytes failed validation.
    #[error("Corrupt index: {0}")]
    Corruption(String),

    /// An invariant of the on-disk format was violated by the caller.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Storage-related errors (missing files, closed storage).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid argument passed to an operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not permitted in the current state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON serialization errors (CLI output).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with PilumError.
pub type Result<T> = std::result::Result<T, PilumError>;

/// Coarse classification of a [`PilumError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Device, permission or missing-file faults.
    Io,
    /// Persisted data failed validation.
    Corruption,
    /// Programming or usage error.
    Consistency,
}

impl PilumError {
    /// Create a new corruption error.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        PilumError::Corruption(msg.into())
    }

    /// Create a new consistency error.
    pub fn consistency<S: Into<String>>(msg: S) -> Self {
        PilumError::Consistency(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        PilumError::Storage(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        PilumError::InvalidArgument(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        PilumError::InvalidOperation(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PilumError::Other(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        PilumError::Storage(format!("Not found: {}", msg.into()))
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PilumError::Io(_) | PilumError::Storage(_) => ErrorKind::Io,
            PilumError::Corruption(_) => ErrorKind::Corruption,
            PilumError::Consistency(_)
            | PilumError::InvalidArgument(_)
            | PilumError::InvalidOperation(_) => ErrorKind::Consistency,
            PilumError::Json(_) | PilumError::Other(_) | PilumError::Anyhow(_) => {
                ErrorKind::Consistency
            }
        }
    }

    /// Whether this error reports corrupt persisted data.
    pub fn is_corruption(&self) -> bool {
        self.kind() == ErrorKind::Corruption
    }
}
