//! Error types for doclog
//!
//! One error enum is shared by every crate in the workspace. Format-level
//! errors (frame decoding, segment names) live next to their formats and
//! convert into [`Error`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for doclog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the log engine
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, renames, directory scans)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (bad magic, checksum mismatch)
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A record failed validation (missing docid, pre-assigned id, ...)
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// A file name could not be parsed as a segment name
    #[error("Invalid segment name: {0}")]
    InvalidSegmentName(String),

    /// An index code is not usable as a tenant directory name
    #[error("Invalid index code: {0:?}")]
    InvalidIndexCode(String),

    /// A page token could not be decoded or is inconsistent
    #[error("Invalid page token: {0}")]
    InvalidToken(String),

    /// A process or segment lock is held by someone else
    #[error("Lock already held: {path}")]
    AlreadyLocked {
        /// Lock file (or segment file) that could not be locked
        path: PathBuf,
    },

    /// An internal invariant does not hold (programming error)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A segment expected to exist is gone
    #[error("Segment vanished: {0}")]
    SegmentVanished(String),

    /// The safe-to-read marker is absent; reads and compaction are disabled
    #[error("Log root is not safe to read yet")]
    NotReady,

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Error::Serialization(msg.into())
    }

    /// Create a corruption error
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create an invalid record error
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Error::InvalidRecord(msg.into())
    }

    /// Create an invalid token error
    pub fn invalid_token(msg: impl Into<String>) -> Self {
        Error::InvalidToken(msg.into())
    }

    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }

    /// Create a vanished segment error
    pub fn vanished(msg: impl Into<String>) -> Self {
        Error::SegmentVanished(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether a caller may reasonably retry the same call later.
    ///
    /// I/O failures, a replica that is not caught up yet and segments that
    /// disappeared under a concurrent cleanup are transient. Validation and
    /// invariant errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::NotReady | Error::SegmentVanished(_) | Error::AlreadyLocked { .. }
        )
    }
}
