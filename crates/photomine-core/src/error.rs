//! Error types for photomine.
//!
//! Errors fall into two groups. Discovery-level failures (`ConnectionUnavailable`)
//! are escalated to the registry's availability state. Everything scoped to one
//! device, one subtree or one record is absorbed by the caller and reported as a
//! diagnostic instead of aborting the surrounding operation.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the photomine library.
#[derive(Debug, Error)]
pub enum MinerError {
    // Discovery errors
    #[error("Discovery daemon unavailable: {message}")]
    ConnectionUnavailable { message: String },

    #[error("Device unreachable at {path}: {message}")]
    DeviceUnreachable { path: String, message: String },

    // Crawl errors
    #[error("Search failed on {device}: {message}")]
    SearchFailed { device: String, message: String },

    #[error("Listing children of {container} failed: {message}")]
    ListChildrenFailed { container: String, message: String },

    #[error("Malformed record at {path}: {reason}")]
    MalformedRecord { path: String, reason: String },

    #[error("Maximum depth {max_depth} exceeded at {container}")]
    DepthExceeded { container: String, max_depth: usize },

    #[error("Operation was cancelled")]
    Cancelled,

    // Collaborator errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for photomine operations.
pub type Result<T> = std::result::Result<T, MinerError>;

impl From<std::io::Error> for MinerError {
    fn from(err: std::io::Error) -> Self {
        MinerError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for MinerError {
    fn from(err: rusqlite::Error) -> Self {
        MinerError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl MinerError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        MinerError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Build a `MalformedRecord` error.
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        MinerError::MalformedRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error came from a cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MinerError::Cancelled)
    }

    /// Returns true for failures that mean part of a device's content was not seen.
    ///
    /// Malformed records are excluded: the rest of their batch was still read.
    pub fn loses_content(&self) -> bool {
        matches!(
            self,
            MinerError::SearchFailed { .. }
                | MinerError::ListChildrenFailed { .. }
                | MinerError::DepthExceeded { .. }
                | MinerError::Cancelled
        )
    }
}
