//! Error types for build-context
//!
//! This module provides the error taxonomy for the acquisition pipeline:
//! - Configuration errors (credentials, context address, settings)
//! - Fetch errors (network, authentication, remote service)
//! - Storage errors (local directory and file I/O)
//! - Extraction errors (malformed archives, unsafe entries, write failures)
//!
//! [`ContextError`] wraps any of these with the pipeline stage that failed and
//! the best-effort build-context directory, so callers can clean up.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;

/// Result type alias for build-context operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for build-context
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error: missing credentials, malformed context address or invalid settings
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key or environment variable at fault (e.g., "AZURE_STORAGE_ACCOUNT")
        key: Option<String>,
    },

    /// Remote transfer failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Local filesystem operation failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Archive could not be unpacked
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),
}

impl Error {
    /// Create a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Network, authentication and remote-service errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (connect, timeout, truncated body)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The storage service answered with an unexpected status
    #[error("{url} returned HTTP {status}{}", service_code_suffix(.code))]
    Status {
        /// HTTP status code
        status: u16,
        /// The resource URL that was requested
        url: String,
        /// Service error code from the `x-ms-error-code` header, if any
        code: Option<String>,
    },

    /// Fewer bytes arrived than the range asked for
    #[error("short read at offset {offset}: expected {expected} bytes, received {received}")]
    ShortRead {
        /// Start offset of the range
        offset: u64,
        /// Number of bytes requested
        expected: u64,
        /// Number of bytes received
        received: u64,
    },

    /// The `Content-Range` header was missing or unparseable
    #[error("invalid Content-Range header from {url}: {value:?}")]
    InvalidContentRange {
        /// The resource URL that was requested
        url: String,
        /// The raw header value, if present
        value: Option<String>,
    },

    /// The caller cancelled the transfer
    #[error("transfer cancelled")]
    Cancelled,

    /// The overall fetch deadline elapsed
    #[error("transfer timed out after {seconds}s")]
    TimedOut {
        /// Configured deadline in seconds
        seconds: u64,
    },
}

impl FetchError {
    /// Whether the service rejected the request's credentials
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, FetchError::Status { status: 401 | 403, .. })
    }
}

fn service_code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" ({c})"))
        .unwrap_or_default()
}

/// Local directory and file errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to create the build-context directory
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Failed to create or truncate the local archive file
    #[error("failed to create file {path}: {source}")]
    CreateFile {
        /// File that could not be created
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Failed to write a downloaded range into the archive file
    #[error("failed to write {path} at offset {offset}: {source}")]
    Write {
        /// File being written
        path: PathBuf,
        /// Offset of the failed write
        offset: u64,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Failed to remove stale entries before extraction
    #[error("failed to clean {path}: {source}")]
    Clean {
        /// Entry that could not be removed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

/// Archive extraction errors
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The archive file could not be opened
    #[error("failed to open archive {archive}: {source}")]
    Open {
        /// Archive path
        archive: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The archive stream is not a valid (compressed) tar
    #[error("corrupt archive {archive}: {reason}")]
    Corrupt {
        /// Archive path
        archive: PathBuf,
        /// The reason decoding failed
        reason: String,
    },

    /// An entry would land outside the destination directory
    #[error("unsafe entry path {path}: {reason}")]
    UnsafePath {
        /// The entry path as recorded in the archive
        path: PathBuf,
        /// Why the path was rejected
        reason: String,
    },

    /// Writing an entry to disk failed
    #[error("failed to unpack {path}: {reason}")]
    Entry {
        /// The entry path as recorded in the archive
        path: PathBuf,
        /// The reason unpacking failed
        reason: String,
    },

    /// The blocking extraction task panicked or was aborted
    #[error("extraction task failed: {0}")]
    TaskPanicked(String),
}

/// Failure of the acquisition pipeline
///
/// Carries the stage that failed and, once the fetch stage has started, the
/// build-context directory so the caller can remove partial artifacts.
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct ContextError {
    /// Stage that was running when the failure occurred
    pub stage: Stage,
    /// Best-effort build-context directory (None if the pipeline failed before choosing one)
    pub directory: Option<PathBuf>,
    /// The underlying error
    #[source]
    pub error: Error,
}

impl ContextError {
    /// Wrap an error raised by `stage`
    pub fn new(stage: Stage, directory: Option<PathBuf>, error: impl Into<Error>) -> Self {
        Self {
            stage,
            directory,
            error: error.into(),
        }
    }
}
