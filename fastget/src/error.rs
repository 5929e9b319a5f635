//! Error types for fastget.
//!
//! The taxonomy mirrors the stages of a download job:
//!
//! - [`ProbeError`]: the metadata request failed (fatal, before any file I/O)
//! - [`ChunkError`]: a single chunk transfer failed (transient or fatal)
//! - [`WriterError`]: the output file could not be written
//! - [`FetchError`]: top-level error returned to the caller

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for download operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Top-level error for a download job.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The job description is invalid (bad URL, header, path).
    #[error("invalid download job: {0}")]
    InvalidJob(String),

    /// The HTTP client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    HttpClient(String),

    /// The metadata request failed.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// A chunk failed fatally or exhausted its retries.
    #[error("chunk {index} failed after {attempts} attempt(s): {source}")]
    Chunk {
        index: usize,
        attempts: u32,
        #[source]
        source: ChunkError,
    },

    /// The output file could not be written.
    #[error(transparent)]
    Writer(#[from] WriterError),

    /// The finalized file does not have the expected size.
    #[error("size mismatch for {}: expected {expected} bytes, found {actual}", .path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// The job was cancelled by the caller.
    #[error("download cancelled")]
    Cancelled,

    /// The job exceeded its configured time limit.
    #[error("download timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    /// A worker task panicked or was aborted by the runtime.
    #[error("worker task failed: {0}")]
    WorkerPanicked(String),
}

impl FetchError {
    /// Returns the chunk error if this failure originated in a worker.
    pub fn chunk_error(&self) -> Option<&ChunkError> {
        match self {
            Self::Chunk { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors raised while probing the origin server.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The host could not be reached or the request failed in transit.
    #[error("failed to reach {url}: {reason}")]
    Unreachable { url: String, reason: String },

    /// The metadata request returned a non-success status.
    #[error("metadata request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// A response header could not be interpreted.
    #[error("malformed {name} header: {value:?}")]
    MalformedHeader { name: &'static str, value: String },
}

/// Errors raised by a single chunk transfer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkError {
    /// Connecting or waiting for the next body read took too long.
    #[error("request timed out")]
    Timeout,

    /// The connection failed or was reset.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered with a 5xx (or 408/429) status.
    #[error("server returned status {0}")]
    RetryableStatus(u16),

    /// The server answered with a non-retryable 4xx status.
    #[error("request rejected with status {0}")]
    Rejected(u16),

    /// The server answered with a status that does not fit the request.
    #[error("unexpected status {0} for ranged request")]
    UnexpectedStatus(u16),

    /// The response framing does not match the requested range.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The body ended before the requested range was complete.
    #[error("body ended after {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    /// A transient failure hit a transfer that cannot resume mid-body.
    #[error("transfer cannot resume without range support: {0}")]
    NotResumable(String),
}

impl ChunkError {
    /// Whether the owning worker should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection(_) | Self::RetryableStatus(_) | Self::Truncated { .. }
        )
    }

    /// Classify an HTTP status code that is not an acceptable answer.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 429 | 500..=599 => Self::RetryableStatus(status),
            400..=499 => Self::Rejected(status),
            _ => Self::UnexpectedStatus(status),
        }
    }
}

impl From<reqwest::Error> for ChunkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16())
        } else {
            Self::Connection(e.to_string())
        }
    }
}

/// Errors raised by the output file writer.
#[derive(Debug, Error)]
pub enum WriterError {
    /// The output file or its parent directory could not be created.
    #[error("failed to create {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A positional write failed.
    #[error("failed to write {} at offset {offset}: {source}", .path.display())]
    Write {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Flushing or inspecting the file failed.
    #[error("failed to flush {}: {source}", .path.display())]
    Flush {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A write would extend past the expected file length.
    #[error("write of {len} bytes at offset {offset} exceeds file length {total}")]
    OutOfBounds { offset: u64, len: u64, total: u64 },

    /// A sequential write did not start at the current end of file.
    #[error("sequential write at offset {actual}, expected {expected}")]
    OffsetMismatch { expected: u64, actual: u64 },

    /// The blocking write task was lost.
    #[error("write task failed: {0}")]
    Task(String),
}
