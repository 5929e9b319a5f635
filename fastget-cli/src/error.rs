//! CLI error type.

use fastget::config::ConfigError;
use fastget::logging::LogError;
use fastget::{ChunkError, FetchError};
use thiserror::Error;

/// Errors surfaced to the user by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Bad command-line input.
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Download(#[from] FetchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LogError),

    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("failed to set signal handler: {0}")]
    Signal(String),

    #[error("failed to encode summary: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage(_) | CliError::Download(FetchError::InvalidJob(_)) => 2,
            CliError::Download(FetchError::Cancelled) => 130,
            _ => 1,
        }
    }

    /// Follow-up advice for failures the user can work around.
    pub fn hint(&self) -> Option<&'static str> {
        let CliError::Download(e) = self else {
            return None;
        };
        match e.chunk_error()? {
            ChunkError::NotResumable(_) => {
                Some("the server does not support ranges, so an interrupted transfer restarts from scratch")
            }
            ChunkError::Rejected(401 | 403) => Some("check the credentials passed with -H"),
            c if c.is_transient() => Some("the server kept failing; try again or raise --retries"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Usage("bad".to_string()).exit_code(), 2);
        assert_eq!(
            CliError::Download(FetchError::InvalidJob("x".to_string())).exit_code(),
            2
        );
        assert_eq!(CliError::Download(FetchError::Cancelled).exit_code(), 130);
        assert_eq!(
            CliError::Signal("already set".to_string()).exit_code(),
            1
        );
    }

    #[test]
    fn test_hint_for_chunk_failures() {
        let chunk = |source| {
            CliError::Download(FetchError::Chunk {
                index: 0,
                attempts: 5,
                source,
            })
        };

        assert!(chunk(ChunkError::RetryableStatus(503))
            .hint()
            .unwrap()
            .contains("--retries"));
        assert!(chunk(ChunkError::Rejected(401)).hint().unwrap().contains("-H"));
        assert!(chunk(ChunkError::NotResumable("reset".to_string()))
            .hint()
            .is_some());
        assert_eq!(chunk(ChunkError::UnexpectedStatus(200)).hint(), None);
        assert_eq!(CliError::Download(FetchError::Cancelled).hint(), None);
    }
}
