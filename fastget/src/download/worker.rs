//! Chunk workers.
//!
//! Each chunk is fetched by one worker task. A worker issues a GET scoped
//! to its remaining range, buffers the body and writes it into its own
//! region of the output file. Transient failures are retried from the
//! first byte not yet on disk, so nothing already written is transferred
//! again.
//!
//! # Attempt lifecycle
//!
//! ```text
//! send ──► check status/Content-Range ──► read ──► buffer ──► write_at
//!   │                                       │                   │
//!   └──── transient error ◄─────────────────┘     confirmed += len
//!            │
//!            ├─ attempts left: backoff, resume at start + confirmed
//!            └─ exhausted:   Failed
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use reqwest::header::{HeaderMap, CONTENT_RANGE};
use reqwest::{Client, Response, StatusCode, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::http::{self, range_value};
use super::plan::{Chunk, TransferMode};
use super::probe::ContentRange;
use super::progress::{DownloadEvent, EventSink, WorkerOutcomeSummary};
use super::retry::RetryPolicy;
use super::state::{ChunkBoard, ChunkStatus};
use super::writer::OutputFile;
use crate::error::{ChunkError, FetchError, WriterError};

/// Everything a worker needs, shared by all workers of a job.
#[derive(Debug)]
pub struct WorkerContext {
    pub client: Client,
    pub url: Url,
    pub headers: HeaderMap,
    pub output: Arc<OutputFile>,
    pub board: Arc<ChunkBoard>,
    pub events: EventSink,
    pub retry: RetryPolicy,
    pub read_timeout: Duration,
    pub buffer_size: usize,
    pub mode: TransferMode,
    /// Total resource length, when known.
    pub total_length: Option<u64>,
    /// Whether the server honours `Range`, i.e. a transfer can resume.
    pub resumable: bool,
    pub cancel: CancellationToken,
}

/// Terminal outcome of one chunk.
#[derive(Debug)]
pub enum WorkerOutcome {
    Completed { bytes: u64 },
    Failed(FetchError),
    Cancelled,
}

impl WorkerOutcome {
    /// Cloneable summary for events.
    pub fn summary(&self) -> WorkerOutcomeSummary {
        match self {
            WorkerOutcome::Completed { bytes } => WorkerOutcomeSummary::Completed { bytes: *bytes },
            WorkerOutcome::Failed(e) => WorkerOutcomeSummary::Failed {
                reason: e.to_string(),
            },
            WorkerOutcome::Cancelled => WorkerOutcomeSummary::Cancelled,
        }
    }
}

/// Result of one chunk's execution.
#[derive(Debug)]
pub struct WorkerResult {
    pub index: usize,
    /// Attempts made, the first included.
    pub attempts: u32,
    pub outcome: WorkerOutcome,
}

enum AttemptError {
    Chunk(ChunkError),
    Writer(WriterError),
}

impl From<ChunkError> for AttemptError {
    fn from(e: ChunkError) -> Self {
        AttemptError::Chunk(e)
    }
}

/// Fetch `chunk` into the output file.
pub async fn fetch_chunk(ctx: Arc<WorkerContext>, chunk: Chunk) -> WorkerResult {
    ctx.board.set_status(chunk.index, ChunkStatus::InFlight);
    ctx.events.emit(DownloadEvent::WorkerStarted {
        worker: chunk.index,
        assigned_length: chunk.length,
    });

    let (attempts, outcome) = run(&ctx, &chunk).await;

    let status = match &outcome {
        WorkerOutcome::Completed { .. } => ChunkStatus::Done,
        WorkerOutcome::Failed(_) => ChunkStatus::Failed,
        WorkerOutcome::Cancelled => ChunkStatus::Cancelled,
    };
    ctx.board.set_status(chunk.index, status);
    ctx.events.emit(DownloadEvent::WorkerFinished {
        worker: chunk.index,
        outcome: outcome.summary(),
    });

    WorkerResult {
        index: chunk.index,
        attempts,
        outcome,
    }
}

async fn run(ctx: &WorkerContext, chunk: &Chunk) -> (u32, WorkerOutcome) {
    if chunk.is_empty() {
        return (0, WorkerOutcome::Completed { bytes: 0 });
    }

    let mut confirmed = 0u64;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            result = transfer(ctx, chunk, &mut confirmed) => Some(result),
        };

        let error = match result {
            None => {
                debug!(chunk = chunk.index, confirmed, "Worker cancelled");
                return (attempt, WorkerOutcome::Cancelled);
            }
            Some(Ok(())) => {
                debug!(chunk = chunk.index, bytes = confirmed, attempt, "Chunk complete");
                return (attempt, WorkerOutcome::Completed { bytes: confirmed });
            }
            Some(Err(AttemptError::Writer(e))) => {
                error!(chunk = chunk.index, error = %e, "Write failed");
                return (attempt, WorkerOutcome::Failed(FetchError::Writer(e)));
            }
            Some(Err(AttemptError::Chunk(e))) => e,
        };

        let error = if error.is_transient() && !ctx.resumable && confirmed > 0 {
            ChunkError::NotResumable(error.to_string())
        } else {
            error
        };

        let delay = if error.is_transient() {
            ctx.retry.delay_for_attempt(attempt)
        } else {
            None
        };

        let Some(delay) = delay else {
            error!(
                chunk = chunk.index,
                attempt,
                confirmed,
                error = %error,
                "Chunk failed"
            );
            return (
                attempt,
                WorkerOutcome::Failed(FetchError::Chunk {
                    index: chunk.index,
                    attempts: attempt,
                    source: error,
                }),
            );
        };

        let resume_offset = chunk.start + confirmed;
        warn!(
            chunk = chunk.index,
            attempt,
            resume_offset,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient error, retrying"
        );
        ctx.events.emit(DownloadEvent::WorkerRetry {
            worker: chunk.index,
            attempt,
            delay,
            resume_offset,
            reason: error,
        });

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return (attempt, WorkerOutcome::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One request for the unfetched remainder of `chunk`.
async fn transfer(
    ctx: &WorkerContext,
    chunk: &Chunk,
    confirmed: &mut u64,
) -> Result<(), AttemptError> {
    let offset = chunk.start + *confirmed;
    let remaining = chunk.length.map(|len| len - *confirmed);

    let range = match ctx.mode {
        TransferMode::Ranged => Some(range_value(offset, chunk.end())),
        TransferMode::SingleStream if *confirmed > 0 => Some(range_value(offset, chunk.end())),
        TransferMode::SingleStream => None,
    };
    let ranged = range.is_some();

    debug!(chunk = chunk.index, offset, range = ?range, "Requesting chunk");

    let request = http::get(&ctx.client, &ctx.url, &ctx.headers, range);
    let mut response = tokio::time::timeout(ctx.read_timeout, request.send())
        .await
        .map_err(|_| ChunkError::Timeout)?
        .map_err(ChunkError::from)?;

    let covers_resource = chunk.start == 0 && chunk.length == ctx.total_length;
    accept_response(&response, offset, ranged, covers_resource)?;

    let mut buffer = BytesMut::with_capacity(ctx.buffer_size);
    let mut received = *confirmed;

    loop {
        let next = match tokio::time::timeout(ctx.read_timeout, response.chunk()).await {
            Err(_) => Err(ChunkError::Timeout),
            Ok(result) => result.map_err(ChunkError::from),
        };

        match next {
            Ok(Some(bytes)) => {
                received += bytes.len() as u64;
                if let Some(len) = chunk.length {
                    if received > len {
                        return Err(ChunkError::MalformedResponse(format!(
                            "body exceeds requested range of {} bytes",
                            remaining.unwrap_or(len)
                        ))
                        .into());
                    }
                }
                buffer.extend_from_slice(&bytes);
                if buffer.len() >= ctx.buffer_size {
                    flush(ctx, chunk, confirmed, &mut buffer).await?;
                }
            }
            Ok(None) => {
                flush(ctx, chunk, confirmed, &mut buffer).await?;
                return match chunk.length {
                    Some(len) if *confirmed < len => Err(ChunkError::Truncated {
                        received: *confirmed,
                        expected: len,
                    }
                    .into()),
                    _ => Ok(()),
                };
            }
            Err(e) => {
                // Keep what already arrived so the retry resumes after it.
                flush(ctx, chunk, confirmed, &mut buffer).await?;
                return Err(e.into());
            }
        }
    }
}

/// Write buffered bytes at the chunk's confirmed offset.
async fn flush(
    ctx: &WorkerContext,
    chunk: &Chunk,
    confirmed: &mut u64,
    buffer: &mut BytesMut,
) -> Result<(), AttemptError> {
    if buffer.is_empty() {
        return Ok(());
    }

    let data = buffer.split().freeze();
    let len = data.len() as u64;
    ctx.output
        .write_at(chunk.start + *confirmed, data)
        .await
        .map_err(AttemptError::Writer)?;

    *confirmed += len;
    ctx.board.set_bytes(chunk.index, *confirmed);
    ctx.events.emit(DownloadEvent::WorkerProgress {
        worker: chunk.index,
        bytes_so_far: *confirmed,
    });
    Ok(())
}

fn accept_response(
    response: &Response,
    offset: u64,
    ranged: bool,
    covers_resource: bool,
) -> Result<(), ChunkError> {
    let content_range = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok());
    check_status(response.status(), content_range, offset, ranged, covers_resource)
}

/// Decide whether a response status fits the request that produced it.
///
/// A ranged request must get `206` with a `Content-Range` starting at the
/// requested offset. A `200` is only usable when the request started at
/// byte 0 and the chunk spans the whole resource.
fn check_status(
    status: StatusCode,
    content_range: Option<&str>,
    offset: u64,
    ranged: bool,
    covers_resource: bool,
) -> Result<(), ChunkError> {
    match status {
        StatusCode::PARTIAL_CONTENT if ranged => {
            let value = content_range.ok_or_else(|| {
                ChunkError::MalformedResponse("206 without Content-Range".to_string())
            })?;
            let range = ContentRange::parse(value).ok_or_else(|| {
                ChunkError::MalformedResponse(format!("invalid Content-Range {:?}", value))
            })?;
            if range.start != offset {
                return Err(ChunkError::MalformedResponse(format!(
                    "Content-Range starts at {}, requested {}",
                    range.start, offset
                )));
            }
            Ok(())
        }
        StatusCode::OK if !ranged || (offset == 0 && covers_resource) => Ok(()),
        s if s.is_success() => Err(ChunkError::UnexpectedStatus(s.as_u16())),
        s => Err(ChunkError::from_status(s.as_u16())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_content_accepted_at_offset() {
        assert!(check_status(
            StatusCode::PARTIAL_CONTENT,
            Some("bytes 250000-499999/1000000"),
            250_000,
            true,
            false
        )
        .is_ok());
    }

    #[test]
    fn test_partial_content_offset_mismatch_is_fatal() {
        let err = check_status(
            StatusCode::PARTIAL_CONTENT,
            Some("bytes 0-499999/1000000"),
            250_000,
            true,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ChunkError::MalformedResponse(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_partial_content_without_header_is_fatal() {
        assert!(matches!(
            check_status(StatusCode::PARTIAL_CONTENT, None, 0, true, false),
            Err(ChunkError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_full_body_only_for_whole_resource() {
        assert!(check_status(StatusCode::OK, None, 0, true, true).is_ok());
        assert!(check_status(StatusCode::OK, None, 0, false, false).is_ok());
        assert_eq!(
            check_status(StatusCode::OK, None, 0, true, false),
            Err(ChunkError::UnexpectedStatus(200))
        );
        assert_eq!(
            check_status(StatusCode::OK, None, 500, true, true),
            Err(ChunkError::UnexpectedStatus(200))
        );
    }

    #[test]
    fn test_unrequested_partial_content_rejected() {
        assert_eq!(
            check_status(
                StatusCode::PARTIAL_CONTENT,
                Some("bytes 0-9/10"),
                0,
                false,
                true
            ),
            Err(ChunkError::UnexpectedStatus(206))
        );
    }

    #[test]
    fn test_error_statuses_classified() {
        assert_eq!(
            check_status(StatusCode::INTERNAL_SERVER_ERROR, None, 0, true, false),
            Err(ChunkError::RetryableStatus(500))
        );
        assert_eq!(
            check_status(StatusCode::FORBIDDEN, None, 0, true, false),
            Err(ChunkError::Rejected(403))
        );
    }

    #[test]
    fn test_outcome_summary() {
        assert_eq!(
            WorkerOutcome::Completed { bytes: 10 }.summary(),
            WorkerOutcomeSummary::Completed { bytes: 10 }
        );
        assert_eq!(
            WorkerOutcome::Cancelled.summary(),
            WorkerOutcomeSummary::Cancelled
        );
        assert!(matches!(
            WorkerOutcome::Failed(FetchError::Cancelled).summary(),
            WorkerOutcomeSummary::Failed { .. }
        ));
    }
}
