//! Download orchestrator.
//!
//! Drives one job through `Init → Probing → Planning → Downloading →
//! Finalizing → Done`, failing into `Failed` from any earlier state. The
//! orchestrator owns all per-job state, so several jobs can run on the
//! same [`Downloader`] concurrently.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::http;
use super::job::DownloadJob;
use super::plan::{Plan, TransferMode};
use super::probe::{probe, ContentInfo};
use super::progress::{DownloadEvent, EventSink, ProgressReporter};
use super::state::{ChunkBoard, ChunkStatus, JobState};
use super::worker::{fetch_chunk, WorkerContext, WorkerOutcome};
use super::writer::OutputFile;
use crate::config::DownloadConfig;
use crate::error::{FetchError, FetchResult};

/// Summary of a successful download.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    /// Path of the completed file.
    pub path: PathBuf,
    /// Wall time from start to finalize.
    pub elapsed: Duration,
    /// Final file size.
    pub bytes_written: u64,
    /// What the probe reported.
    pub content_info: ContentInfo,
    /// How the content was transferred.
    pub mode: TransferMode,
    /// Number of workers used.
    pub workers: usize,
}

/// Chunked HTTP downloader.
///
/// Cheap to clone; clones share the HTTP connection pool.
#[derive(Debug, Clone)]
pub struct Downloader {
    config: DownloadConfig,
    client: Client,
}

impl Downloader {
    /// Create a downloader.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::HttpClient`] if the HTTP client cannot be built.
    pub fn new(config: DownloadConfig) -> FetchResult<Self> {
        let client = http::build_client(&config)?;
        Ok(Self { config, client })
    }

    /// Configuration in use.
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Spawn `job` on the current tokio runtime.
    ///
    /// Events stream through the returned handle until the job settles.
    pub fn start(&self, job: DownloadJob) -> DownloadHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let downloader = self.clone();
        let token = cancel.clone();
        let task =
            tokio::spawn(async move { downloader.run(&job, EventSink::new(tx), token).await });

        DownloadHandle {
            events: rx,
            cancel,
            task,
        }
    }

    /// Download without observing events.
    pub async fn download(&self, job: &DownloadJob) -> FetchResult<DownloadResult> {
        self.run(job, EventSink::disabled(), CancellationToken::new())
            .await
    }

    /// Run `job` to completion.
    ///
    /// Cancelling `cancel` stops every worker at its next I/O point and
    /// fails the job with [`FetchError::Cancelled`]. When the configured
    /// job timeout elapses the same happens, reported as
    /// [`FetchError::TimedOut`].
    pub async fn run(
        &self,
        job: &DownloadJob,
        events: EventSink,
        cancel: CancellationToken,
    ) -> FetchResult<DownloadResult> {
        let job_cancel = cancel.child_token();
        let deadline_hit = Arc::new(AtomicBool::new(false));

        let watchdog = self.config.job_timeout.map(|limit| {
            let token = job_cancel.clone();
            let flag = Arc::clone(&deadline_hit);
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        warn!(timeout_secs = limit.as_secs(), "Job deadline reached, cancelling");
                        flag.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                }
            })
        });

        let result = self.execute(job, &events, &job_cancel).await;

        job_cancel.cancel();
        if let Some(watchdog) = watchdog {
            let _ = watchdog.await;
        }

        match (result, self.config.job_timeout) {
            (Err(FetchError::Cancelled), Some(limit)) if deadline_hit.load(Ordering::SeqCst) => {
                Err(FetchError::TimedOut(limit))
            }
            (result, _) => result,
        }
    }

    async fn execute(
        &self,
        job: &DownloadJob,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> FetchResult<DownloadResult> {
        let started = Instant::now();
        let mut lifecycle = Lifecycle::new(events);

        lifecycle.advance(JobState::Probing);
        let headers = lifecycle.check(http::header_map(job.headers()))?;

        let probed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = probe(&self.client, job.url(), &headers) => result.map_err(FetchError::from),
        };
        let info = lifecycle.check(probed)?;
        info!(
            url = %job.url(),
            total_length = ?info.total_length,
            supports_ranges = info.supports_ranges,
            "Probed content"
        );
        events.emit(DownloadEvent::Probed(info));

        lifecycle.advance(JobState::Planning);
        let requested = job.workers().unwrap_or(self.config.workers);
        let plan = Plan::for_content(&info, requested);
        if plan.workers() < requested {
            debug!(
                requested,
                planned = plan.workers(),
                mode = ?plan.mode,
                "Worker count reduced"
            );
        }
        events.emit(DownloadEvent::BeforeStart {
            total_size: plan.total_length,
            chunk_length: plan.chunk_length(),
            workers: plan.workers(),
        });

        let output = lifecycle.check(
            OutputFile::create(job.output(), plan.total_length)
                .await
                .map_err(FetchError::from),
        )?;
        let output = Arc::new(output);

        lifecycle.advance(JobState::Downloading);
        let downloaded = self
            .download_chunks(job, &plan, &info, headers, &output, events, cancel)
            .await;
        if let Err(e) = downloaded {
            return Err(self.abandon(&mut lifecycle, &output, e).await);
        }

        lifecycle.advance(JobState::Finalizing);
        let size = match output.finalize().await {
            Ok(size) => size,
            Err(e) => return Err(self.abandon(&mut lifecycle, &output, e).await),
        };

        lifecycle.advance(JobState::Done);
        let elapsed = started.elapsed();
        info!(
            path = %job.output().display(),
            bytes = size,
            elapsed_ms = elapsed.as_millis() as u64,
            workers = plan.workers(),
            "Download finished"
        );

        Ok(DownloadResult {
            path: job.output().to_path_buf(),
            elapsed,
            bytes_written: size,
            content_info: info,
            mode: plan.mode,
            workers: plan.workers(),
        })
    }

    /// Fan out one worker per chunk and wait for all of them.
    ///
    /// The first failure cancels the remaining workers.
    #[allow(clippy::too_many_arguments)]
    async fn download_chunks(
        &self,
        job: &DownloadJob,
        plan: &Plan,
        info: &ContentInfo,
        headers: reqwest::header::HeaderMap,
        output: &Arc<OutputFile>,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> FetchResult<u64> {
        let board = Arc::new(ChunkBoard::new(plan.workers()));
        let reporter = self.config.progress_interval.map(|interval| {
            ProgressReporter::start(
                Arc::clone(&board),
                plan.total_length,
                events.clone(),
                interval,
            )
        });

        let workers_cancel = cancel.child_token();
        let ctx = Arc::new(WorkerContext {
            client: self.client.clone(),
            url: job.url().clone(),
            headers,
            output: Arc::clone(output),
            board: Arc::clone(&board),
            events: events.clone(),
            retry: self.config.retry.clone(),
            read_timeout: self.config.read_timeout,
            buffer_size: self.config.buffer_size,
            mode: plan.mode,
            total_length: plan.total_length,
            resumable: info.supports_ranges,
            cancel: workers_cancel.clone(),
        });

        let mut workers = JoinSet::new();
        for chunk in plan.chunks.iter().copied() {
            workers.spawn(fetch_chunk(Arc::clone(&ctx), chunk));
        }
        drop(ctx);

        let mut first_error = None;
        let mut cancelled = false;
        let mut written = 0u64;

        while let Some(joined) = workers.join_next().await {
            let failure = match joined {
                Ok(result) => match result.outcome {
                    WorkerOutcome::Completed { bytes } => {
                        debug!(
                            chunk = result.index,
                            attempts = result.attempts,
                            bytes,
                            "Chunk completed"
                        );
                        written += bytes;
                        None
                    }
                    WorkerOutcome::Cancelled => {
                        cancelled = true;
                        None
                    }
                    WorkerOutcome::Failed(e) => Some((result.index, e)),
                },
                Err(e) => Some((usize::MAX, FetchError::WorkerPanicked(e.to_string()))),
            };

            if let Some((index, e)) = failure {
                if first_error.is_none() {
                    warn!(chunk = index, error = %e, "Chunk failed, cancelling remaining workers");
                    workers_cancel.cancel();
                    first_error = Some(e);
                }
            }
        }

        if let Some(reporter) = reporter {
            reporter.stop().await;
        }

        match first_error {
            Some(e) => Err(e),
            None if cancelled || !board.all_done() => {
                let unfinished = unfinished_chunks(&board);
                debug!(?unfinished, "Workers stopped before finishing");
                Err(FetchError::Cancelled)
            }
            None => Ok(written),
        }
    }

    /// Move to `Failed` and drop the partial file.
    async fn abandon(
        &self,
        lifecycle: &mut Lifecycle<'_>,
        output: &OutputFile,
        error: FetchError,
    ) -> FetchError {
        lifecycle.fail(&error);
        if !self.config.keep_partial {
            output.discard().await;
        }
        error
    }
}

/// Indices of chunks that did not reach `Done`.
fn unfinished_chunks(board: &ChunkBoard) -> Vec<usize> {
    (0..board.len())
        .filter(|&i| board.status(i) != Some(ChunkStatus::Done))
        .collect()
}

/// Live handle to a spawned download.
pub struct DownloadHandle {
    events: mpsc::UnboundedReceiver<DownloadEvent>,
    cancel: CancellationToken,
    task: JoinHandle<FetchResult<DownloadResult>>,
}

impl DownloadHandle {
    /// Next event, or `None` once the job has settled and all events
    /// were delivered.
    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        self.events.recv().await
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this job when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the job to settle. Undelivered events are dropped.
    pub async fn wait(self) -> FetchResult<DownloadResult> {
        self.task
            .await
            .map_err(|e| FetchError::WorkerPanicked(e.to_string()))?
    }
}

/// Tracks and announces job state transitions.
struct Lifecycle<'a> {
    state: JobState,
    events: &'a EventSink,
}

impl<'a> Lifecycle<'a> {
    fn new(events: &'a EventSink) -> Self {
        Self {
            state: JobState::Init,
            events,
        }
    }

    fn advance(&mut self, to: JobState) {
        debug_assert!(
            self.state.can_transition_to(to),
            "invalid transition {} -> {}",
            self.state,
            to
        );
        info!(from = %self.state, to = %to, "Job state changed");
        self.events.emit(DownloadEvent::StateChanged {
            from: self.state,
            to,
        });
        self.state = to;
    }

    fn fail(&mut self, error: &FetchError) {
        if self.state.is_terminal() {
            return;
        }
        if self.state.can_transition_to(JobState::Failed) {
            warn!(from = %self.state, error = %error, "Job failed");
            self.events.emit(DownloadEvent::StateChanged {
                from: self.state,
                to: JobState::Failed,
            });
            self.state = JobState::Failed;
        }
    }

    /// Pass `result` through, moving to `Failed` on error.
    fn check<T>(&mut self, result: FetchResult<T>) -> FetchResult<T> {
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_emits_transitions() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let mut lifecycle = Lifecycle::new(&sink);

        lifecycle.advance(JobState::Probing);
        lifecycle.fail(&FetchError::Cancelled);
        lifecycle.fail(&FetchError::Cancelled);

        assert_eq!(
            rx.try_recv().unwrap(),
            DownloadEvent::StateChanged {
                from: JobState::Init,
                to: JobState::Probing
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            DownloadEvent::StateChanged {
                from: JobState::Probing,
                to: JobState::Failed
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_lifecycle_ignores_failure_after_done() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let mut lifecycle = Lifecycle::new(&sink);
        lifecycle.state = JobState::Done;

        lifecycle.fail(&FetchError::Cancelled);

        assert_eq!(lifecycle.state, JobState::Done);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unfinished_chunks_lists_pending_and_cancelled() {
        let board = ChunkBoard::new(4);
        board.set_status(0, ChunkStatus::Done);
        board.set_status(1, ChunkStatus::Cancelled);
        board.set_status(2, ChunkStatus::Done);

        assert_eq!(unfinished_chunks(&board), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_invalid_host_fails_probe_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let job = DownloadJob::new("http://127.0.0.1:1/file.bin", &path).unwrap();

        let downloader = Downloader::new(DownloadConfig::default()).unwrap();
        let err = downloader.download(&job).await.unwrap_err();

        assert!(matches!(err, FetchError::Probe(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cancel_before_probe_completes() {
        let dir = tempfile::tempdir().unwrap();
        let job = DownloadJob::new("http://127.0.0.1:1/file.bin", dir.path().join("x")).unwrap();
        let downloader = Downloader::new(DownloadConfig::default()).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = downloader
            .run(&job, EventSink::disabled(), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }
}
