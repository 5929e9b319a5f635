//! Download events and progress aggregation.
//!
//! The core pushes [`DownloadEvent`]s into an unbounded channel so it never
//! waits on the consumer. Per-worker progress is emitted by the workers
//! themselves; the [`ProgressReporter`] task polls the [`ChunkBoard`] and
//! emits aggregate totals at a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::probe::ContentInfo;
use super::state::{ChunkBoard, JobState};
use crate::error::ChunkError;

/// Notification pushed to the caller during a download.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// The job moved to a new lifecycle state.
    StateChanged { from: JobState, to: JobState },

    /// The origin server was probed.
    Probed(ContentInfo),

    /// The plan is fixed and workers are about to start.
    BeforeStart {
        total_size: Option<u64>,
        chunk_length: Option<u64>,
        workers: usize,
    },

    /// A worker picked up its chunk.
    WorkerStarted {
        worker: usize,
        assigned_length: Option<u64>,
    },

    /// Bytes confirmed on disk for a worker's chunk (cumulative).
    WorkerProgress { worker: usize, bytes_so_far: u64 },

    /// A worker hit a transient error and will retry.
    WorkerRetry {
        worker: usize,
        attempt: u32,
        delay: Duration,
        resume_offset: u64,
        reason: ChunkError,
    },

    /// A worker settled.
    WorkerFinished {
        worker: usize,
        outcome: WorkerOutcomeSummary,
    },

    /// Aggregate bytes across all workers.
    Progress { downloaded: u64, total: Option<u64> },
}

/// Cloneable summary of a worker's terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcomeSummary {
    Completed { bytes: u64 },
    Failed { reason: String },
    Cancelled,
}

/// Sending side of the event channel. Sends never fail the job.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<DownloadEvent>>,
}

impl EventSink {
    /// Sink forwarding into `tx`.
    pub fn new(tx: mpsc::UnboundedSender<DownloadEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Push an event. A closed receiver is ignored.
    pub fn emit(&self, event: DownloadEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Periodic aggregate progress reporter.
///
/// Emits [`DownloadEvent::Progress`] whenever the confirmed total changed
/// since the previous tick, and once more when stopped.
pub struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

impl ProgressReporter {
    /// Spawn the reporter task.
    pub fn start(
        board: Arc<ChunkBoard>,
        total: Option<u64>,
        events: EventSink,
        interval: Duration,
    ) -> Self {
        let stop = CancellationToken::new();
        let stop_signal = stop.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_reported = None;

            loop {
                tokio::select! {
                    _ = stop_signal.cancelled() => break,
                    _ = ticker.tick() => {
                        let downloaded = board.total_bytes();
                        if last_reported != Some(downloaded) {
                            last_reported = Some(downloaded);
                            events.emit(DownloadEvent::Progress { downloaded, total });
                        }
                    }
                }
            }

            // Final report
            events.emit(DownloadEvent::Progress {
                downloaded: board.total_bytes(),
                total,
            });
        });

        Self {
            handle: Some(handle),
            stop,
        }
    }

    /// Stop the reporter and wait for its final report.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
