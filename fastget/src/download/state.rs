//! Job and chunk state.
//!
//! [`JobState`] is the orchestrator's lifecycle. [`ChunkBoard`] holds the
//! per-chunk status and confirmed byte counts as atomics, so workers can
//! update their own slot while the progress reporter reads all of them.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use serde::Serialize;

/// Lifecycle of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Init,
    Probing,
    Planning,
    Downloading,
    Finalizing,
    Done,
    Failed,
}

impl JobState {
    /// Whether the job can move from `self` to `next`.
    ///
    /// `Failed` is reachable from every state except `Done`; terminal
    /// states have no successors.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Init, Probing)
            | (Probing, Planning)
            | (Planning, Downloading)
            | (Downloading, Finalizing)
            | (Finalizing, Done) => true,
            (Done, _) | (Failed, _) => false,
            (_, Failed) => true,
            _ => false,
        }
    }

    /// Whether the job has settled.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Init => "init",
            JobState::Probing => "probing",
            JobState::Planning => "planning",
            JobState::Downloading => "downloading",
            JobState::Finalizing => "finalizing",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Status of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ChunkStatus {
    Pending = 0,
    InFlight = 1,
    Done = 2,
    Failed = 3,
    Cancelled = 4,
}

impl ChunkStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ChunkStatus::InFlight,
            2 => ChunkStatus::Done,
            3 => ChunkStatus::Failed,
            4 => ChunkStatus::Cancelled,
            _ => ChunkStatus::Pending,
        }
    }
}

/// Shared per-chunk state for one job.
///
/// Each slot is written only by the worker owning that chunk.
#[derive(Debug)]
pub struct ChunkBoard {
    status: Vec<AtomicU8>,
    bytes: Vec<AtomicU64>,
    completed: AtomicUsize,
}

impl ChunkBoard {
    /// Create a board with `chunks` pending slots.
    pub fn new(chunks: usize) -> Self {
        Self {
            status: (0..chunks)
                .map(|_| AtomicU8::new(ChunkStatus::Pending as u8))
                .collect(),
            bytes: (0..chunks).map(|_| AtomicU64::new(0)).collect(),
            completed: AtomicUsize::new(0),
        }
    }

    /// Number of chunks on the board.
    pub fn len(&self) -> usize {
        self.status.len()
    }

    /// Whether the board has no chunks.
    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
    }

    /// Current status of chunk `index`.
    pub fn status(&self, index: usize) -> Option<ChunkStatus> {
        self.status
            .get(index)
            .map(|s| ChunkStatus::from_u8(s.load(Ordering::SeqCst)))
    }

    /// Update the status of chunk `index`.
    pub fn set_status(&self, index: usize, status: ChunkStatus) {
        if let Some(slot) = self.status.get(index) {
            let previous = slot.swap(status as u8, Ordering::SeqCst);
            if status == ChunkStatus::Done && previous != ChunkStatus::Done as u8 {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Record the confirmed cumulative byte count of chunk `index`.
    pub fn set_bytes(&self, index: usize, bytes: u64) {
        if let Some(slot) = self.bytes.get(index) {
            slot.store(bytes, Ordering::SeqCst);
        }
    }

    /// Confirmed bytes of chunk `index`.
    pub fn bytes(&self, index: usize) -> u64 {
        self.bytes
            .get(index)
            .map(|b| b.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Confirmed bytes across all chunks.
    pub fn total_bytes(&self) -> u64 {
        self.bytes.iter().map(|b| b.load(Ordering::SeqCst)).sum()
    }

    /// Number of chunks marked done.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Whether every chunk is done.
    pub fn all_done(&self) -> bool {
        self.completed() == self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            JobState::Init,
            JobState::Probing,
            JobState::Planning,
            JobState::Downloading,
            JobState::Finalizing,
            JobState::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failed_reachable_from_non_terminal() {
        for state in [
            JobState::Init,
            JobState::Probing,
            JobState::Planning,
            JobState::Downloading,
            JobState::Finalizing,
        ] {
            assert!(state.can_transition_to(JobState::Failed));
            assert!(!state.is_terminal());
        }
        assert!(!JobState::Done.can_transition_to(JobState::Failed));
        assert!(!JobState::Failed.can_transition_to(JobState::Probing));
    }

    #[test]
    fn test_no_skipping_states() {
        assert!(!JobState::Init.can_transition_to(JobState::Downloading));
        assert!(!JobState::Probing.can_transition_to(JobState::Done));
        assert!(!JobState::Downloading.can_transition_to(JobState::Probing));
    }

    #[test]
    fn test_board_tracks_bytes_and_status() {
        let board = ChunkBoard::new(3);
        assert_eq!(board.len(), 3);
        assert_eq!(board.status(0), Some(ChunkStatus::Pending));
        assert_eq!(board.status(3), None);

        board.set_status(0, ChunkStatus::InFlight);
        board.set_bytes(0, 500);
        board.set_bytes(1, 300);
        assert_eq!(board.total_bytes(), 800);
        assert_eq!(board.bytes(0), 500);

        board.set_status(0, ChunkStatus::Done);
        board.set_status(0, ChunkStatus::Done);
        assert_eq!(board.completed(), 1);
        assert!(!board.all_done());

        board.set_status(1, ChunkStatus::Done);
        board.set_status(2, ChunkStatus::Done);
        assert!(board.all_done());
    }

    #[test]
    fn test_board_ignores_out_of_range() {
        let board = ChunkBoard::new(1);
        board.set_bytes(5, 10);
        board.set_status(5, ChunkStatus::Done);
        assert_eq!(board.total_bytes(), 0);
        assert_eq!(board.completed(), 0);
    }
}
