//! Work partitioning.
//!
//! The planner splits `[0, total_length)` into contiguous, non-overlapping
//! chunks, one per worker. The last chunk absorbs the remainder of the
//! integer division so the partition is exact. Planning is deterministic.

use serde::Serialize;

use super::probe::ContentInfo;

/// One planned unit of work: a contiguous byte range owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// 0-based position in the plan (reporting order only).
    pub index: usize,
    /// First byte of the range.
    pub start: u64,
    /// Number of bytes in the range; `None` for an open-ended stream of
    /// unknown length.
    pub length: Option<u64>,
}

impl Chunk {
    /// Inclusive last byte, or `None` for empty and open-ended chunks.
    pub fn end(&self) -> Option<u64> {
        match self.length {
            Some(0) | None => None,
            Some(len) => Some(self.start + len - 1),
        }
    }

    /// Whether the chunk has no bytes to transfer.
    pub fn is_empty(&self) -> bool {
        self.length == Some(0)
    }

    /// Whether the chunk length is unknown.
    pub fn is_open_ended(&self) -> bool {
        self.length.is_none()
    }
}

/// How the chunks of a plan are transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferMode {
    /// Concurrent partial GETs, one per chunk.
    Ranged,
    /// A single unrestricted GET: the server cannot serve ranges or did
    /// not report a length.
    SingleStream,
}

/// A complete download plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Transfer mode for every chunk.
    pub mode: TransferMode,
    /// Total length, when known.
    pub total_length: Option<u64>,
    /// Chunks ordered by start offset.
    pub chunks: Vec<Chunk>,
}

impl Plan {
    /// Plan a download for probed content.
    ///
    /// Content that cannot be split (no range support or unknown length)
    /// always gets exactly one chunk, whatever `requested_workers` says.
    pub fn for_content(info: &ContentInfo, requested_workers: usize) -> Self {
        match info.total_length {
            Some(total) if info.supports_ranges => Self {
                mode: TransferMode::Ranged,
                total_length: Some(total),
                chunks: plan(total, requested_workers),
            },
            total_length => Self {
                mode: TransferMode::SingleStream,
                total_length,
                chunks: vec![Chunk {
                    index: 0,
                    start: 0,
                    length: total_length,
                }],
            },
        }
    }

    /// Number of workers this plan needs.
    pub fn workers(&self) -> usize {
        self.chunks.len()
    }

    /// Length of a regular (non-final) chunk.
    pub fn chunk_length(&self) -> Option<u64> {
        self.chunks.first().and_then(|c| c.length)
    }
}

/// Split `[0, total_length)` into `worker_count` near-equal chunks.
///
/// `worker_count` is clamped to `[1, total_length]`. A zero-length
/// resource yields a single empty chunk.
pub fn plan(total_length: u64, worker_count: usize) -> Vec<Chunk> {
    if total_length == 0 {
        return vec![Chunk {
            index: 0,
            start: 0,
            length: Some(0),
        }];
    }

    let workers = (worker_count.max(1) as u64).min(total_length);
    let base = total_length / workers;

    (0..workers)
        .map(|i| {
            let start = i * base;
            let length = if i == workers - 1 {
                total_length - start
            } else {
                base
            };
            Chunk {
                index: i as usize,
                start,
                length: Some(length),
            }
        })
        .collect()
}
