//! Concurrent chunked downloads.
//!
//! This module contains the download engine:
//! - Job description and header parsing (`job`)
//! - Content probing via HEAD or a one-byte ranged GET (`probe`)
//! - Partitioning of the byte space into chunks (`plan`)
//! - Per-chunk workers with resume-from-offset retry (`worker`)
//! - Positional output file writes (`writer`)
//! - Job lifecycle and per-chunk state (`state`)
//! - Events and aggregate progress (`progress`)
//! - Lifecycle orchestration (`orchestrator`)
//!
//! # Architecture
//!
//! ```text
//! Downloader (orchestrator)
//!         │
//!         ├── probe ──► ContentInfo
//!         │
//!         ├── Plan::for_content ──► Vec<Chunk>
//!         │
//!         ├── JoinSet of fetch_chunk tasks (one per chunk)
//!         │       ├── RetryPolicy (backoff between attempts)
//!         │       └── OutputFile::write_at (disjoint regions)
//!         │
//!         ├── ChunkBoard + ProgressReporter (aggregate progress)
//!         │
//!         └── EventSink ──► DownloadEvent channel ──► caller
//! ```
//!
//! # Example
//!
//! ```ignore
//! use fastget::config::DownloadConfig;
//! use fastget::download::{Downloader, DownloadEvent, DownloadJob};
//!
//! let job = DownloadJob::new("https://example.com/big.iso", "big.iso")?
//!     .with_header("Authorization", "Bearer token")?
//!     .with_workers(8);
//!
//! let downloader = Downloader::new(DownloadConfig::default())?;
//! let mut handle = downloader.start(job);
//!
//! while let Some(event) = handle.next_event().await {
//!     if let DownloadEvent::Progress { downloaded, total } = event {
//!         println!("{} / {:?}", downloaded, total);
//!     }
//! }
//!
//! let result = handle.wait().await?;
//! println!("{} bytes in {:?}", result.bytes_written, result.elapsed);
//! ```

pub mod http;
pub mod job;
pub mod orchestrator;
pub mod plan;
pub mod probe;
pub mod progress;
pub mod retry;
pub mod state;
pub mod worker;
pub mod writer;

pub use job::{parse_header_arg, DownloadJob, DEFAULT_WORKERS};
pub use orchestrator::{DownloadHandle, DownloadResult, Downloader};
pub use plan::{plan, Chunk, Plan, TransferMode};
pub use probe::{probe, ContentInfo};
pub use progress::{DownloadEvent, EventSink, WorkerOutcomeSummary};
pub use retry::RetryPolicy;
pub use state::{ChunkStatus, JobState};
pub use worker::{fetch_chunk, WorkerOutcome, WorkerResult};
pub use writer::{OutputFile, WriteMode};
