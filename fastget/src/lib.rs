//! fastget - concurrent chunked HTTP(S) downloads.
//!
//! Splits a remote file into byte ranges, fetches them in parallel with
//! per-chunk retry, and writes each range straight into its place in the
//! output file. Servers without range support or without a known length
//! fall back to a single stream.
//!
//! The [`download`] module holds the engine; [`config`], [`logging`] and
//! [`error`] provide the ambient pieces a binary needs.

pub mod config;
pub mod download;
pub mod error;
pub mod logging;

pub use config::{ConfigError, ConfigFile, DownloadConfig};
pub use download::{DownloadEvent, DownloadHandle, DownloadJob, DownloadResult, Downloader};
pub use error::{ChunkError, FetchError, FetchResult, ProbeError, WriterError};
pub use reqwest::Url;

/// Version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
