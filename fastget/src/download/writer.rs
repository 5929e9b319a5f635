//! Output file writer.
//!
//! [`OutputFile`] owns the destination file. When the total length is
//! known the file is pre-allocated and workers write into their own
//! regions with positional writes; no lock is taken because regions never
//! overlap. When the length is unknown the file grows by sequential
//! appends from the single streaming worker.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult, WriterError};

/// How bytes land in the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// File pre-allocated to `total` bytes; writes go to absolute offsets.
    Positional { total: u64 },
    /// File starts empty; every write must start at the current end.
    Streaming,
}

/// The destination file shared by all workers of a job.
#[derive(Debug)]
pub struct OutputFile {
    path: PathBuf,
    file: Arc<File>,
    mode: WriteMode,
    /// Bytes accepted by `write_at`.
    written: AtomicU64,
    /// Next expected offset in streaming mode.
    cursor: AtomicU64,
}

impl OutputFile {
    /// Create (or truncate) the output file.
    ///
    /// Parent directories are created as needed. With a known length the
    /// file is extended to that size up front.
    pub async fn create(path: &Path, expected_len: Option<u64>) -> Result<Self, WriterError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WriterError::Create {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| WriterError::Create {
                path: path.to_path_buf(),
                source: e,
            })?;

        let mode = match expected_len {
            Some(total) => {
                file.set_len(total)
                    .await
                    .map_err(|e| WriterError::Create {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                WriteMode::Positional { total }
            }
            None => WriteMode::Streaming,
        };

        debug!(path = %path.display(), ?mode, "Output file created");

        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(file.into_std().await),
            mode,
            written: AtomicU64::new(0),
            cursor: AtomicU64::new(0),
        })
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write mode chosen at creation.
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Total bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    /// Write `data` at absolute `offset`.
    ///
    /// Safe to call concurrently for disjoint regions.
    pub async fn write_at(&self, offset: u64, data: Bytes) -> Result<(), WriterError> {
        let len = data.len() as u64;
        if len == 0 {
            return Ok(());
        }

        match self.mode {
            WriteMode::Positional { total } => {
                if offset.checked_add(len).map_or(true, |end| end > total) {
                    return Err(WriterError::OutOfBounds { offset, len, total });
                }
            }
            WriteMode::Streaming => {
                self.cursor
                    .compare_exchange(offset, offset + len, Ordering::SeqCst, Ordering::SeqCst)
                    .map_err(|expected| WriterError::OffsetMismatch {
                        expected,
                        actual: offset,
                    })?;
            }
        }

        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || write_all_at(&file, &data, offset))
            .await
            .map_err(|e| WriterError::Task(e.to_string()))?
            .map_err(|e| WriterError::Write {
                path: self.path.clone(),
                offset,
                source: e,
            })?;

        self.written.fetch_add(len, Ordering::SeqCst);
        Ok(())
    }

    /// Flush the file and check its size.
    ///
    /// The on-disk size must match the expected length (when known) and the
    /// number of bytes accepted by [`write_at`](Self::write_at); anything
    /// else is a [`FetchError::SizeMismatch`].
    pub async fn finalize(&self) -> FetchResult<u64> {
        let file = Arc::clone(&self.file);
        let actual = tokio::task::spawn_blocking(move || -> io::Result<u64> {
            file.sync_all()?;
            Ok(file.metadata()?.len())
        })
        .await
        .map_err(|e| WriterError::Task(e.to_string()))?
        .map_err(|e| WriterError::Flush {
            path: self.path.clone(),
            source: e,
        })?;

        if let WriteMode::Positional { total } = self.mode {
            if actual != total {
                return Err(self.size_mismatch(total, actual));
            }
        }

        let written = self.bytes_written();
        if written != actual {
            return Err(self.size_mismatch(actual, written));
        }

        Ok(actual)
    }

    /// Remove the file after a failed job.
    pub async fn discard(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "Failed to remove partial file");
        } else {
            warn!(path = %self.path.display(), "Removed partial file");
        }
    }

    fn size_mismatch(&self, expected: u64, actual: u64) -> FetchError {
        FetchError::SizeMismatch {
            path: self.path.clone(),
            expected,
            actual,
        }
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_preallocates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.bin");

        let out = OutputFile::create(&path, Some(1024)).await.unwrap();
        assert_eq!(out.mode(), WriteMode::Positional { total: 1024 });
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn test_positional_writes_any_order() {
        let dir = tempdir().unwrap();
        let content: Vec<u8> = (0..=255u8).cycle().take(4000).collect();

        for order in [[0usize, 1, 2, 3], [3, 1, 0, 2]] {
            let path = dir.path().join(format!("out-{}.bin", order[0]));
            let out = Arc::new(OutputFile::create(&path, Some(4000)).await.unwrap());

            let handles: Vec<_> = order
                .iter()
                .map(|&i| {
                    let out = Arc::clone(&out);
                    let piece = Bytes::copy_from_slice(&content[i * 1000..(i + 1) * 1000]);
                    tokio::spawn(async move { out.write_at((i * 1000) as u64, piece).await })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            assert_eq!(out.finalize().await.unwrap(), 4000);
            assert_eq!(std::fs::read(&path).unwrap(), content);
        }
    }

    #[tokio::test]
    async fn test_positional_rejects_out_of_bounds() {
        let dir = tempdir().unwrap();
        let out = OutputFile::create(&dir.path().join("a.bin"), Some(10))
            .await
            .unwrap();

        let err = out
            .write_at(8, Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WriterError::OutOfBounds {
                offset: 8,
                len: 3,
                total: 10
            }
        ));
    }

    #[tokio::test]
    async fn test_streaming_appends_sequentially() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.bin");
        let out = OutputFile::create(&path, None).await.unwrap();

        out.write_at(0, Bytes::from_static(b"hello ")).await.unwrap();
        out.write_at(6, Bytes::from_static(b"world")).await.unwrap();

        let err = out
            .write_at(3, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WriterError::OffsetMismatch {
                expected: 11,
                actual: 3
            }
        ));

        assert_eq!(out.finalize().await.unwrap(), 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_finalize_detects_gap() {
        let dir = tempdir().unwrap();
        let out = OutputFile::create(&dir.path().join("gap.bin"), Some(10))
            .await
            .unwrap();
        out.write_at(0, Bytes::from_static(b"12345")).await.unwrap();

        let err = out.finalize().await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::SizeMismatch {
                expected: 10,
                actual: 5,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_zero_length_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        let out = OutputFile::create(&path, Some(0)).await.unwrap();

        assert_eq!(out.finalize().await.unwrap(), 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_discard_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.bin");
        let out = OutputFile::create(&path, Some(4)).await.unwrap();

        out.discard().await;
        assert!(!path.exists());
    }
}
