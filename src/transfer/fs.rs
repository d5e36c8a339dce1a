//! Filesystem copy backend.
//!
//! Copies a work list of `(source, destination)` path pairs. Directory
//! entries are materialized with `create_dir_all` and carry no bytes;
//! file entries are streamed through the engine's chunk loop. A failed
//! file copy rolls back by removing the partial destination.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::{debug, warn};

use super::backend::{SourceRead, TransferBackend};
use super::error::TransferError;

/// Backend copying files and directories between host paths.
#[derive(Debug)]
pub struct FsCopyBackend {
    items: Vec<(PathBuf, PathBuf)>,
    /// Whether an item error should skip to the next item instead of
    /// stopping the run.
    skip_failures: bool,
}

/// Open destination file plus its path, kept for rollback on failure.
#[derive(Debug)]
pub struct FsDestination {
    file: File,
    path: PathBuf,
}

impl FsCopyBackend {
    /// Creates a backend over `(source, destination)` path pairs.
    #[must_use]
    pub fn new(items: Vec<(PathBuf, PathBuf)>) -> Self {
        Self {
            items,
            skip_failures: false,
        }
    }

    /// Makes item failures skip to the next item instead of ending the
    /// run.
    #[must_use]
    pub fn skip_failures(mut self, skip: bool) -> Self {
        self.skip_failures = skip;
        self
    }
}

#[async_trait]
impl TransferBackend for FsCopyBackend {
    type Source = File;
    type Destination = FsDestination;

    fn item_count(&self) -> usize {
        self.items.len()
    }

    async fn is_source_directory(&mut self, index: usize) -> Result<bool, TransferError> {
        let meta = tokio::fs::metadata(&self.items[index].0)
            .await
            .map_err(|e| TransferError::io("stat source", e))?;
        Ok(meta.is_dir())
    }

    async fn make_destination_directory(&mut self, index: usize) -> Result<(), TransferError> {
        let dst = &self.items[index].1;
        debug!(path = %dst.display(), "creating destination directory");
        tokio::fs::create_dir_all(dst)
            .await
            .map_err(|e| TransferError::io("make destination directory", e))
    }

    async fn open_source(&mut self, index: usize) -> Result<File, TransferError> {
        File::open(&self.items[index].0)
            .await
            .map_err(|e| TransferError::io("open source", e))
    }

    async fn close_source(
        &mut self,
        _index: usize,
        source: File,
        _succeeded: bool,
    ) -> Result<(), TransferError> {
        drop(source);
        Ok(())
    }

    async fn source_size(&mut self, source: &mut File) -> Result<u64, TransferError> {
        let meta = source
            .metadata()
            .await
            .map_err(|e| TransferError::io("query source size", e))?;
        Ok(meta.len())
    }

    async fn read_source(
        &mut self,
        source: &mut File,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<SourceRead, TransferError> {
        source
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| TransferError::io("seek source", e))?;
        let bytes = source
            .read(buf)
            .await
            .map_err(|e| TransferError::io("read source", e))?;
        Ok(SourceRead::done(bytes))
    }

    async fn open_destination(
        &mut self,
        index: usize,
        _initial_block: &[u8],
    ) -> Result<FsDestination, TransferError> {
        let path = self.items[index].1.clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io("make destination directory", e))?;
        }
        let file = File::create(&path)
            .await
            .map_err(|e| TransferError::io("open destination", e))?;
        Ok(FsDestination { file, path })
    }

    async fn close_destination(
        &mut self,
        _index: usize,
        mut destination: FsDestination,
        succeeded: bool,
    ) -> Result<(), TransferError> {
        if succeeded {
            destination
                .file
                .flush()
                .await
                .map_err(|e| TransferError::io("close destination", e))
        } else {
            drop(destination.file);
            if let Err(error) = tokio::fs::remove_file(&destination.path).await {
                warn!(path = %destination.path.display(), %error, "failed to remove partial file");
            }
            Ok(())
        }
    }

    async fn write_destination(
        &mut self,
        destination: &mut FsDestination,
        offset: u64,
        buf: &[u8],
    ) -> Result<usize, TransferError> {
        destination
            .file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| TransferError::io("seek destination", e))?;
        destination
            .file
            .write(buf)
            .await
            .map_err(|e| TransferError::io("write destination", e))
    }

    fn on_error(&mut self, index: usize, error: &TransferError) -> bool {
        if error.is_cancelled() {
            return false;
        }
        self.skip_failures && index + 1 < self.items.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::transfer::engine::TransferEngine;
    use crate::transfer::progress::SessionHandle;

    #[tokio::test]
    async fn test_copies_file_contents() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("in.bin");
        let dst = dir.path().join("out/in.bin");
        tokio::fs::write(&src, b"ferry me across").await.unwrap();

        let mut backend = FsCopyBackend::new(vec![(src, dst.clone())]);
        let session = SessionHandle::new();
        let outcome = TransferEngine::new().run(&mut backend, &session).await;

        assert_eq!(outcome.completed, 1);
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"ferry me across");
    }

    #[tokio::test]
    async fn test_directory_item_creates_directory_without_bytes() {
        let dir = TempDir::new().unwrap();
        let src_dir = dir.path().join("subdir");
        tokio::fs::create_dir(&src_dir).await.unwrap();
        let dst_dir = dir.path().join("copied/subdir");

        let mut backend = FsCopyBackend::new(vec![(src_dir, dst_dir.clone())]);
        let session = SessionHandle::new();
        let outcome = TransferEngine::new().run(&mut backend, &session).await;

        assert_eq!(outcome.completed, 1);
        assert!(dst_dir.is_dir());
    }

    #[tokio::test]
    async fn test_missing_source_stops_run_by_default() {
        let dir = TempDir::new().unwrap();
        let mut backend = FsCopyBackend::new(vec![
            (dir.path().join("absent.bin"), dir.path().join("a.bin")),
            (dir.path().join("also-absent.bin"), dir.path().join("b.bin")),
        ]);
        let session = SessionHandle::new();
        let outcome = TransferEngine::new().run(&mut backend, &session).await;

        assert_eq!(outcome.completed, 0);
        assert!(outcome.premature);
    }

    #[tokio::test]
    async fn test_skip_failures_continues_past_missing_source() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.bin");
        tokio::fs::write(&good, b"ok").await.unwrap();
        let dst = dir.path().join("good-copy.bin");

        let mut backend = FsCopyBackend::new(vec![
            (dir.path().join("absent.bin"), dir.path().join("a.bin")),
            (good, dst.clone()),
        ])
        .skip_failures(true);
        let session = SessionHandle::new();
        let outcome = TransferEngine::new().run(&mut backend, &session).await;

        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.failed, 1);
        assert!(!outcome.premature);
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"ok");
    }
}
