//! Installer capability traits and a host staging implementation.
//!
//! The console's privileged title-management API is only ever touched
//! through [`InstallService`]: begin a transaction, stream bytes into its
//! [`InstallSink`], then commit or abort. The engine and resolvers treat
//! the returned sinks as opaque destination handles, so the same code
//! drives a real installer on device and a directory-backed staging
//! implementation on a host.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::{debug, info, warn};

use super::package::{MediaDest, TitleId};
use crate::transfer::TransferError;

/// One install transaction's byte sink.
///
/// Exactly one of `commit` or `abort` consumes the sink; the engine
/// guarantees a single close call per opened destination.
#[async_trait]
pub trait InstallSink: Send {
    /// Writes `buf` at `offset`, returning the bytes accepted.
    async fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize, TransferError>;

    /// Finalizes the transaction.
    async fn commit(self: Box<Self>) -> Result<(), TransferError>;

    /// Rolls the transaction back.
    async fn abort(self: Box<Self>) -> Result<(), TransferError>;
}

/// The title-management surface installs are performed against.
#[async_trait]
pub trait InstallService: Send + Sync {
    /// Begins a ticket install transaction.
    async fn begin_ticket(&self) -> Result<Box<dyn InstallSink>, TransferError>;

    /// Begins a title install transaction on the given medium.
    async fn begin_title(
        &self,
        dest: MediaDest,
        title_id: TitleId,
    ) -> Result<Box<dyn InstallSink>, TransferError>;

    /// Deletes an installed title, if present.
    async fn delete_title(&self, dest: MediaDest, title_id: TitleId)
    -> Result<(), TransferError>;

    /// Deletes an installed ticket, if present.
    async fn delete_ticket(&self, title_id: TitleId) -> Result<(), TransferError>;

    /// Refreshes the removable-card title import database after deletes.
    async fn refresh_title_database(&self) -> Result<(), TransferError>;

    /// Follow-up firmware install for firmware-carrying titles.
    async fn install_firmware(&self, title_id: TitleId) -> Result<(), TransferError>;

    /// Whether the detected hardware is the newer generation.
    fn is_new_model(&self) -> bool;
}

/// Host implementation staging installs as files under a directory.
///
/// Transactions write to a `.part` file; commit renames it into place and
/// abort removes it, mirroring the commit/rollback shape of the real
/// installer. Tickets are numbered in arrival order since their ids are
/// not parsed host-side.
pub struct DirInstallService {
    root: PathBuf,
    new_model: bool,
    ticket_seq: AtomicU32,
}

impl fmt::Debug for DirInstallService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirInstallService")
            .field("root", &self.root)
            .field("new_model", &self.new_model)
            .finish_non_exhaustive()
    }
}

impl DirInstallService {
    /// Creates a staging service rooted at `root`, reporting the newer
    /// hardware generation.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            new_model: true,
            ticket_seq: AtomicU32::new(0),
        }
    }

    /// Overrides the reported hardware generation.
    #[must_use]
    pub fn with_new_model(mut self, new_model: bool) -> Self {
        self.new_model = new_model;
        self
    }

    fn media_dir(&self, dest: MediaDest) -> PathBuf {
        match dest {
            MediaDest::Internal => self.root.join("internal"),
            MediaDest::Card => self.root.join("card"),
        }
    }

    fn title_path(&self, dest: MediaDest, title_id: TitleId) -> PathBuf {
        self.media_dir(dest).join(format!("{title_id}.cia"))
    }

    fn ticket_path(&self, seq: u32) -> PathBuf {
        self.root.join("tickets").join(format!("ticket-{seq:04}.tik"))
    }

    async fn begin_file(&self, final_path: PathBuf) -> Result<Box<dyn InstallSink>, TransferError> {
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io("open destination", e))?;
        }
        let part_path = final_path.with_extension("part");
        let file = File::create(&part_path)
            .await
            .map_err(|e| TransferError::io("open destination", e))?;
        Ok(Box::new(StagedFileSink {
            file,
            part_path,
            final_path,
        }))
    }
}

#[async_trait]
impl InstallService for DirInstallService {
    async fn begin_ticket(&self) -> Result<Box<dyn InstallSink>, TransferError> {
        let seq = self.ticket_seq.fetch_add(1, Ordering::SeqCst);
        debug!(seq, "staging ticket install");
        self.begin_file(self.ticket_path(seq)).await
    }

    async fn begin_title(
        &self,
        dest: MediaDest,
        title_id: TitleId,
    ) -> Result<Box<dyn InstallSink>, TransferError> {
        debug!(%title_id, ?dest, "staging title install");
        self.begin_file(self.title_path(dest, title_id)).await
    }

    async fn delete_title(
        &self,
        dest: MediaDest,
        title_id: TitleId,
    ) -> Result<(), TransferError> {
        match tokio::fs::remove_file(self.title_path(dest, title_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransferError::io("delete title", e)),
        }
    }

    async fn delete_ticket(&self, _title_id: TitleId) -> Result<(), TransferError> {
        // Staged tickets are sequence-numbered, not keyed by title id, so
        // there is nothing to match here.
        Ok(())
    }

    async fn refresh_title_database(&self) -> Result<(), TransferError> {
        debug!("refreshing staged title database");
        Ok(())
    }

    async fn install_firmware(&self, title_id: TitleId) -> Result<(), TransferError> {
        info!(%title_id, "firmware install requested; staging service records it only");
        Ok(())
    }

    fn is_new_model(&self) -> bool {
        self.new_model
    }
}

/// Sink writing a staged `.part` file, renamed into place on commit.
struct StagedFileSink {
    file: File,
    part_path: PathBuf,
    final_path: PathBuf,
}

#[async_trait]
impl InstallSink for StagedFileSink {
    async fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize, TransferError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| TransferError::io("seek destination", e))?;
        self.file
            .write(buf)
            .await
            .map_err(|e| TransferError::io("write destination", e))
    }

    async fn commit(mut self: Box<Self>) -> Result<(), TransferError> {
        self.file
            .flush()
            .await
            .map_err(|e| TransferError::io("close destination", e))?;
        drop(self.file);
        tokio::fs::rename(&self.part_path, &self.final_path)
            .await
            .map_err(|e| TransferError::io("close destination", e))
    }

    async fn abort(self: Box<Self>) -> Result<(), TransferError> {
        drop(self.file);
        if let Err(error) = tokio::fs::remove_file(&self.part_path).await {
            warn!(path = %self.part_path.display(), %error, "failed to remove aborted install");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_ticket_commit_renames_into_place() {
        let dir = TempDir::new().unwrap();
        let service = DirInstallService::new(dir.path());

        let mut sink = service.begin_ticket().await.unwrap();
        sink.write(0, b"ticket bytes").await.unwrap();
        sink.commit().await.unwrap();

        let staged = dir.path().join("tickets/ticket-0000.tik");
        assert_eq!(tokio::fs::read(&staged).await.unwrap(), b"ticket bytes");
        assert!(!staged.with_extension("part").exists());
    }

    #[tokio::test]
    async fn test_title_abort_removes_partial() {
        let dir = TempDir::new().unwrap();
        let service = DirInstallService::new(dir.path());
        let title_id = TitleId(0x0004_0000_0012_3400);

        let mut sink = service
            .begin_title(MediaDest::Card, title_id)
            .await
            .unwrap();
        sink.write(0, b"half a package").await.unwrap();
        sink.abort().await.unwrap();

        let final_path = dir.path().join("card").join(format!("{title_id}.cia"));
        assert!(!final_path.exists());
        assert!(!final_path.with_extension("part").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_title_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let service = DirInstallService::new(dir.path());
        service
            .delete_title(MediaDest::Internal, TitleId(0x1234))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sequential_tickets_get_distinct_paths() {
        let dir = TempDir::new().unwrap();
        let service = DirInstallService::new(dir.path());

        let first = service.begin_ticket().await.unwrap();
        let second = service.begin_ticket().await.unwrap();
        first.commit().await.unwrap();
        second.commit().await.unwrap();

        assert!(dir.path().join("tickets/ticket-0000.tik").exists());
        assert!(dir.path().join("tickets/ticket-0001.tik").exists());
    }

    #[test]
    fn test_hardware_generation_flag() {
        let dir = std::env::temp_dir();
        assert!(DirInstallService::new(&dir).is_new_model());
        assert!(!DirInstallService::new(&dir).with_new_model(false).is_new_model());
    }
}
