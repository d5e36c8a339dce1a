//! Local ticket install backend.
//!
//! Installs ticket files from a caller-owned directory listing: either a
//! single selected entry or every entry carrying the `.tik` suffix. With
//! delete-after-install enabled, a successfully installed ticket is
//! removed from disk and from the listing; later work-item indices
//! compensate for the shrunken listing so enumeration order is preserved.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::{debug, warn};

use super::service::{InstallService, InstallSink};
use crate::transfer::{SourceRead, TransferBackend, TransferError};

/// Ticket file suffix used by the all-in-directory selection.
pub const TICKET_SUFFIX: &str = ".tik";

/// Returns true if `path` names a ticket file.
#[must_use]
pub fn is_ticket_path(path: &Path) -> bool {
    path.to_str().is_some_and(|s| s.ends_with(TICKET_SUFFIX))
}

/// Which listing entries a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    /// One listing entry by position.
    Single(usize),
    /// Every `.tik` entry in the listing.
    AllTickets,
}

/// Backend installing tickets from a directory listing.
pub struct TicketInstallBackend {
    entries: Vec<PathBuf>,
    selection: Selection,
    delete_after: bool,
    service: Arc<dyn InstallService>,
    /// Listing position of the item currently in flight.
    current: Option<usize>,
    /// Entries removed from the listing by delete-after-install; offsets
    /// later work-item indices during enumeration.
    deleted: usize,
    total: usize,
}

impl std::fmt::Debug for TicketInstallBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketInstallBackend")
            .field("entries", &self.entries.len())
            .field("selection", &self.selection)
            .field("delete_after", &self.delete_after)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

impl TicketInstallBackend {
    /// Backend over the single listing entry at `selected`.
    #[must_use]
    pub fn single(
        entries: Vec<PathBuf>,
        selected: usize,
        service: Arc<dyn InstallService>,
    ) -> Self {
        Self {
            entries,
            selection: Selection::Single(selected),
            delete_after: false,
            service,
            current: None,
            deleted: 0,
            total: 1,
        }
    }

    /// Backend over every `.tik` entry in the listing.
    #[must_use]
    pub fn all_tickets(entries: Vec<PathBuf>, service: Arc<dyn InstallService>) -> Self {
        let total = entries.iter().filter(|p| is_ticket_path(p)).count();
        Self {
            entries,
            selection: Selection::AllTickets,
            delete_after: false,
            service,
            current: None,
            deleted: 0,
            total,
        }
    }

    /// Deletes each source file (and its listing entry) after a
    /// successful install.
    #[must_use]
    pub fn delete_after_install(mut self, delete: bool) -> Self {
        self.delete_after = delete;
        self
    }

    /// Hands the (possibly shrunken) listing back to the caller.
    #[must_use]
    pub fn into_entries(self) -> Vec<PathBuf> {
        self.entries
    }

    /// Resolves the work-item index to a listing position, compensating
    /// for entries already deleted from the listing.
    fn resolve(&self, index: usize) -> Option<usize> {
        match self.selection {
            Selection::Single(selected) => Some(selected),
            Selection::AllTickets => {
                let want = index + 1 - self.deleted;
                let mut seen = 0;
                for (pos, path) in self.entries.iter().enumerate() {
                    if is_ticket_path(path) {
                        seen += 1;
                        if seen == want {
                            return Some(pos);
                        }
                    }
                }
                None
            }
        }
    }
}

#[async_trait]
impl TransferBackend for TicketInstallBackend {
    type Source = File;
    type Destination = Box<dyn InstallSink>;

    fn item_count(&self) -> usize {
        self.total
    }

    async fn open_source(&mut self, index: usize) -> Result<File, TransferError> {
        let pos = self.resolve(index).ok_or_else(|| {
            TransferError::io(
                "open source",
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "listing entry no longer present",
                ),
            )
        })?;
        self.current = Some(pos);

        let path = &self.entries[pos];
        debug!(path = %path.display(), "opening ticket file");
        File::open(path)
            .await
            .map_err(|e| TransferError::io("open source", e))
    }

    async fn close_source(
        &mut self,
        _index: usize,
        source: File,
        succeeded: bool,
    ) -> Result<(), TransferError> {
        drop(source);

        if self.delete_after && succeeded {
            if let Some(pos) = self.current.take() {
                let path = self.entries[pos].clone();
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!(path = %path.display(), "deleted installed ticket");
                        self.entries.remove(pos);
                        self.deleted += 1;
                    }
                    Err(error) => {
                        // Best effort: the install already succeeded.
                        warn!(path = %path.display(), %error, "failed to delete installed ticket");
                    }
                }
            }
        }
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
        _index: usize,
        _initial_block: &[u8],
    ) -> Result<Box<dyn InstallSink>, TransferError> {
        self.service.begin_ticket().await
    }

    async fn close_destination(
        &mut self,
        _index: usize,
        destination: Box<dyn InstallSink>,
        succeeded: bool,
    ) -> Result<(), TransferError> {
        if succeeded {
            destination.commit().await
        } else {
            destination.abort().await
        }
    }

    async fn write_destination(
        &mut self,
        destination: &mut Box<dyn InstallSink>,
        offset: u64,
        buf: &[u8],
    ) -> Result<usize, TransferError> {
        destination.write(offset, buf).await
    }

    fn on_error(&mut self, index: usize, error: &TransferError) -> bool {
        if error.is_cancelled() {
            return false;
        }
        warn!(index, %error, "ticket install failed");
        index + 1 < self.total
    }
}
