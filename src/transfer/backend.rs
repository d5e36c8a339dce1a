//! Backend adapter trait abstracting transfer sources and destinations.
//!
//! A [`TransferBackend`] binds one run's worth of operations over a work
//! list the backend itself owns: open/read/close on the source side,
//! open/write/close on the destination side, plus an error continuation
//! hook. The engine drives these operations through the per-item state
//! machine and never interprets the handle values beyond passing them back
//! to the matching read/write/close call - handles are opaque associated
//! types owned entirely by the implementation.

use async_trait::async_trait;

use super::error::TransferError;

/// Outcome of a single `read_source` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRead {
    /// Bytes placed into the caller's buffer.
    pub bytes: usize,
    /// True when the source produced nothing *this call* but has not
    /// reached end of stream (chunked HTTP transfers mid-flight). The
    /// engine yields and polls again. `bytes == 0` with `pending == false`
    /// is end of stream.
    pub pending: bool,
}

impl SourceRead {
    /// A completed read of `bytes` bytes.
    #[must_use]
    pub fn done(bytes: usize) -> Self {
        Self {
            bytes,
            pending: false,
        }
    }

    /// A zero-byte read that should be retried after yielding.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            bytes: 0,
            pending: true,
        }
    }

    /// True if this read marks end of stream.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.bytes == 0 && !self.pending
    }
}

/// One run's worth of source/destination operations over an indexed work
/// list.
///
/// The engine owns the backend exclusively for the run's duration, so
/// operations take `&mut self` and implementations are free to carry
/// per-run mutable state (directory listings, redirect bookkeeping,
/// deletion counters).
///
/// # Contract
///
/// - `open_source` may be retried for a *different* index after an earlier
///   item failed; the engine never retries the same index automatically.
/// - Every successfully opened handle sees exactly one matching close
///   call, on both success and failure paths. `succeeded` tells
///   transactional destinations whether to commit or roll back.
/// - `open_destination` receives the first chunk already read from the
///   source, so implementations can route on content before committing to
///   a destination resource. This read-before-open ordering is part of
///   the protocol.
#[async_trait]
pub trait TransferBackend: Send {
    /// Opaque per-item source handle.
    type Source: Send;
    /// Opaque per-item destination handle.
    type Destination: Send;

    /// Number of work items in this run.
    fn item_count(&self) -> usize;

    /// Whether the item at `index` names a directory rather than a byte
    /// stream. Directory items are materialized via
    /// [`make_destination_directory`](Self::make_destination_directory)
    /// and carry no bytes. Install flows answer `false` unconditionally.
    async fn is_source_directory(&mut self, index: usize) -> Result<bool, TransferError> {
        let _ = index;
        Ok(false)
    }

    /// Creates the destination counterpart of a directory item.
    async fn make_destination_directory(&mut self, index: usize) -> Result<(), TransferError> {
        let _ = index;
        Ok(())
    }

    /// Opens the source for the item at `index`.
    async fn open_source(&mut self, index: usize) -> Result<Self::Source, TransferError>;

    /// Closes a source handle. `succeeded` reports whether the item's
    /// transfer completed.
    async fn close_source(
        &mut self,
        index: usize,
        source: Self::Source,
        succeeded: bool,
    ) -> Result<(), TransferError>;

    /// Total size of the opened source in bytes.
    async fn source_size(&mut self, source: &mut Self::Source) -> Result<u64, TransferError>;

    /// Reads from the source at `offset` into `buf`.
    async fn read_source(
        &mut self,
        source: &mut Self::Source,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<SourceRead, TransferError>;

    /// Opens the destination for the item at `index`, given the first
    /// chunk already read from the source.
    async fn open_destination(
        &mut self,
        index: usize,
        initial_block: &[u8],
    ) -> Result<Self::Destination, TransferError>;

    /// Closes a destination handle, committing when `succeeded` is true
    /// and rolling back otherwise.
    async fn close_destination(
        &mut self,
        index: usize,
        destination: Self::Destination,
        succeeded: bool,
    ) -> Result<(), TransferError>;

    /// Writes `buf` to the destination at `offset`, returning the number
    /// of bytes accepted.
    async fn write_destination(
        &mut self,
        destination: &mut Self::Destination,
        offset: u64,
        buf: &[u8],
    ) -> Result<usize, TransferError>;

    /// Invoked when any step for the item at `index` fails, after that
    /// item's handles have been closed. Returns whether the run should
    /// continue with the next item.
    ///
    /// [`TransferError::Cancelled`] is surfaced through this hook too; by
    /// convention implementations return `false` for it.
    fn on_error(&mut self, index: usize, error: &TransferError) -> bool;
}

#[cfg(test)]
mod tests {
    use super::SourceRead;

    #[test]
    fn test_source_read_done() {
        let read = SourceRead::done(512);
        assert_eq!(read.bytes, 512);
        assert!(!read.pending);
        assert!(!read.is_eof());
    }

    #[test]
    fn test_source_read_zero_is_eof() {
        assert!(SourceRead::done(0).is_eof());
    }

    #[test]
    fn test_source_read_pending_is_not_eof() {
        let read = SourceRead::pending();
        assert_eq!(read.bytes, 0);
        assert!(read.pending);
        assert!(!read.is_eof());
    }
}
