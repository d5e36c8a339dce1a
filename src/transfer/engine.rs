//! Transfer engine driving work items through source/destination backends.
//!
//! The engine runs one item at a time through a fixed state machine:
//! open the source, query its size, buffer an initial read block, open the
//! destination with that block in hand, alternate reads and writes until
//! end of stream, then close destination and source in that order. Any
//! failure is isolated at the item boundary: handles are closed, the
//! backend's `on_error` hook decides whether the run continues, and
//! session state for later items is never corrupted.
//!
//! # Example
//!
//! ```no_run
//! use titleferry::transfer::{FsCopyBackend, TransferEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = FsCopyBackend::new(vec![("a.bin".into(), "b.bin".into())]);
//! let (session, worker) = TransferEngine::new().spawn(backend);
//! while !session.snapshot().finished {
//!     tokio::time::sleep(std::time::Duration::from_millis(50)).await;
//! }
//! let outcome = worker.await?;
//! println!("completed: {}", outcome.completed);
//! # Ok(())
//! # }
//! ```

use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::backend::TransferBackend;
use super::error::TransferError;
use super::progress::SessionHandle;

/// Chunk size for the copy loop and the initial read block.
///
/// Also bounds worst-case cancellation latency, since the cancel flag is
/// polled once per chunk.
pub const TRANSFER_CHUNK_SIZE: usize = 128 * 1024;

/// Outcome statistics for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Items that transferred successfully (including skipped empties and
    /// directory items).
    pub completed: u64,
    /// Items whose transfer failed but whose error the backend skipped.
    pub failed: u64,
    /// True if the run stopped before reaching the end of the work list.
    pub premature: bool,
}

/// Sequential transfer engine over a [`TransferBackend`].
///
/// Exactly one item is ever in flight; the initiating context runs
/// concurrently only to poll the [`SessionHandle`] snapshot and raise the
/// cancellation flag. Cancellation is cooperative - the flag is observed
/// between chunks, never by pre-empting an in-flight backend call.
#[derive(Debug, Clone, Copy)]
pub struct TransferEngine {
    copy_empty: bool,
    chunk_size: usize,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferEngine {
    /// Creates an engine with the default chunk size that skips zero-size
    /// sources.
    #[must_use]
    pub fn new() -> Self {
        Self {
            copy_empty: false,
            chunk_size: TRANSFER_CHUNK_SIZE,
        }
    }

    /// Sets whether zero-size sources still open a destination.
    #[must_use]
    pub fn copy_empty(mut self, copy_empty: bool) -> Self {
        self.copy_empty = copy_empty;
        self
    }

    /// Overrides the transfer chunk size. Values below 512 bytes are
    /// clamped up to bound per-chunk overhead.
    ///
    /// Content-routing destinations parse the initial read block, so a
    /// chunk size must at least cover whatever offset they read; the
    /// default [`TRANSFER_CHUNK_SIZE`] does with ample room.
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(512);
        self
    }

    /// Spawns the run on the tokio runtime, returning the session handle
    /// and the worker's join handle.
    pub fn spawn<B>(self, mut backend: B) -> (SessionHandle, JoinHandle<RunOutcome>)
    where
        B: TransferBackend + 'static,
    {
        let session = SessionHandle::new();
        let observer = session.clone();
        let worker = tokio::spawn(async move { self.run(&mut backend, &session).await });
        (observer, worker)
    }

    /// Runs the backend's whole work list to completion or cancellation.
    ///
    /// Individual item failures do not end the run unless the backend's
    /// `on_error` hook says so; the session is marked finished either way.
    #[instrument(skip(self, backend, session), fields(items = backend.item_count()))]
    pub async fn run<B: TransferBackend>(
        &self,
        backend: &mut B,
        session: &SessionHandle,
    ) -> RunOutcome {
        let total = backend.item_count();
        session.set_items_total(total as u64);

        info!(total, "starting transfer run");

        let mut outcome = RunOutcome::default();
        let mut chunk = vec![0u8; self.chunk_size];

        for index in 0..total {
            match self.process_item(backend, index, session, &mut chunk).await {
                Ok(()) => {
                    outcome.completed += 1;
                    session.set_items_done(outcome.completed);
                    debug!(index, "item transferred");
                }
                Err(error) => {
                    if error.is_cancelled() {
                        info!(index, "transfer cancelled");
                    } else {
                        warn!(index, %error, "item transfer failed");
                    }

                    if backend.on_error(index, &error) {
                        outcome.failed += 1;
                    } else {
                        outcome.premature = true;
                        break;
                    }
                }
            }
        }

        session.finish(outcome.premature);
        info!(
            completed = outcome.completed,
            failed = outcome.failed,
            premature = outcome.premature,
            "transfer run finished"
        );
        outcome
    }

    /// Drives one work item through the state machine. The source handle
    /// opened here is closed on every path before this function returns.
    async fn process_item<B: TransferBackend>(
        &self,
        backend: &mut B,
        index: usize,
        session: &SessionHandle,
        chunk: &mut [u8],
    ) -> Result<(), TransferError> {
        if backend.is_source_directory(index).await? {
            return backend.make_destination_directory(index).await;
        }

        let mut source = backend.open_source(index).await?;

        let transferred = self
            .transfer_streams(backend, index, &mut source, session, chunk)
            .await;

        let close = backend
            .close_source(index, source, transferred.is_ok())
            .await;

        // A transfer error outranks a close error; surface the close error
        // only on an otherwise clean item.
        transferred.and(close)
    }

    /// Size query through destination close for one opened source.
    async fn transfer_streams<B: TransferBackend>(
        &self,
        backend: &mut B,
        index: usize,
        source: &mut B::Source,
        session: &SessionHandle,
        chunk: &mut [u8],
    ) -> Result<(), TransferError> {
        let size = backend.source_size(source).await?;
        session.begin_item(size);

        if size == 0 && !self.copy_empty {
            debug!(index, "skipping empty source");
            return Ok(());
        }

        // Buffer the first block before the destination exists so
        // content-routing destinations can branch on it.
        let first_len = read_chunk(backend, source, 0, chunk, session).await?;

        let mut destination = backend.open_destination(index, &chunk[..first_len]).await?;

        let copied = self
            .copy_loop(backend, source, &mut destination, first_len, session, chunk)
            .await;

        let close = backend
            .close_destination(index, destination, copied.is_ok())
            .await;

        copied.and(close)
    }

    /// Writes the buffered initial block, then alternates reads and writes
    /// until end of stream, polling the cancel flag after every chunk.
    async fn copy_loop<B: TransferBackend>(
        &self,
        backend: &mut B,
        source: &mut B::Source,
        destination: &mut B::Destination,
        first_len: usize,
        session: &SessionHandle,
        chunk: &mut [u8],
    ) -> Result<(), TransferError> {
        let mut read_offset = first_len as u64;
        let mut write_offset = 0u64;

        write_chunk(backend, destination, &mut write_offset, &chunk[..first_len]).await?;
        session.add_bytes(first_len as u64);
        if session.is_cancel_requested() {
            return Err(TransferError::Cancelled);
        }

        loop {
            let read = read_chunk(backend, source, read_offset, chunk, session).await?;
            if read == 0 {
                return Ok(());
            }
            read_offset += read as u64;

            write_chunk(backend, destination, &mut write_offset, &chunk[..read]).await?;
            session.add_bytes(read as u64);

            if session.is_cancel_requested() {
                return Err(TransferError::Cancelled);
            }
        }
    }
}

/// One logical read: polls a pending source in a caller-yielding loop
/// until it produces bytes or reports end of stream.
async fn read_chunk<B: TransferBackend>(
    backend: &mut B,
    source: &mut B::Source,
    offset: u64,
    buf: &mut [u8],
    session: &SessionHandle,
) -> Result<usize, TransferError> {
    loop {
        let read = backend.read_source(source, offset, buf).await?;
        if !read.pending {
            return Ok(read.bytes);
        }
        // A perpetually-pending source must still honor cancellation.
        if session.is_cancel_requested() {
            return Err(TransferError::Cancelled);
        }
        tokio::task::yield_now().await;
    }
}

/// Writes a whole chunk, tolerating destinations that accept partial
/// writes.
async fn write_chunk<B: TransferBackend>(
    backend: &mut B,
    destination: &mut B::Destination,
    offset: &mut u64,
    mut buf: &[u8],
) -> Result<(), TransferError> {
    while !buf.is_empty() {
        let written = backend.write_destination(destination, *offset, buf).await?;
        if written == 0 {
            return Err(TransferError::io(
                "write destination",
                std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "destination accepted zero bytes",
                ),
            ));
        }
        *offset += written as u64;
        buf = &buf[written..];
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::transfer::backend::SourceRead;

    /// In-memory backend copying byte vectors, for engine unit tests.
    struct MemBackend {
        sources: Vec<Vec<u8>>,
        outputs: Vec<Vec<u8>>,
        destinations_opened: usize,
        sources_closed: usize,
        continue_on_error: bool,
    }

    impl MemBackend {
        fn new(sources: Vec<Vec<u8>>) -> Self {
            let count = sources.len();
            Self {
                sources,
                outputs: vec![Vec::new(); count],
                destinations_opened: 0,
                sources_closed: 0,
                continue_on_error: false,
            }
        }
    }

    #[async_trait]
    impl TransferBackend for MemBackend {
        type Source = Vec<u8>;
        type Destination = usize;

        fn item_count(&self) -> usize {
            self.sources.len()
        }

        async fn open_source(&mut self, index: usize) -> Result<Vec<u8>, TransferError> {
            Ok(self.sources[index].clone())
        }

        async fn close_source(
            &mut self,
            _index: usize,
            _source: Vec<u8>,
            _succeeded: bool,
        ) -> Result<(), TransferError> {
            self.sources_closed += 1;
            Ok(())
        }

        async fn source_size(&mut self, source: &mut Vec<u8>) -> Result<u64, TransferError> {
            Ok(source.len() as u64)
        }

        async fn read_source(
            &mut self,
            source: &mut Vec<u8>,
            offset: u64,
            buf: &mut [u8],
        ) -> Result<SourceRead, TransferError> {
            let offset = usize::try_from(offset).unwrap();
            let remaining = source.len().saturating_sub(offset);
            let take = remaining.min(buf.len());
            buf[..take].copy_from_slice(&source[offset..offset + take]);
            Ok(SourceRead::done(take))
        }

        async fn open_destination(
            &mut self,
            index: usize,
            _initial_block: &[u8],
        ) -> Result<usize, TransferError> {
            self.destinations_opened += 1;
            Ok(index)
        }

        async fn close_destination(
            &mut self,
            _index: usize,
            _destination: usize,
            _succeeded: bool,
        ) -> Result<(), TransferError> {
            Ok(())
        }

        async fn write_destination(
            &mut self,
            destination: &mut usize,
            _offset: u64,
            buf: &[u8],
        ) -> Result<usize, TransferError> {
            self.outputs[*destination].extend_from_slice(buf);
            Ok(buf.len())
        }

        fn on_error(&mut self, _index: usize, _error: &TransferError) -> bool {
            self.continue_on_error
        }
    }

    #[tokio::test]
    async fn test_run_copies_all_items_in_order() {
        let mut backend = MemBackend::new(vec![b"alpha".to_vec(), b"beta".to_vec()]);
        let session = SessionHandle::new();
        let engine = TransferEngine::new().chunk_size(512);

        let outcome = engine.run(&mut backend, &session).await;

        assert_eq!(outcome.completed, 2);
        assert!(!outcome.premature);
        assert_eq!(backend.outputs[0], b"alpha");
        assert_eq!(backend.outputs[1], b"beta");

        let snap = session.snapshot();
        assert!(snap.finished);
        assert!(!snap.premature);
        assert_eq!(snap.items_done, 2);
        assert_eq!(snap.items_total, 2);
    }

    #[tokio::test]
    async fn test_empty_source_skips_destination_but_closes_source() {
        let mut backend = MemBackend::new(vec![Vec::new()]);
        let session = SessionHandle::new();
        let outcome = TransferEngine::new().run(&mut backend, &session).await;

        assert_eq!(outcome.completed, 1);
        assert_eq!(backend.destinations_opened, 0);
        assert_eq!(backend.sources_closed, 1);
    }

    #[tokio::test]
    async fn test_copy_empty_policy_opens_destination_for_empty_source() {
        let mut backend = MemBackend::new(vec![Vec::new()]);
        let session = SessionHandle::new();
        let outcome = TransferEngine::new()
            .copy_empty(true)
            .run(&mut backend, &session)
            .await;

        assert_eq!(outcome.completed, 1);
        assert_eq!(backend.destinations_opened, 1);
        assert!(backend.outputs[0].is_empty());
    }

    #[tokio::test]
    async fn test_item_larger_than_chunk_copies_fully() {
        let payload: Vec<u8> = (0..2000u32).map(|v| (v % 251) as u8).collect();
        let mut backend = MemBackend::new(vec![payload.clone()]);
        let session = SessionHandle::new();
        let outcome = TransferEngine::new()
            .chunk_size(512)
            .run(&mut backend, &session)
            .await;

        assert_eq!(outcome.completed, 1);
        assert_eq!(backend.outputs[0], payload);
        assert_eq!(session.snapshot().bytes_done, 2000);
    }

    #[tokio::test]
    async fn test_chunk_size_is_clamped() {
        let engine = TransferEngine::new().chunk_size(1);
        assert_eq!(engine.chunk_size, 512);
    }
}
