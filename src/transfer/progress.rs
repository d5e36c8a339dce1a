//! Progress snapshot and cooperative cancellation channel.
//!
//! The engine is the only writer of the progress counters and the only
//! reader of the cancel flag; a UI consumer is the only reader of the
//! counters and the only writer of the cancel flag. Word-sized atomics are
//! sufficient for that exchange, so no mutex is involved and neither side
//! can block the other.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Read-only view of a transfer run at one polling tick.
///
/// `bytes_done`/`bytes_total` describe the item currently in flight; the
/// consumer formats these however it likes, the engine only supplies raw
/// counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Work items fully processed so far.
    pub items_done: u64,
    /// Total work items in the run.
    pub items_total: u64,
    /// Bytes transferred for the current item.
    pub bytes_done: u64,
    /// Total bytes of the current item (0 until the size query completes).
    pub bytes_total: u64,
    /// True once the run has ended, cleanly or not.
    pub finished: bool,
    /// True if the run stopped before processing every item
    /// (cancellation or an error the backend chose not to skip).
    pub premature: bool,
}

impl ProgressSnapshot {
    /// Progress fraction of the current item in `0.0..=1.0`.
    ///
    /// Defined as 0 when the item's total is 0, never a division by zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            0.0
        } else {
            self.bytes_done as f64 / self.bytes_total as f64
        }
    }
}

/// Shared handle linking a transfer run to its observer.
///
/// Cloning is cheap (an `Arc` bump); one clone lives inside the engine
/// worker, the others with whoever displays progress or requests
/// cancellation.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<SessionState>,
}

#[derive(Debug, Default)]
struct SessionState {
    items_done: AtomicU64,
    items_total: AtomicU64,
    bytes_done: AtomicU64,
    bytes_total: AtomicU64,
    finished: AtomicBool,
    premature: AtomicBool,
    cancel: AtomicBool,
}

impl SessionHandle {
    /// Creates a fresh handle with all counters zeroed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a snapshot of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            items_done: self.inner.items_done.load(Ordering::SeqCst),
            items_total: self.inner.items_total.load(Ordering::SeqCst),
            bytes_done: self.inner.bytes_done.load(Ordering::SeqCst),
            bytes_total: self.inner.bytes_total.load(Ordering::SeqCst),
            finished: self.inner.finished.load(Ordering::SeqCst),
            premature: self.inner.premature.load(Ordering::SeqCst),
        }
    }

    /// Requests cooperative cancellation.
    ///
    /// The engine observes the flag between chunks, so worst-case latency
    /// is bounded by one chunk transfer plus whatever backend call is in
    /// flight.
    pub fn request_cancel(&self) {
        self.inner.cancel.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel.load(Ordering::SeqCst)
    }

    pub(crate) fn set_items_total(&self, total: u64) {
        self.inner.items_total.store(total, Ordering::SeqCst);
    }

    pub(crate) fn set_items_done(&self, done: u64) {
        self.inner.items_done.store(done, Ordering::SeqCst);
    }

    pub(crate) fn begin_item(&self, total_bytes: u64) {
        self.inner.bytes_total.store(total_bytes, Ordering::SeqCst);
        self.inner.bytes_done.store(0, Ordering::SeqCst);
    }

    pub(crate) fn add_bytes(&self, bytes: u64) {
        self.inner.bytes_done.fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn finish(&self, premature: bool) {
        self.inner.premature.store(premature, Ordering::SeqCst);
        self.inner.finished.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_handle_is_zeroed() {
        let handle = SessionHandle::new();
        let snap = handle.snapshot();
        assert_eq!(snap.items_done, 0);
        assert_eq!(snap.items_total, 0);
        assert_eq!(snap.bytes_done, 0);
        assert_eq!(snap.bytes_total, 0);
        assert!(!snap.finished);
        assert!(!snap.premature);
        assert!(!handle.is_cancel_requested());
    }

    #[test]
    fn test_cancel_flag_visible_across_clones() {
        let handle = SessionHandle::new();
        let observer = handle.clone();
        observer.request_cancel();
        assert!(handle.is_cancel_requested());
    }

    #[test]
    fn test_fraction_zero_total_is_zero() {
        let snap = SessionHandle::new().snapshot();
        assert_eq!(snap.fraction(), 0.0);
    }

    #[test]
    fn test_fraction_tracks_bytes() {
        let handle = SessionHandle::new();
        handle.begin_item(200);
        handle.add_bytes(50);
        let snap = handle.snapshot();
        assert!((snap.fraction() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_begin_item_resets_byte_counter() {
        let handle = SessionHandle::new();
        handle.begin_item(100);
        handle.add_bytes(100);
        handle.begin_item(300);
        let snap = handle.snapshot();
        assert_eq!(snap.bytes_done, 0);
        assert_eq!(snap.bytes_total, 300);
    }

    #[test]
    fn test_finish_sets_flags() {
        let handle = SessionHandle::new();
        handle.finish(true);
        let snap = handle.snapshot();
        assert!(snap.finished);
        assert!(snap.premature);
    }
}
