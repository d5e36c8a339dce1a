//! Generic, cancellable transfer engine over pluggable backends.
//!
//! This module is the core of the crate: a state machine that copies byte
//! streams between heterogeneous sources and destinations (files, HTTP
//! responses, installer transactions) while publishing progress and
//! honoring cooperative cancellation.
//!
//! # Features
//!
//! - Opaque per-backend source/destination handles (the engine never
//!   interprets them)
//! - Initial read block buffered before the destination opens, so
//!   destinations can route on content
//! - Per-item failure isolation with a backend-driven continue/stop hook
//! - Lock-free progress snapshot and cancel flag for a polling consumer
//!
//! # Example
//!
//! ```no_run
//! use titleferry::transfer::{FsCopyBackend, TransferEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = FsCopyBackend::new(vec![("a.bin".into(), "b.bin".into())]);
//! let (session, worker) = TransferEngine::new().spawn(backend);
//! let outcome = worker.await?;
//! assert!(session.snapshot().finished);
//! println!("completed: {}", outcome.completed);
//! # Ok(())
//! # }
//! ```

mod backend;
mod engine;
mod error;
mod fs;
mod progress;

pub use backend::{SourceRead, TransferBackend};
pub use engine::{RunOutcome, TRANSFER_CHUNK_SIZE, TransferEngine};
pub use error::TransferError;
pub use fs::{FsCopyBackend, FsDestination};
pub use progress::{ProgressSnapshot, SessionHandle};
