//! Titleferry Core Library
//!
//! This library is the transfer and install core of a title-management
//! utility: a generic, cancellable engine that copies byte streams between
//! pluggable source/destination backends (local files, HTTP, installer
//! transactions) while publishing progress for a polling consumer.
//!
//! # Architecture
//!
//! - [`transfer`] - backend adapter trait, transfer engine, progress and
//!   cancellation channel
//! - [`install`] - install source resolvers (tickets, URLs, QR payloads)
//!   and the installer capability surface
//! - [`titledb`] - immutable title-id to name lookup table
//!
//! Menu rendering, glyph layout, and other presentation concerns live
//! with the consumer; this crate only supplies raw progress counters and
//! structured errors for it to display.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod install;
pub mod titledb;
pub mod transfer;

// Re-export commonly used types
pub use install::{
    DirInstallService, InstallService, InstallSink, MediaDest, PackageHeader, QrInstallPlan,
    TicketInstallBackend, TitleId, UrlInstallBackend,
};
pub use transfer::{
    ProgressSnapshot, RunOutcome, SessionHandle, SourceRead, TRANSFER_CHUNK_SIZE, TransferBackend,
    TransferEngine, TransferError,
};
