//! Error types for the transfer module.
//!
//! This module defines structured errors for all transfer operations.
//! Every error a backend can raise funnels through [`TransferError`] so the
//! engine can treat failures uniformly at the item boundary: close the
//! item's handles, hand the error to the backend's `on_error` hook, and
//! either continue with the next item or stop the run.

use thiserror::Error;

/// Errors that can occur while transferring a work item.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The run was cancelled by a cooperative cancellation request.
    ///
    /// Raised by the engine between chunks, never mid-call. By convention
    /// `on_error` returns `false` for this variant so the run stops.
    #[error("transfer cancelled")]
    Cancelled,

    /// A backend could not allocate a required resource.
    #[error("out of memory")]
    OutOfMemory,

    /// I/O failure in a backend operation (open/read/write/close).
    #[error("I/O error during {op}: {source}")]
    Io {
        /// The backend operation that failed (e.g. "open source").
        op: &'static str,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP response with a status that is neither 200 nor a redirect.
    ///
    /// Also raised when a redirect chain exceeds the configured bound, in
    /// which case `status` carries the last redirect status seen.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The numeric HTTP status code.
        status: u16,
    },

    /// The title requires a newer hardware generation than detected.
    #[error("title {title_id:#018x} requires a newer hardware generation")]
    IncompatibleHardware {
        /// The offending title id.
        title_id: u64,
    },

    /// The package stream's header could not be parsed.
    #[error("invalid package: {reason}")]
    InvalidPackage {
        /// Human-readable parse failure description.
        reason: String,
    },
}

impl TransferError {
    /// Creates an I/O error tagged with the failing operation.
    pub fn io(op: &'static str, source: std::io::Error) -> Self {
        Self::Io { op, source }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an invalid-package error.
    pub fn invalid_package(reason: impl Into<String>) -> Self {
        Self::InvalidPackage {
            reason: reason.into(),
        }
    }

    /// Returns true if this error is the cooperative cancellation marker.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<std::io::Error>` or
// `From<reqwest::Error>` because the variants require context (operation
// name, URL) that the source errors don't carry. The helper constructors
// are the correct pattern here.
