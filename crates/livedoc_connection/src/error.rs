//! Error types for the connection layer.

use livedoc_protocol::{ApplyError, DocKey};
use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for connection-level operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Result type for local op submission.
pub type SubmitResult<T> = Result<T, SubmitError>;

/// Errors from the underlying transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The transport is not connected.
    #[error("transport not connected")]
    NotConnected,

    /// Sending a frame failed.
    #[error("send failed: {message}")]
    Send {
        /// Failure description.
        message: String,
    },

    /// The transport was asked to act on a document it has not opened.
    #[error("document {key} is not open on this transport")]
    DocNotOpen {
        /// The document key.
        key: DocKey,
    },
}

impl TransportError {
    /// Creates a send error.
    pub fn send(message: impl Into<String>) -> Self {
        Self::Send {
            message: message.into(),
        }
    }
}

/// Errors from connection-level bookkeeping.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Another loader already routes this document key.
    #[error("document {key} is already registered on this connection")]
    AlreadyRegistered {
        /// The contested key.
        key: DocKey,
    },

    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,

    /// A transport operation failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Why a document load ended in `DocLoad::Error`.
///
/// These are transient: the loader re-attempts the open once the connection
/// returns to `Ready`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The server rejected the open.
    #[error("open failed: {message}")]
    OpenFailed {
        /// Failure description.
        message: String,
    },

    /// The connection dropped while the document was open or opening.
    #[error("connection lost")]
    Disconnected,

    /// Too many consecutive failed opens; waiting for intent to toggle.
    #[error("giving up after {attempts} failed open attempts")]
    TooManyAttempts {
        /// Number of consecutive failures.
        attempts: u32,
    },
}

impl LoadError {
    /// Creates an open-failed error.
    pub fn open_failed(message: impl Into<String>) -> Self {
        Self::OpenFailed {
            message: message.into(),
        }
    }
}

/// Errors from submitting a local operation against an open document.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmitError {
    /// The document has been closed.
    #[error("document is closed")]
    DocClosed,

    /// The operation did not apply to the local snapshot.
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// The transport refused the frame.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
