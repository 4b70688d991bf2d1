//! Error types for the document layer.

use livedoc_connection::{ConnectionError, SubmitError};
use livedoc_protocol::{ApplyError, Path};
use thiserror::Error;

/// Result type for document operations.
pub type DocResult<T> = Result<T, DocError>;

/// Errors surfaced by the path-mutation API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocError {
    /// No document is open; nothing is buffered offline.
    #[error("document is not connected")]
    NotConnected,

    /// An insert addressed a container that does not exist (and was not the
    /// index-0 creation case).
    #[error("no container at {path} to insert into")]
    MissingContainer {
        /// Path of the missing container.
        path: Path,
    },

    /// A mutation addressed the document root.
    #[error("the document root cannot be mutated directly")]
    RootMutation,

    /// The operation did not apply to the snapshot.
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// Submission against the open document failed.
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// Connection-level bookkeeping failed (for example, a second document
    /// layer over the same entity).
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl DocError {
    /// Returns true for the "not connected" error family.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, DocError::NotConnected)
    }
}
