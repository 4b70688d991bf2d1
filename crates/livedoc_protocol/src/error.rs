//! Error types for the protocol crate.

use crate::path::Path;
use thiserror::Error;

/// Result type for component application.
pub type ApplyResult<T> = Result<T, ApplyError>;

/// Result type for wire encoding/decoding.
pub type WireResult<T> = Result<T, WireError>;

/// Errors from applying an OT component to a snapshot.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplyError {
    /// A path segment addressed a container that does not exist.
    #[error("missing container at {path}")]
    MissingContainer {
        /// Path of the missing container.
        path: Path,
    },

    /// A list index was out of range for the addressed array.
    #[error("index {index} out of range at {path} (len {len})")]
    IndexOutOfRange {
        /// Path of the array.
        path: Path,
        /// Offending index.
        index: usize,
        /// Current array length.
        len: usize,
    },

    /// The addressed value had the wrong shape for the component.
    #[error("type mismatch at {path}: expected {expected}")]
    TypeMismatch {
        /// Path of the mismatched value.
        path: Path,
        /// What the component required ("object" or "array").
        expected: &'static str,
    },

    /// A key segment was used to index an array, or vice versa.
    #[error("segment kind mismatch at {path}")]
    SegmentMismatch {
        /// Path up to and including the offending segment.
        path: Path,
    },

    /// An operation with no components.
    #[error("empty operation")]
    EmptyOp,

    /// A component path with no segments where one was required.
    #[error("component path must not be empty")]
    EmptyPath,
}

/// Errors from encoding or decoding wire messages.
#[derive(Error, Debug)]
pub enum WireError {
    /// CBOR encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors from parsing a composite document key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The key did not have four `!`-separated parts.
    #[error("malformed doc key: {input:?}")]
    Malformed {
        /// The rejected input.
        input: String,
    },

    /// The entity-type token was not `entry` or `asset`.
    #[error("unknown entity type {token:?} in doc key")]
    UnknownEntityType {
        /// The rejected token.
        token: String,
    },
}
