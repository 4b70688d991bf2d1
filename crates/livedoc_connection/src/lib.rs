//! # Livedoc Connection
//!
//! Transport connection and per-document load state machine for livedoc.
//!
//! This crate provides:
//! - `ConnectionState`: the four-way transport status
//! - `OtTransport`: the trait behind which the OT implementation lives
//! - `Connection`: one shared, authenticated channel multiplexing many docs
//! - `OtDoc`: one live OT document (snapshot, version, unacknowledged ops)
//! - `DocLoader`: the `Pending | Open | Error | Closed` state machine that
//!   sequences open/close against connection churn
//! - `ScriptedTransport`: a deterministic transport for tests
//!
//! ## Key Invariants
//!
//! - Exactly one `OtDoc` is open per loader; a new open is never issued
//!   while a close is unacknowledged
//! - Only the response matching the most recent open request id is applied;
//!   earlier in-flight responses are discarded
//! - Ops that were pending or in flight when a document is torn down are
//!   reapplied, pending first, on the next successfully opened document
//! - Overlapping auth refreshes are coalesced; a failed refresh disconnects

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod doc;
mod error;
mod loader;
mod state;
mod transport;

pub use config::{AuthToken, ConnectionConfig, LoaderConfig};
pub use connection::{Connection, DocRoute};
pub use doc::{OtDoc, OtDocEvent};
pub use error::{
    ConnectionError, ConnectionResult, LoadError, SubmitError, SubmitResult, TransportError,
    TransportResult,
};
pub use loader::{DocLoad, DocLoader};
pub use state::ConnectionState;
pub use transport::{DocEvent, OpenedDoc, OtTransport, ScriptedTransport, TransportCall,
    TransportEvent, TransportSink};
