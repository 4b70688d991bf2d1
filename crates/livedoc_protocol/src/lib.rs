//! # Livedoc Protocol
//!
//! OT wire vocabulary and CBOR codecs for livedoc.
//!
//! This crate provides:
//! - `Path`: string/index segments addressing a location in a JSON snapshot
//! - `OtOp` / `OtComponent`: json-OT shaped operations and their pure
//!   application to snapshots
//! - `DocKey`: composite `space!environment!type!id` document addressing
//! - Presence payloads (focus / blur / leave)
//! - `ClientMessage` / `ServerMessage` wire types with a CBOR codec
//!
//! ## Key Invariants
//!
//! - Applying a component never partially mutates a snapshot: validation
//!   happens before the write
//! - An `OtOp` is a non-empty component list; composition is concatenation
//! - `DocKey` round-trips through its wire form exactly

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod key;
mod messages;
mod op;
mod path;
mod presence;

pub use error::{ApplyError, ApplyResult, KeyError, WireError, WireResult};
pub use key::{DocKey, EntityType};
pub use messages::{decode, encode, ClientMessage, OpenRequestId, ServerMessage};
pub use op::{apply_component, apply_op, OtComponent, OtOp};
pub use path::{Path, Segment};
pub use presence::{PresenceMessage, PresencePayload, SessionId};
