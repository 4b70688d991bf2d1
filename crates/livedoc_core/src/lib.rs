//! # Livedoc Core
//!
//! The collaborative document layer: a stable, path-addressed editing API
//! over one OT document, with reactive consumer-facing state.
//!
//! This crate provides:
//! - `Entity` / `Sys`: the externally owned content record and its metadata
//! - `ContentTypeSchema` / `LocaleConfig` and snapshot normalization
//! - `CollabDoc`: path mutations, `is_dirty` / `is_saving` / `is_connected`,
//!   the four-way status machine, change feed, and memoized value properties
//! - `PresenceHub`: who else is editing, derived purely from the event stream
//! - `Reverter`: restore local fields to the last clean snapshot
//! - the permission gate consumed as a boolean decision
//!
//! ## Key Invariants
//!
//! - `is_dirty` is a pure function of `Sys`, recomputed on every sys change
//! - The entity's `sys.version` never regresses: out-of-order
//!   acknowledgments are dropped
//! - Mutations fail with `NotConnected` when no document is open; nothing
//!   is buffered offline
//! - Presence records are discarded whole when the document closes or is
//!   replaced

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod collab;
mod entity;
mod error;
mod normalize;
mod permission;
mod presence;
mod reverter;
mod schema;

pub use clock::{Clock, SystemClock};
pub use collab::{CollabDoc, CollabDocConfig, DocState, DocStatus};
pub use entity::{Entity, SharedEntity, Sys};
pub use error::{DocError, DocResult};
pub use normalize::normalize;
pub use permission::{Action, AllowAll, PermissionEvaluator};
pub use presence::{PresenceHub, PresenceRecord};
pub use reverter::Reverter;
pub use schema::{ContentTypeSchema, FieldDef, LocaleConfig};

pub use livedoc_protocol::EntityType;
