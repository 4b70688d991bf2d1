//! # Livedoc Testkit
//!
//! Shared test infrastructure for the livedoc crates:
//! - ready-made entities, schemas and locale configurations
//! - `LoopbackServer` / `LoopbackTransport`: an in-memory collaboration
//!   server speaking the real CBOR wire protocol, with synchronous delivery
//! - `ManualClock`: a deterministic time source
//! - proptest strategies for paths and operations
//! - `init_test_logging` for tracing output in tests

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod fixtures;
pub mod generators;
mod logging;
mod loopback;

pub use clock::ManualClock;
pub use fixtures::{
    fresh_entry, normalized_snapshot_for, post_schema, published_entry, snapshot_for, two_locales,
    TEST_ENVIRONMENT, TEST_SPACE,
};
pub use logging::init_test_logging;
pub use loopback::{LoopbackServer, LoopbackTransport};
