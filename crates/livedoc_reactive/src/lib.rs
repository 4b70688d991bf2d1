//! # Livedoc Reactive
//!
//! Push-based reactive primitives for the livedoc collaboration core.
//!
//! This crate provides:
//! - `Property<T>`: a current value plus change notifications, with
//!   consecutive-duplicate suppression
//! - `EventFeed<T>`: a value-less event stream
//! - `Subscription`: explicit listener deregistration, also run on drop
//! - `CleanupStack`: reverse-order teardown for composite components
//!
//! ## Design
//!
//! Everything here is synchronous: emitting a value invokes listeners on the
//! calling thread, in registration order, after all internal locks have been
//! released. Listeners may therefore read or mutate the property they are
//! subscribed to without deadlocking.
//!
//! ## Key Invariants
//!
//! - A `Property` never notifies for a value equal to its current one
//! - A new property subscriber is primed with the current value
//! - An unsubscribed listener is never invoked again
//! - `CleanupStack::run` executes tasks in reverse registration order

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cleanup;
mod feed;
mod property;
mod subscriber;

pub use cleanup::CleanupStack;
pub use feed::EventFeed;
pub use property::Property;
pub use subscriber::Subscription;
