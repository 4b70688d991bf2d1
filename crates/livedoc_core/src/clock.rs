//! Time source abstraction.

use chrono::{DateTime, Utc};

/// Supplies "now" for sys timestamps and presence records.
///
/// Behind a trait so timestamp rules (such as the version-guarded
/// `updated_at`) are testable with a manual clock.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
