//! Clock port — local wall-clock time.

use std::sync::Arc;

use mimic_domain::time::{self, Timestamp};

/// Source of the current local time.
///
/// Calendar positions of recorded events and replay delays are derived from
/// it, so tests substitute a controllable implementation.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The system's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        time::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}
