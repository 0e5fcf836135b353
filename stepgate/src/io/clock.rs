//! Time source injected into the decision service.

use chrono::{DateTime, Utc};

pub trait TimeProvider {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeProvider for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub DateTime<Utc>);

impl TimeProvider for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
