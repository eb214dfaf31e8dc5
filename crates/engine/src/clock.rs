//! Abstracted time source.
//!
//! All inactivity thresholds are measured against a [`Clock`], never against
//! direct wall-clock calls, so tests can advance simulated time instead of
//! sleeping real durations.

use chrono::{DateTime, Utc};

/// Time source for the engine.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
