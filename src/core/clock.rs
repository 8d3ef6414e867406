//! Time source shared by the monitors.
//!
//! Production code uses [`SystemClock`]; tests drive time-windowed behaviour
//! (block expiry, sample pruning, record eviction) with [`ManualClock`].

use std::sync::Mutex;
use chrono::{DateTime, Duration, Utc};
use crate::utils::lock_or_recover;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock_or_recover(&self.now, "manual clock");
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock_or_recover(&self.now, "manual clock") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock_or_recover(&self.now, "manual clock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }
}
