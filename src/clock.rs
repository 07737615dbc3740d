//! Time source port.
//!
//! Leases use the monotonic clock; solar geometry and sensor freshness use
//! UTC. Both come from one trait so tests can drive them together.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};

pub trait Clock: Send + Sync {
    /// Monotonic instant for lease arithmetic.
    fn now(&self) -> Instant;
    /// Wall-clock UTC for sun position and reading timestamps.
    fn utc(&self) -> DateTime<Utc>;
    /// Wait `by`. A manual clock just moves forward.
    fn sleep(&self, by: Duration);
}

/// The host clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, by: Duration) {
        std::thread::sleep(by);
    }
}

/// Hand-advanced clock for tests and simulations.
///
/// Both views move together: `advance(d)` moves `now()` and `utc()` by `d`.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    base_utc: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            base: Instant::now(),
            base_utc: start,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self
            .offset
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self
            .offset
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset()
    }

    fn utc(&self) -> DateTime<Utc> {
        let offset = TimeDelta::from_std(self.offset()).unwrap_or(TimeDelta::MAX);
        self.base_utc + offset
    }

    fn sleep(&self, by: Duration) {
        self.advance(by);
    }
}
