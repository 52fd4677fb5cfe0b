//! The `Clock` port: the sole source of "now" for handlers and schedulers.
//!
//! Handlers never call `chrono::Utc::now()` directly — everything reads the
//! current time through this trait, so tests can inject a fixed or
//! manually-advanced clock (see `taskbridge-testkit::FakeClock`) and get
//! deterministic behavior out of lease expiry and poll scheduling.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock, used everywhere outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
