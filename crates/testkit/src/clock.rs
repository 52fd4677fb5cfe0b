//! A `Clock` a test can set and advance instead of waiting on the wall
//! clock, used wherever a handler test needs to control lease expiry or
//! poll-due timing deterministically.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use taskbridge_ports::Clock;

#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("lock poisoned") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("lock poisoned");
        *now += by;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("lock poisoned")
    }
}
