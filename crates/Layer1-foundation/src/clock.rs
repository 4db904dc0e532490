//! Time source for entry expiration
//!
//! Stores never call `Utc::now()` directly so TTL behaviour can be tested
//! without sleeping.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

/// Source of "now"
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the current wall-clock time
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Whether an entry created at `created` is still inside `retention` at `now`
///
/// Timestamps in the future (clock skew) count as fresh.
pub fn is_within_retention(created: DateTime<Utc>, now: DateTime<Utc>, retention: Duration) -> bool {
    match now.signed_duration_since(created).to_std() {
        Ok(age) => age < retention,
        Err(_) => true,
    }
}
