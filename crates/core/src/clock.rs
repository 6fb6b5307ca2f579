// SPDX-License-Identifier: MIT

//! Clock abstraction for testable time handling

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A clock that provides the current time.
///
/// `now` drives scheduler deadlines and backoff; `unix_ms` stamps persisted
/// rows (message creation, activation windows).
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn unix_ms(&self) -> u64;
}

/// Real system clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Fake clock for testing with controllable time
#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<FakeClockState>>,
}

struct FakeClockState {
    now: Instant,
    unix_ms: u64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::at(1_000_000_000_000)
    }

    /// Create a clock pinned to the given unix-milli timestamp.
    pub fn at(unix_ms: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeClockState { now: Instant::now(), unix_ms })),
        }
    }

    /// Advance both the monotonic and wall clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.inner.lock();
        state.now += duration;
        state.unix_ms += duration.as_millis() as u64;
    }

    /// Pin the wall clock to a specific unix-milli timestamp.
    pub fn set_unix_ms(&self, unix_ms: u64) {
        self.inner.lock().unix_ms = unix_ms;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.inner.lock().now
    }

    fn unix_ms(&self) -> u64 {
        self.inner.lock().unix_ms
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
