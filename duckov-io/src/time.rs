//! Time utilities
//!
//! The ARQ engine works with wrapping 32-bit millisecond timestamps taken from
//! a monotonic clock. Session code also needs plain 64-bit milliseconds for
//! activity tracking and ping timestamps.

use std::time::{Duration, Instant};

/// Monotonic millisecond clock anchored at creation
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            start: Instant::now(),
        }
    }

    /// Milliseconds since the clock was created
    #[inline]
    pub fn millis(&self) -> i64 {
        self.start.elapsed().as_millis().min(i64::MAX as u128) as i64
    }

    /// Engine timestamp: milliseconds truncated to 32 bits (wraps after ~49 days)
    #[inline]
    pub fn now_ms(&self) -> u32 {
        self.millis() as u32
    }

    /// Get the anchor instant
    pub fn start(&self) -> Instant {
        self.start
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer for periodic operations
///
/// Used for keepalive pings and connect retries.
#[derive(Debug, Clone)]
pub struct Timer {
    interval: Duration,
    last_fire: Instant,
}

impl Timer {
    /// Create a new timer with the given interval
    pub fn new(interval: Duration) -> Self {
        Timer {
            interval,
            last_fire: Instant::now(),
        }
    }

    /// Create a timer that is already expired
    pub fn expired_now(interval: Duration) -> Self {
        let last_fire = Instant::now()
            .checked_sub(interval)
            .unwrap_or_else(Instant::now);
        Timer {
            interval,
            last_fire,
        }
    }

    /// Check if the timer has expired
    pub fn expired(&self) -> bool {
        self.last_fire.elapsed() >= self.interval
    }

    /// Reset the timer
    pub fn reset(&mut self) {
        self.last_fire = Instant::now();
    }

    /// Check and reset if expired
    ///
    /// Returns true if the timer was expired.
    pub fn check_and_reset(&mut self) -> bool {
        if self.expired() {
            self.reset();
            true
        } else {
            false
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time until the timer expires (zero when already expired)
    pub fn remaining(&self) -> Duration {
        self.interval.saturating_sub(self.last_fire.elapsed())
    }
}
