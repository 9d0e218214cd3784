//! Time source abstraction.
//!
//! All components take their timestamps from a shared `Clock` so tests can
//! drive the pipeline with a manually-advanced clock instead of sleeping.
//! Production uses wall time for timestamps and a monotonic instant for
//! staleness arithmetic; the system clock is never read directly elsewhere.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Instant;

pub trait Clock: Send + Sync {
    /// Wall-clock time (UTC). Used for timestamps, windows, and daily resets.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Milliseconds on a monotonic axis. Never moves backward, even when the
    /// wall clock does.
    fn monotonic_ms(&self) -> u64;
}

/// Production clock.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually-advanced clock for tests. Monotonic time is derived from the
/// furthest wall time ever observed, so rewinding the wall clock (to test
/// skew handling) does not rewind the monotonic axis.
pub struct ManualClock {
    inner: RwLock<ManualClockState>,
}

struct ManualClockState {
    now: DateTime<Utc>,
    origin: DateTime<Utc>,
    high_water: DateTime<Utc>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: RwLock::new(ManualClockState {
                now: start,
                origin: start,
                high_water: start,
            }),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut state = self.inner.write();
        state.now += delta;
        if state.now > state.high_water {
            state.high_water = state.now;
        }
    }

    /// Set wall time directly. Backward jumps are allowed here; that is the
    /// point of testing the skew watchdog.
    pub fn set(&self, now: DateTime<Utc>) {
        let mut state = self.inner.write();
        state.now = now;
        if now > state.high_water {
            state.high_water = now;
        }
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.inner.read().now
    }

    fn monotonic_ms(&self) -> u64 {
        let state = self.inner.read();
        state
            .high_water
            .signed_duration_since(state.origin)
            .num_milliseconds()
            .max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now_utc(), start);

        clock.advance(chrono::Duration::seconds(7));
        assert_eq!(clock.now_utc(), start + chrono::Duration::seconds(7));
        assert_eq!(clock.monotonic_ms(), 7_000);
    }

    #[test]
    fn manual_clock_monotonic_survives_rewind() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::seconds(30));
        clock.set(start - chrono::Duration::seconds(10));

        // Wall time went backward, monotonic time did not.
        assert!(clock.now_utc() < start);
        assert_eq!(clock.monotonic_ms(), 30_000);
    }
}
