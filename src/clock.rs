//! Monotonic duration source.
//!
//! A [`Reading`] is an opaque nanosecond tick. It carries no wall-clock
//! meaning; two readings are only ever compared by subtraction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// An opaque, nanosecond-scale monotonic tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Reading(u64);

impl Reading {
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time from `earlier` to `self`, or `None` if `earlier` is actually
    /// later (the underlying source went backwards).
    pub fn checked_since(self, earlier: Reading) -> Option<Duration> {
        self.0.checked_sub(earlier.0).map(Duration::from_nanos)
    }
}

/// Anything that can produce monotonic readings.
///
/// Implementations must not fail; a broken clock is fatal to the process,
/// not something callers recover from.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Reading;
}

// ─── MonotonicClock ──────────────────────────────────────────────

/// Production clock backed by [`Instant`], anchored at construction so
/// readings stay small.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Reading {
        // u64 nanoseconds covers ~584 years of uptime
        let nanos = self.anchor.elapsed().as_nanos();
        Reading(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

// ─── ManualClock ─────────────────────────────────────────────────

/// Hand-driven clock for tests and simulations. It is allowed to move
/// backwards so clock-anomaly handling can be exercised.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(nanos: u64) -> Self {
        Self {
            nanos: AtomicU64::new(nanos),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(by, Ordering::SeqCst);
    }

    pub fn set(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Reading {
        Reading(self.nanos.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now();
        for _ in 0..1_000 {
            let next = clock.now();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn checked_since_detects_backwards_readings() {
        let a = Reading::from_nanos(500);
        let b = Reading::from_nanos(1_500);
        assert_eq!(b.checked_since(a), Some(Duration::from_nanos(1_000)));
        assert_eq!(a.checked_since(b), None);
    }

    #[test]
    fn manual_clock_moves_both_ways() {
        let clock = ManualClock::starting_at(10);
        clock.advance(Duration::from_nanos(5));
        assert_eq!(clock.now().as_nanos(), 15);
        clock.set(3);
        assert_eq!(clock.now().as_nanos(), 3);
    }
}
