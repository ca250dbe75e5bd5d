//! Restart-safe monotonic clock for the deduplication index.
//!
//! # Overview
//!
//! The dedup index stamps every replicated request with a time point and
//! later compares those points against "now" to expire state. Two properties
//! make a plain monotonic clock insufficient:
//!
//! 1. **Restart safety**: after a crash, WAL replay re-inserts ranges carrying
//!    time points from the *previous* process incarnation. Those points must
//!    stay comparable to points the current incarnation produces, and "now"
//!    must never run behind them (otherwise a freshly restarted node would
//!    instantly expire everything it just recovered, or worse, keep it
//!    forever).
//! 2. **Monotonicity**: expiry math (`now - timeout`) assumes time never goes
//!    backwards, even if the system wall clock is adjusted.
//!
//! The clock therefore combines the process-monotonic [`Instant`] timeline
//! with a persisted-timeline origin that only ever moves forward. During WAL
//! replay the bootstrap driver calls [`RestartSafeClock::update_bound`] with
//! every recovered time point, which ratchets the origin so that `now()`
//! lands at or past everything the previous incarnation stamped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use gabbro_types::RestartSafeTime;

/// Monotonic clock whose readings stay ordered across process restarts.
///
/// Readings are [`RestartSafeTime`] points. The clock is cheap to read and
/// safe to share; the origin ratchet uses a relaxed `fetch_max`, which is
/// enough because callers only rely on "never behind any bound installed
/// before this read".
#[derive(Debug)]
pub struct RestartSafeClock {
    /// Process-local monotonic anchor.
    started: Instant,

    /// Origin of the restart-safe timeline, nanoseconds. Only grows.
    origin_nanos: AtomicU64,
}

impl RestartSafeClock {
    /// Creates a clock starting at the timeline epoch.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            origin_nanos: AtomicU64::new(0),
        }
    }

    /// Returns the current point on the restart-safe timeline.
    pub fn now(&self) -> RestartSafeTime {
        let elapsed = self.started.elapsed();
        let origin = Duration::from_nanos(self.origin_nanos.load(Ordering::Relaxed));
        RestartSafeTime::from(origin + elapsed)
    }

    /// Ensures every future `now()` reading is at or past `bound`.
    ///
    /// Called by the bootstrap driver for each time point recovered from the
    /// WAL. Bounds at or before the current reading are no-ops; the origin
    /// never moves backwards.
    pub fn update_bound(&self, bound: RestartSafeTime) {
        let elapsed = self.started.elapsed();
        if let Some(needed) = bound.as_duration().checked_sub(elapsed) {
            self.origin_nanos
                .fetch_max(needed.as_nanos() as u64, Ordering::Relaxed);
        }
    }
}

impl Default for RestartSafeClock {
    fn default() -> Self {
        Self::new()
    }
}
