//! Runtime-tunable options for the retryable request index.
//!
//! Both knobs are operational levers (shrinking the retention window frees
//! WAL space faster at the cost of a shorter retry horizon), so they are
//! runtime-mutable: plain atomics that every operation samples at its top,
//! never cached at construction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default for [`RetryableRequestsOptions::request_timeout`]: how long a
/// replicated request stays in the index to suppress duplicate writes.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Default for [`RetryableRequestsOptions::range_time_limit`]: max delta in
/// time covered by a single replicated-id range.
///
/// The limit prevents a range from growing without bound, because a live
/// range blocks log cleanup. A continuous stream of requests gets split into
/// blocks that can be dropped independently.
pub const DEFAULT_RANGE_TIME_LIMIT_SECS: u64 = 30;

/// Runtime-mutable options shared by every operation of one index instance.
///
/// Reads and writes are relaxed; there is no cross-field consistency to
/// protect and each operation tolerates either the old or the new value.
#[derive(Debug)]
pub struct RetryableRequestsOptions {
    request_timeout_secs: AtomicU64,
    range_time_limit_secs: AtomicU64,
}

impl RetryableRequestsOptions {
    /// Creates options with explicit values (seconds).
    pub fn new(request_timeout_secs: u64, range_time_limit_secs: u64) -> Self {
        Self {
            request_timeout_secs: AtomicU64::new(request_timeout_secs),
            range_time_limit_secs: AtomicU64::new(range_time_limit_secs),
        }
    }

    /// Retention window for replicated requests.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.load(Ordering::Relaxed))
    }

    /// Maximum time span one replicated-id range may cover.
    pub fn range_time_limit(&self) -> Duration {
        Duration::from_secs(self.range_time_limit_secs.load(Ordering::Relaxed))
    }

    /// Replaces the retention window. Takes effect on the next operation.
    pub fn set_request_timeout_secs(&self, secs: u64) {
        self.request_timeout_secs.store(secs, Ordering::Relaxed);
    }

    /// Replaces the range time limit. Takes effect on the next operation.
    pub fn set_range_time_limit_secs(&self, secs: u64) {
        self.range_time_limit_secs.store(secs, Ordering::Relaxed);
    }

    /// Returns the current values as a plain struct, for config dumps and
    /// diagnostics endpoints.
    pub fn snapshot(&self) -> OptionsSnapshot {
        OptionsSnapshot {
            request_timeout_secs: self.request_timeout_secs.load(Ordering::Relaxed),
            range_time_limit_secs: self.range_time_limit_secs.load(Ordering::Relaxed),
        }
    }
}

impl Default for RetryableRequestsOptions {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_RANGE_TIME_LIMIT_SECS)
    }
}

impl From<OptionsSnapshot> for RetryableRequestsOptions {
    fn from(snapshot: OptionsSnapshot) -> Self {
        Self::new(
            snapshot.request_timeout_secs,
            snapshot.range_time_limit_secs,
        )
    }
}

/// Serializable view of [`RetryableRequestsOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsSnapshot {
    pub request_timeout_secs: u64,
    pub range_time_limit_secs: u64,
}
