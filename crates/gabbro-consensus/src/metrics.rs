//! Gauges exported by the retryable request index.
//!
//! Two gauges per tablet, both cheap relaxed atomics:
//!
//! - `running_retryable_requests` — requests currently being replicated
//! - `replicated_retryable_request_ranges` — live replicated-id ranges
//!
//! The ranges gauge is the one worth watching: it is a direct proxy for how
//! much WAL the dedup index is pinning. Metrics are late-bound — the index
//! starts without an entity and skips counting until one is attached.

use std::sync::atomic::{AtomicI64, Ordering};

// ============================================================================
// Gauge
// ============================================================================

/// A 64-bit gauge with relaxed atomic updates.
///
/// Updates never need ordering against other memory: readers only ever want
/// a recent value, and the index itself is externally serialized anyway.
#[derive(Debug)]
pub struct Gauge(AtomicI64);

impl Gauge {
    /// Creates a gauge at the given starting value.
    pub const fn new(value: i64) -> Self {
        Self(AtomicI64::new(value))
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn decrement(&self) {
        self.sub(1);
    }

    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn sub(&self, delta: i64) {
        self.0.fetch_sub(delta, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Metric entity
// ============================================================================

/// Per-tablet metric entity holding the dedup gauges.
///
/// One entity per tablet replica; the exporter walks entities and emits each
/// gauge under the tablet's identity.
#[derive(Debug)]
pub struct MetricEntity {
    tablet_id: String,

    /// Number of running retryable requests.
    pub running_retryable_requests: Gauge,

    /// Number of replicated retryable request ranges.
    pub replicated_retryable_request_ranges: Gauge,
}

impl MetricEntity {
    /// Creates an entity with both gauges at zero.
    pub fn new(tablet_id: impl Into<String>) -> Self {
        Self {
            tablet_id: tablet_id.into(),
            running_retryable_requests: Gauge::new(0),
            replicated_retryable_request_ranges: Gauge::new(0),
        }
    }

    /// The tablet this entity belongs to.
    pub fn tablet_id(&self) -> &str {
        &self.tablet_id
    }
}
