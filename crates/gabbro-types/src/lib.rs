//! # gabbro-types: Core types for `Gabbro`
//!
//! This crate contains shared types used across the `Gabbro` system:
//! - Client identity ([`ClientId`])
//! - Request numbering ([`RetryableRequestId`])
//! - Replicated log positions ([`OpId`])
//! - Restart-safe time points ([`RestartSafeTime`])
//!
//! Everything here is a small `Copy` value with total order where the
//! consuming indexes need one.

use std::{
    fmt::Display,
    ops::{Add, AddAssign},
    time::Duration,
};

use serde::{Deserialize, Serialize};

// ============================================================================
// ClientId - Copy (16-byte opaque value)
// ============================================================================

/// Opaque 128-bit identifier of a client session.
///
/// Clients mint their own ids (two random 64-bit halves) and carry them in
/// every write. Replicas only ever compare and hash them; the halves have no
/// internal structure.
///
/// The all-zero value is reserved as the nil sentinel and never identifies a
/// real client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u128);

impl ClientId {
    /// The nil sentinel. Marks "no client" on rounds without a write payload.
    pub const NIL: ClientId = ClientId(0);

    /// Creates a client id from its two 64-bit halves.
    pub fn from_parts(hi: u64, lo: u64) -> Self {
        Self((u128::from(hi) << 64) | u128::from(lo))
    }

    /// Returns the `(hi, lo)` halves.
    pub fn as_parts(&self) -> (u64, u64) {
        ((self.0 >> 64) as u64, self.0 as u64)
    }

    /// Returns true if this is the nil sentinel.
    pub fn is_nil(&self) -> bool {
        self.0 == 0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (hi, lo) = self.as_parts();
        write!(f, "{hi:016x}-{lo:016x}")
    }
}

impl From<u128> for ClientId {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl From<ClientId> for u128 {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

// ============================================================================
// RetryableRequestId
// ============================================================================

/// Client-assigned number of a retryable write.
///
/// Monotonically increasing per client, gaps allowed. This is a plain alias
/// rather than a newtype: the deduplication index lives on adjacency
/// arithmetic (`id + 1`, `id + 2`) and watermark comparisons, and wrapping
/// every one of those in accessors buys nothing — the ids never mix with
/// other integer domains inside the index.
pub type RetryableRequestId = i64;

// ============================================================================
// OpId - Copy (16-byte value, ordered by term then index)
// ============================================================================

/// Position of an operation in the replicated log: `(term, index)`.
///
/// Total order is lexicographic — term first, then index — which matches
/// log truncation semantics: everything at or below a given `OpId` may be
/// garbage collected together.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct OpId {
    term: i64,
    index: i64,
}

impl OpId {
    /// The maximum op id. Used as the "retain nothing on my account"
    /// watermark when no replicated state pins the log.
    pub const MAX: OpId = OpId {
        term: i64::MAX,
        index: i64::MAX,
    };

    /// Creates an op id from a term and a log index.
    pub fn new(term: i64, index: i64) -> Self {
        Self { term, index }
    }

    /// Returns the leader term this operation was appended in.
    pub fn term(&self) -> i64 {
        self.term
    }

    /// Returns the log index.
    pub fn index(&self) -> i64 {
        self.index
    }
}

impl Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.term, self.index)
    }
}

// ============================================================================
// RestartSafeTime - Copy (8-byte value on a restart-safe timeline)
// ============================================================================

/// A point on the restart-safe monotonic timeline, as a duration since the
/// timeline's epoch.
///
/// The timeline survives process restarts of the same node: a point recovered
/// from the write-ahead log of a previous incarnation stays comparable to
/// points produced by the current one, and the clock never runs behind any
/// recovered point. How that bound is maintained is the clock's business (see
/// the consensus crate); this type is just the value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RestartSafeTime(Duration);

impl RestartSafeTime {
    /// The timeline epoch.
    pub const ZERO: RestartSafeTime = RestartSafeTime(Duration::ZERO);

    /// Creates a time point `secs` seconds past the epoch.
    ///
    /// Mostly useful in tests; production code gets points from the clock.
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Creates a time point from nanoseconds past the epoch.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(Duration::from_nanos(nanos))
    }

    /// Returns the offset from the epoch.
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Subtracts a duration, clamping at the epoch.
    ///
    /// Clamping is the behavior expiry sweeps want: early in a node's life
    /// `now - timeout` precedes the epoch, and nothing can be older than the
    /// epoch anyway.
    pub fn saturating_sub(&self, rhs: Duration) -> RestartSafeTime {
        Self(self.0.saturating_sub(rhs))
    }
}

impl Add<Duration> for RestartSafeTime {
    type Output = RestartSafeTime;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<Duration> for RestartSafeTime {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs;
    }
}

impl Display for RestartSafeTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}s", self.0.as_secs_f64())
    }
}

impl From<Duration> for RestartSafeTime {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl From<RestartSafeTime> for Duration {
    fn from(time: RestartSafeTime) -> Self {
        time.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_round_trips_parts() {
        let id = ClientId::from_parts(0xDEAD_BEEF, 0xCAFE);
        assert_eq!(id.as_parts(), (0xDEAD_BEEF, 0xCAFE));
        assert!(!id.is_nil());
    }

    #[test]
    fn client_id_nil_sentinel() {
        assert!(ClientId::NIL.is_nil());
        assert_eq!(ClientId::from_parts(0, 0), ClientId::NIL);
        assert!(!ClientId::from_parts(0, 1).is_nil());
    }

    #[test]
    fn client_id_displays_as_hex_halves() {
        let id = ClientId::from_parts(1, 2);
        assert_eq!(id.to_string(), "0000000000000001-0000000000000002");
    }

    #[test]
    fn op_id_orders_by_term_then_index() {
        assert!(OpId::new(1, 100) < OpId::new(2, 1));
        assert!(OpId::new(2, 1) < OpId::new(2, 2));
        assert!(OpId::new(2, 2) < OpId::MAX);
    }

    #[test]
    fn op_id_min_fold_picks_earlier_slot() {
        let a = OpId::new(1, 10);
        let b = OpId::new(1, 7);
        assert_eq!(a.min(b), b);
        assert_eq!(OpId::MAX.min(a), a);
    }

    #[test]
    fn restart_safe_time_arithmetic() {
        let t = RestartSafeTime::from_secs(100);
        assert_eq!(t + Duration::from_secs(20), RestartSafeTime::from_secs(120));
        assert_eq!(
            t.saturating_sub(Duration::from_secs(30)),
            RestartSafeTime::from_secs(70)
        );
        // Clamped at the epoch rather than underflowing.
        assert_eq!(
            t.saturating_sub(Duration::from_secs(1000)),
            RestartSafeTime::ZERO
        );
    }

    #[test]
    fn restart_safe_time_total_order() {
        let earlier = RestartSafeTime::from_secs(5);
        let later = RestartSafeTime::from_secs(6);
        assert!(earlier < later);
        assert_eq!(earlier.max(later), later);
    }
}
