//! # gabbro-consensus: replication-side request deduplication
//!
//! This crate holds the retryable request deduplication index a tablet
//! replica's consensus pipeline runs every client write through, plus the
//! seams it shares with that pipeline (replicate messages, the consensus
//! round handle, the restart-safe clock, metrics).
//!
//! The short version: a client may retry a write it never got an answer
//! for. [`RetryableRequests`] makes sure a retry is never replicated a
//! second time, keeps its own memory bounded by coalescing replicated
//! request ids into time-limited ranges, and tells the write-ahead log how
//! far it may be truncated.
//!
//! Start with [`RetryableRequests`] and the [`retryable_requests`] module
//! docs; the internal `ranges` module documents the range-merge machinery
//! underneath.

pub mod clock;
pub mod error;
pub mod message;
pub mod metrics;
pub mod options;
mod ranges;
pub mod retryable_requests;
pub mod round;


pub use clock::RestartSafeClock;
pub use error::{ReplicationError, ReplicationStatus, RequestError};
pub use message::{ReplicateData, ReplicateMsg, WriteOp};
pub use metrics::{Gauge, MetricEntity};
pub use options::{
    OptionsSnapshot, RetryableRequestsOptions, DEFAULT_RANGE_TIME_LIMIT_SECS,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use retryable_requests::{RetryableRequests, RetryableRequestsCounts};
pub use round::{ConsensusRound, RoundHandle};
