//! Retryable request deduplication index.
//!
//! # Overview
//!
//! One instance per tablet replica. Clients may resubmit a write after a
//! network failure, a leader change, or a timeout; without this index a
//! retry could replicate twice and apply a duplicate side effect. The index
//! guarantees:
//!
//! 1. **At-most-once replication** per (client id, request id) — a duplicate
//!    submission is either attached to the in-flight original or rejected as
//!    already replicated.
//! 2. **Bounded memory** — replicated ids coalesce into time-bounded ranges
//!    (see the `ranges` module) and old ranges expire.
//! 3. **A WAL retention floor** — the minimum op id the index still depends
//!    on, so log garbage collection knows where it must stop.
//!
//! # Request lifecycle
//!
//! ```text
//! register ──▶ running (or attach duplicate / reject)
//!                 │
//!        replication outcome (ok / err)
//!                 ▼
//! replication_finished ──▶ replicated ranges (on ok)
//!                               │
//! clean_expired_replicated_and_get_min_op_id ──▶ WAL GC floor
//! bootstrap (WAL replay) ────────────────────▶ replicated ranges
//! ```
//!
//! # Concurrency
//!
//! Not internally synchronized. The consensus pipeline already serializes
//! appends through its queue, and every operation here completes without
//! suspension, so the pipeline's serialization is the locking discipline.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gabbro_types::{ClientId, OpId, RestartSafeTime, RetryableRequestId};

use crate::clock::RestartSafeClock;
use crate::error::{ReplicationError, ReplicationStatus, RequestError};
use crate::message::{ReplicateData, ReplicateMsg};
use crate::metrics::MetricEntity;
use crate::options::RetryableRequestsOptions;
use crate::ranges::{RangeAdd, ReplicatedRanges};
use crate::round::RoundHandle;

// ============================================================================
// Per-client state
// ============================================================================

/// A request currently being driven through replication.
struct RunningRequest {
    entry_time: RestartSafeTime,

    /// Later submissions of the same request id that arrived while the
    /// original was in flight. Notified with the original's outcome, then
    /// dropped.
    duplicate_rounds: Vec<RoundHandle>,
}

impl std::fmt::Debug for RunningRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningRequest")
            .field("entry_time", &self.entry_time)
            .field("duplicate_rounds", &self.duplicate_rounds.len())
            .finish()
    }
}

/// Everything the index tracks for one client.
#[derive(Debug, Default)]
struct ClientRequests {
    running: HashMap<RetryableRequestId, RunningRequest>,
    replicated: ReplicatedRanges,

    /// The client's published watermark: ids strictly below it are garbage.
    min_running_request_id: RetryableRequestId,

    /// When both sub-structures last became empty. Client deletion is
    /// delayed past the retention window so that stale retries keep failing
    /// the watermark check while the client is merely idle.
    empty_since: Option<RestartSafeTime>,
}

impl ClientRequests {
    /// Advances the watermark and trims replicated state below it. A lower
    /// or equal candidate is ignored — the watermark never regresses.
    fn cleanup_replicated(
        &mut self,
        new_min_running_request_id: RetryableRequestId,
        metrics: Option<&MetricEntity>,
    ) {
        if new_min_running_request_id > self.min_running_request_id {
            let erased = self.replicated.trim_below(new_min_running_request_id);
            if let Some(metrics) = metrics {
                metrics
                    .replicated_retryable_request_ranges
                    .sub(erased as i64);
            }
            self.min_running_request_id = new_min_running_request_id;
        }
    }

    fn add_replicated(
        &mut self,
        log_prefix: &str,
        data: &ReplicateData,
        time: RestartSafeTime,
        range_time_limit: Duration,
        metrics: Option<&MetricEntity>,
    ) {
        match self
            .replicated
            .add(data.request_id, data.op_id, time, range_time_limit)
        {
            RangeAdd::NewRange => {
                if let Some(metrics) = metrics {
                    metrics.replicated_retryable_request_ranges.increment();
                }
            }
            RangeAdd::JoinedRanges => {
                if let Some(metrics) = metrics {
                    metrics.replicated_retryable_request_ranges.decrement();
                }
            }
            RangeAdd::ExtendedFront | RangeAdd::ExtendedBack => {}
            RangeAdd::AlreadyPresent => {
                if cfg!(debug_assertions) {
                    tracing::error!(
                        prefix = %log_prefix,
                        replicated = ?self.replicated.iter().collect::<Vec<_>>(),
                        "replicated requests"
                    );
                }
                tracing::error!(prefix = %log_prefix, %data, "request already replicated");
                debug_assert!(false, "request already replicated: {data}");
            }
        }
    }
}

// ============================================================================
// The index
// ============================================================================

/// Totals across all clients. Intended for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryableRequestsCounts {
    pub running: usize,
    pub replicated: usize,
}

/// The per-tablet retryable request deduplication index.
///
/// See the module docs for the lifecycle. All methods expect serialized
/// access from the tablet's consensus pipeline.
#[derive(Debug)]
pub struct RetryableRequests {
    log_prefix: String,
    clients: HashMap<ClientId, ClientRequests>,
    clock: RestartSafeClock,
    options: Arc<RetryableRequestsOptions>,
    metrics: Option<Arc<MetricEntity>>,
}

impl RetryableRequests {
    /// Creates an empty index with default options.
    pub fn new(log_prefix: impl Into<String>) -> Self {
        Self::with_options(log_prefix, Arc::new(RetryableRequestsOptions::default()))
    }

    /// Creates an empty index sharing the given runtime options.
    pub fn with_options(
        log_prefix: impl Into<String>,
        options: Arc<RetryableRequestsOptions>,
    ) -> Self {
        let log_prefix = log_prefix.into();
        tracing::debug!(prefix = %log_prefix, "retryable requests index started");
        Self {
            log_prefix,
            clients: HashMap::new(),
            clock: RestartSafeClock::new(),
            options,
            metrics: None,
        }
    }

    /// Registers a round before it is submitted to replication.
    ///
    /// Returns:
    /// - `Ok(true)` — new request; the caller drives it through replication
    ///   and later reports [`Self::replication_finished`].
    /// - `Ok(false)` — the same request id is already running. The round was
    ///   attached to the original as a duplicate; the caller must *not*
    ///   submit it. It will be notified when the original concludes.
    /// - `Err(Expired)` — the id is below the client's watermark.
    /// - `Err(AlreadyPresent)` — the id lies inside a replicated range.
    ///
    /// Rounds without a write payload are admitted untouched.
    ///
    /// `entry_time` defaults to the current clock reading; the bootstrap
    /// path passes explicit times recovered from the WAL.
    pub fn register(
        &mut self,
        round: &RoundHandle,
        entry_time: Option<RestartSafeTime>,
    ) -> Result<bool, RequestError> {
        let data = match ReplicateData::from_msg(round.replicate_msg()) {
            Some(data) => data,
            None => return Ok(true),
        };

        let entry_time = entry_time.unwrap_or_else(|| self.clock.now());
        let metrics = self.metrics.as_deref();
        let client = self.clients.entry(data.client_id).or_default();

        client.cleanup_replicated(data.min_running_request_id, metrics);

        if data.request_id < client.min_running_request_id {
            return Err(RequestError::Expired {
                client_id: data.client_id,
                request_id: data.request_id,
                min_running_request_id: client.min_running_request_id,
            });
        }

        if client.replicated.covers(data.request_id) {
            return Err(RequestError::AlreadyPresent {
                client_id: data.client_id,
                request_id: data.request_id,
                min_running_request_id: client.min_running_request_id,
            });
        }

        match client.running.entry(data.request_id) {
            Entry::Occupied(entry) => {
                entry.into_mut().duplicate_rounds.push(Arc::clone(round));
                return Ok(false);
            }
            Entry::Vacant(entry) => {
                entry.insert(RunningRequest {
                    entry_time,
                    duplicate_rounds: Vec::new(),
                });
            }
        }

        tracing::trace!(prefix = %self.log_prefix, %data, "running request added");
        if let Some(metrics) = metrics {
            metrics.running_retryable_requests.increment();
        }

        Ok(true)
    }

    /// Records the outcome of a round previously admitted by
    /// [`Self::register`].
    ///
    /// Attached duplicates are notified first: with the sentinel
    /// [`ReplicationError::DuplicateRequest`] if the original committed
    /// (they were not themselves replicated, so plain success must not be
    /// reported), or with the original's failure verbatim. On success the
    /// request id migrates into the replicated ranges.
    pub fn replication_finished(
        &mut self,
        replicate_msg: &ReplicateMsg,
        status: &ReplicationStatus,
        leader_term: i64,
    ) {
        let data = match ReplicateData::from_msg(replicate_msg) {
            Some(data) => data,
            None => return,
        };

        let metrics = self.metrics.as_deref();
        let client = self.clients.entry(data.client_id).or_default();

        let running = match client.running.remove(&data.request_id) {
            Some(running) => running,
            None => {
                if cfg!(debug_assertions) {
                    tracing::error!(
                        prefix = %self.log_prefix,
                        running = ?client.running.keys().collect::<Vec<_>>(),
                        "running requests"
                    );
                }
                tracing::error!(
                    prefix = %self.log_prefix,
                    %data,
                    "replication finished for request with unknown id"
                );
                debug_assert!(false, "replication finished for request with unknown id {data}");
                return;
            }
        };

        tracing::trace!(
            prefix = %self.log_prefix,
            %data,
            outcome = if status.is_ok() { "replicated" } else { "aborted" },
            "running request finished"
        );

        let status_for_duplicate: ReplicationStatus = match status {
            Ok(()) => Err(ReplicationError::DuplicateRequest),
            Err(err) => Err(err.clone()),
        };
        for duplicate in &running.duplicate_rounds {
            duplicate.notify_replication_finished(status_for_duplicate.clone(), leader_term, None);
        }

        if let Some(metrics) = metrics {
            metrics.running_retryable_requests.decrement();
        }

        if status.is_ok() {
            let range_time_limit = self.options.range_time_limit();
            client.add_replicated(
                &self.log_prefix,
                &data,
                running.entry_time,
                range_time_limit,
                metrics,
            );
        }
    }

    /// Re-inserts a previously committed replicate during WAL replay.
    ///
    /// The outcome is already known, so the running stage is skipped and the
    /// id goes straight into the replicated ranges. Finding the id running
    /// here means replay and live traffic interleaved — a caller bug.
    pub fn bootstrap(&mut self, replicate_msg: &ReplicateMsg, entry_time: RestartSafeTime) {
        let data = match ReplicateData::from_msg(replicate_msg) {
            Some(data) => data,
            None => return,
        };

        let metrics = self.metrics.as_deref();
        let client = self.clients.entry(data.client_id).or_default();

        if client.running.contains_key(&data.request_id) {
            if cfg!(debug_assertions) {
                tracing::error!(
                    prefix = %self.log_prefix,
                    running = ?client.running.keys().collect::<Vec<_>>(),
                    "running requests"
                );
            }
            tracing::error!(prefix = %self.log_prefix, %data, "bootstrapped running request");
            debug_assert!(false, "bootstrapped running request {data}");
            return;
        }
        tracing::trace!(prefix = %self.log_prefix, %data, "bootstrapped");

        client.cleanup_replicated(data.min_running_request_id, metrics);

        let range_time_limit = self.options.range_time_limit();
        client.add_replicated(
            &self.log_prefix,
            &data,
            entry_time,
            range_time_limit,
            metrics,
        );
    }

    /// Expires replicated ranges past the retention window and returns the
    /// minimum op id the index still depends on.
    ///
    /// The caller must not truncate the WAL past the returned op id. When no
    /// replicated state survives anywhere, returns [`OpId::MAX`] — the index
    /// pins nothing.
    ///
    /// Also evicts clients that have been completely empty for a full
    /// retention window, delayed so their watermark keeps rejecting stale
    /// retries while they are merely idle.
    pub fn clean_expired_replicated_and_get_min_op_id(&mut self) -> OpId {
        let now = self.clock.now();
        let clean_start = now.saturating_sub(self.options.request_timeout());

        let mut result = OpId::MAX;
        let metrics = self.metrics.as_deref();
        let log_prefix = &self.log_prefix;
        self.clients.retain(|client_id, client| {
            let (erased, surviving) = client.replicated.expire_prefix(clean_start);
            if let Some(metrics) = metrics {
                metrics
                    .replicated_retryable_request_ranges
                    .sub(erased as i64);
            }
            if let Some(op_id) = surviving {
                result = result.min(op_id);
            }

            if client.replicated.is_empty() && client.running.is_empty() {
                match client.empty_since {
                    None => client.empty_since = Some(now),
                    Some(empty_since) if empty_since < clean_start => {
                        tracing::debug!(
                            prefix = %log_prefix,
                            client = %client_id,
                            "evicted idle client"
                        );
                        return false;
                    }
                    Some(_) => {}
                }
            }
            true
        });

        result
    }

    /// The stored watermark for a client, or `ClientNotFound` if the index
    /// holds no state for it. Callers use this to reject stale retries
    /// without touching the index.
    pub fn min_running_request_id(
        &self,
        client_id: ClientId,
    ) -> Result<RetryableRequestId, RequestError> {
        self.clients
            .get(&client_id)
            .map(|client| client.min_running_request_id)
            .ok_or(RequestError::ClientNotFound(client_id))
    }

    /// The index's restart-safe clock. The bootstrap driver feeds recovered
    /// time points to [`RestartSafeClock::update_bound`] through this.
    pub fn clock(&self) -> &RestartSafeClock {
        &self.clock
    }

    /// The runtime options this index samples.
    pub fn options(&self) -> &RetryableRequestsOptions {
        &self.options
    }

    /// Attaches the per-tablet metric entity. Safe to call once before first
    /// use; until then, gauge accounting is skipped.
    pub fn set_metric_entity(&mut self, entity: Arc<MetricEntity>) {
        self.metrics = Some(entity);
    }

    /// Totals of running requests and replicated ranges across clients.
    pub fn counts(&self) -> RetryableRequestsCounts {
        let mut counts = RetryableRequestsCounts::default();
        for client in self.clients.values() {
            counts.running += client.running.len();
            counts.replicated += client.replicated.len();
        }
        counts
    }
}

// ============================================================================
// Tests (bootstrap and watermark paths; full scenarios live in tests.rs)
// ============================================================================
