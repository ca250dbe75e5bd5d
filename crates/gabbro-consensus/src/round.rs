//! The consensus round seam.
//!
//! A round is the consensus pipeline's handle for one log entry in flight:
//! it owns the replicate message and receives exactly one replication-finished
//! notification. The dedup index holds rounds only for *duplicate*
//! submissions — later arrivals of a request id that is already running. The
//! pipeline keeps driving the original; when it concludes, the index fans the
//! outcome out to every attached duplicate.

use std::sync::Arc;

use gabbro_types::OpId;

use crate::error::ReplicationStatus;
use crate::message::ReplicateMsg;

/// One in-flight consensus operation.
///
/// Implementations live in the consensus pipeline and outlive any reference
/// the index holds: the index drops its handles when it delivers the
/// notification.
pub trait ConsensusRound: Send + Sync {
    /// The replicate message this round is driving through the log.
    fn replicate_msg(&self) -> &ReplicateMsg;

    /// Delivers the final outcome of replication.
    ///
    /// `applied_op_ids` is the list of log positions applied on behalf of
    /// this round; duplicates are notified with `None` since nothing was
    /// applied for them. Fired at most once per round by the index.
    fn notify_replication_finished(
        &self,
        status: ReplicationStatus,
        leader_term: i64,
        applied_op_ids: Option<&[OpId]>,
    );
}

/// Shared handle to a round. The pipeline and the index co-own rounds while
/// duplicates are attached.
pub type RoundHandle = Arc<dyn ConsensusRound>;
