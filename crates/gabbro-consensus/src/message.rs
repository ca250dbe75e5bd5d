//! Replicate messages as seen by the deduplication index.
//!
//! The index does not care about the bulk of a replicate message — only the
//! dedup header of its write payload (who sent it, which request number,
//! which watermark) and the log position the message was assigned. A message
//! without a write payload carries no dedup state at all and passes through
//! the index untouched.

use bytes::Bytes;
use gabbro_types::{ClientId, OpId, RetryableRequestId};
use serde::{Deserialize, Serialize};

// ============================================================================
// Wire messages
// ============================================================================

/// A client write carried inside a replicate message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOp {
    /// Identity of the submitting client. Nil disables deduplication for
    /// this write.
    pub client_id: ClientId,

    /// Client-assigned request number, the deduplication key.
    pub request_id: RetryableRequestId,

    /// Lowest request id the client still has in flight. The index discards
    /// its state strictly below this watermark.
    pub min_running_request_id: RetryableRequestId,

    /// Opaque row operations; the index never inspects these.
    pub payload: Bytes,
}

/// An entry submitted to the replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateMsg {
    /// Log position assigned to this entry.
    pub op_id: OpId,

    /// The write payload, if this entry is a client write. Config changes
    /// and no-ops leave it empty.
    pub write: Option<WriteOp>,
}

impl ReplicateMsg {
    /// Creates a replicate message carrying a client write.
    pub fn write(op_id: OpId, write: WriteOp) -> Self {
        Self {
            op_id,
            write: Some(write),
        }
    }

    /// Creates a replicate message without a write payload.
    pub fn without_write(op_id: OpId) -> Self {
        Self { op_id, write: None }
    }

    /// Returns true if this entry carries a client write.
    pub fn has_write(&self) -> bool {
        self.write.is_some()
    }
}

// ============================================================================
// ReplicateData - the index's view of a message
// ============================================================================

/// The dedup header extracted from a replicate message.
///
/// `from_msg` yields `None` for messages the index must ignore: entries
/// without a write payload, and writes stamped with the nil client id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicateData {
    pub client_id: ClientId,
    pub request_id: RetryableRequestId,
    pub min_running_request_id: RetryableRequestId,
    pub op_id: OpId,
}

impl ReplicateData {
    pub fn from_msg(msg: &ReplicateMsg) -> Option<Self> {
        let write = msg.write.as_ref()?;
        if write.client_id.is_nil() {
            return None;
        }
        Some(Self {
            client_id: write.client_id,
            request_id: write.request_id,
            min_running_request_id: write.min_running_request_id,
            op_id: msg.op_id,
        })
    }
}

impl std::fmt::Display for ReplicateData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} (min running {}) op_id: {}",
            self.client_id, self.request_id, self.min_running_request_id, self.op_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_write(client_id: ClientId) -> WriteOp {
        WriteOp {
            client_id,
            request_id: 5,
            min_running_request_id: 2,
            payload: Bytes::from_static(b"row"),
        }
    }

    #[test]
    fn extracts_dedup_header_from_write() {
        let client = ClientId::from_parts(1, 2);
        let msg = ReplicateMsg::write(OpId::new(1, 10), test_write(client));

        let data = ReplicateData::from_msg(&msg).unwrap();
        assert_eq!(data.client_id, client);
        assert_eq!(data.request_id, 5);
        assert_eq!(data.min_running_request_id, 2);
        assert_eq!(data.op_id, OpId::new(1, 10));
    }

    #[test]
    fn non_write_entries_have_no_dedup_header() {
        let msg = ReplicateMsg::without_write(OpId::new(1, 10));
        assert!(!msg.has_write());
        assert!(ReplicateData::from_msg(&msg).is_none());
    }

    #[test]
    fn nil_client_disables_deduplication() {
        let msg = ReplicateMsg::write(OpId::new(1, 10), test_write(ClientId::NIL));
        assert!(ReplicateData::from_msg(&msg).is_none());
    }
}
