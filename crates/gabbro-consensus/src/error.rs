//! Error types surfaced by the retryable request index.

use gabbro_types::{ClientId, RetryableRequestId};
use thiserror::Error;

/// Rejection reasons for registration and lookups.
///
/// These travel back to the client, which uses them to prune its in-flight
/// set: `Expired` tells it the retry horizon has moved past the request,
/// `AlreadyPresent` that the write already committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The request id fell below the client's published watermark.
    #[error(
        "request id {request_id} from client {client_id} is less than min running {min_running_request_id}"
    )]
    Expired {
        client_id: ClientId,
        request_id: RetryableRequestId,
        /// The watermark the request lost against; the client can drop every
        /// in-flight retry below it.
        min_running_request_id: RetryableRequestId,
    },

    /// The request id lies inside an already-replicated range.
    #[error(
        "duplicate request {request_id} from client {client_id} (min running {min_running_request_id})"
    )]
    AlreadyPresent {
        client_id: ClientId,
        request_id: RetryableRequestId,
        min_running_request_id: RetryableRequestId,
    },

    /// No per-client state exists for this client id.
    #[error("client requests data not found for client {0}")]
    ClientNotFound(ClientId),
}

/// Failure delivered to a consensus round whose write did not take effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// Sentinel for duplicates of a committed original. The duplicate round
    /// itself replicated nothing, so it must not observe plain success; this
    /// status says "the write exists, yours was not a second one".
    #[error("Duplicate request")]
    DuplicateRequest,

    /// Replication aborted before commit (leader change, shutdown, ...).
    #[error("replication aborted: {0}")]
    Aborted(String),
}

/// Outcome reported to rounds when their replication concludes.
pub type ReplicationStatus = Result<(), ReplicationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_message_names_the_watermark() {
        let err = RequestError::Expired {
            client_id: ClientId::from_parts(0, 7),
            request_id: 3,
            min_running_request_id: 12,
        };
        let message = err.to_string();
        assert!(message.contains("request id 3"));
        assert!(message.contains("min running 12"));
    }

    #[test]
    fn duplicate_sentinel_has_fixed_text() {
        assert_eq!(
            ReplicationError::DuplicateRequest.to_string(),
            "Duplicate request"
        );
    }
}
