//! Error types for queue operations

use std::io;

use thiserror::Error;

use crate::{envelope::CorrelationId, transport::MessageType};

/// Errors that can occur while exchanging envelopes over the shared queue
#[derive(Debug, Error)]
pub enum IpcError {
    /// The queue refused a message (full, closed, removed, or too large)
    #[error("Failed to send {len} bytes as type {tag}: {source}")]
    Send {
        tag: MessageType,
        len: usize,
        #[source]
        source: io::Error,
    },

    /// The queue failed for a reason other than "no message of that type"
    #[error("Failed to receive type {tag}: {source}")]
    Receive {
        tag: MessageType,
        #[source]
        source: io::Error,
    },

    /// A dequeued record is too short to hold the envelope header
    #[error("Malformed envelope: {len} bytes is shorter than the {}-byte header", crate::envelope::HEADER_SIZE)]
    MalformedEnvelope { len: usize },

    /// A reply cannot be framed within the packet limits
    #[error("Payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// No matching response arrived within the retry budget
    #[error("Timed out waiting for response to query {id} after {attempts} attempts")]
    Timeout { id: CorrelationId, attempts: u32 },

    /// The caller cancelled the wait
    #[error("Query {0} cancelled")]
    Cancelled(CorrelationId),

    /// The queue key could not be derived from the configured path
    #[error("Invalid queue key: {0}")]
    InvalidQueueKey(String),
}

impl IpcError {
    /// Returns `true` if the link itself is broken rather than the peer slow.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Send { .. } | Self::Receive { .. } | Self::InvalidQueueKey(_)
        )
    }

    /// Returns `true` if the backend did not answer in time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, IpcError>;
