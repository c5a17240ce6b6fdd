//! Queue transports
//!
//! The protocol only needs two operations from the queue: a non-blocking
//! send of a typed record and a non-blocking receive of the next record of a
//! given type. Anything offering those can carry the protocol.

use std::fmt::{Display, Formatter};

use async_trait::async_trait;

use crate::Result;

pub mod memory;
#[cfg(target_os = "linux")]
pub mod sysv;

pub use memory::MemoryQueue;
#[cfg(target_os = "linux")]
pub use sysv::{QueueKey, SysvQueue};

/// Largest record, header included, the reference queue accepts
pub const MAX_MESSAGE_SIZE: usize = 300;

/// Logical channel selector on the shared queue
///
/// The single physical queue is split into two directions: requests travel
/// toward the backend as [`MessageType::REQUEST`] and responses travel back
/// as [`MessageType::RESPONSE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(i64);

impl MessageType {
    /// Responses written by the backend, read by callers
    pub const RESPONSE: Self = Self(1);
    /// Commands and queries written by callers, read by the backend
    pub const REQUEST: Self = Self(2);

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A shared, multi-reader message queue partitioned by [`MessageType`]
///
/// Implementations must never block: a full queue is a send error and an
/// empty one is `Ok(None)`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Enqueue `bytes` under `tag`
    ///
    /// # Errors
    ///
    /// Returns [`crate::IpcError::Send`] naming the tag and length if the
    /// queue is full, closed, or the record is larger than
    /// [`Transport::max_message_size`].
    async fn send(&self, tag: MessageType, bytes: &[u8]) -> Result<()>;

    /// Dequeue the oldest record of type `tag`, if any
    ///
    /// # Errors
    ///
    /// Returns [`crate::IpcError::Receive`] if the queue itself failed.
    /// Having nothing of that type waiting is `Ok(None)`, not an error.
    async fn try_receive(&self, tag: MessageType) -> Result<Option<Vec<u8>>>;

    fn max_message_size(&self) -> usize {
        MAX_MESSAGE_SIZE
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, tag: MessageType, bytes: &[u8]) -> Result<()> {
        (**self).send(tag, bytes).await
    }

    async fn try_receive(&self, tag: MessageType) -> Result<Option<Vec<u8>>> {
        (**self).try_receive(tag).await
    }

    fn max_message_size(&self) -> usize {
        (**self).max_message_size()
    }
}

/// Check a record against the transport's size limit before sending
pub(crate) fn check_size(tag: MessageType, bytes: &[u8], max: usize) -> Result<()> {
    if bytes.len() > max {
        return Err(crate::IpcError::Send {
            tag,
            len: bytes.len(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("message exceeds maximum size of {max} bytes"),
            ),
        });
    }
    Ok(())
}
