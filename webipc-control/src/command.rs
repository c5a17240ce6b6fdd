//! Fire-and-forget command path

use webipc_common::outgoing;

use crate::{
    Result,
    envelope::{CorrelationId, Envelope, redacted},
    transport::{MessageType, Transport},
};

/// Sends commands to the backend without waiting for any reply
#[derive(Debug, Clone)]
pub struct CommandSender<T> {
    transport: T,
}

impl<T: Transport> CommandSender<T> {
    #[must_use]
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Enqueue `text` as a command and return as soon as the send succeeds.
    ///
    /// Exactly one envelope is written, carrying the reserved id `0` and the
    /// current time. The response direction of the queue is never read.
    ///
    /// # Errors
    ///
    /// Returns the transport's send error unchanged; nothing is retried.
    pub async fn send_command(&self, text: impl AsRef<[u8]>) -> Result<()> {
        let envelope = Envelope::stamped(CorrelationId::NONE, text.as_ref());

        outgoing!(
            level = DEBUG,
            time = envelope.timestamp,
            "Sending command '{}'",
            redacted(&envelope.payload)
        );

        self.transport
            .send(MessageType::REQUEST, &envelope.encode())
            .await
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }
}
