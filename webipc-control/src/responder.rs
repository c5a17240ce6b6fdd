//! Backend side of the protocol
//!
//! The backend reads commands and queries from the request direction,
//! handles them, and writes any reply to the response direction carrying the
//! request's own timestamp and correlation id. Replies too large for one
//! record are split into a count packet followed by the fragments.

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{error, info, warn};
use webipc_common::{Signal, config::ResponderConfig, incoming, outgoing};

use crate::{
    IpcError, Result,
    envelope::{Envelope, HEADER_SIZE, redacted},
    transport::{MessageType, Transport},
};

/// Largest payload carried by one response record. Transports with a smaller
/// message limit get correspondingly smaller packets.
pub const PACKET_PAYLOAD_SIZE: usize = 290;

/// Most fragments a multi-packet reply can announce in its one-byte count
pub const MAX_PACKETS: usize = u8::MAX as usize;

/// What the backend sends back for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Nothing; commands are never answered
    None,
    /// One record, truncated to the packet size
    Single(Vec<u8>),
    /// A count record followed by packet-sized fragments
    Packets(Vec<u8>),
}

/// Handler trait for processing requests taken off the queue
///
/// Implement this trait to give the backend its behaviour
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Handle a command or query and decide the reply
    async fn handle(&self, request: &Envelope) -> Reply;
}

/// Split a reply into the records written to the response direction, each
/// carrying at most `packet_size` bytes of payload
///
/// # Errors
///
/// Returns [`IpcError::PayloadTooLarge`] if a multi-packet reply needs more
/// than [`MAX_PACKETS`] fragments.
pub fn frame_reply(request: &Envelope, reply: Reply, packet_size: usize) -> Result<Vec<Envelope>> {
    let respond = |payload: &[u8]| Envelope::new(request.timestamp, request.id, payload);

    match reply {
        Reply::None => Ok(Vec::new()),
        Reply::Single(mut payload) => {
            payload.truncate(packet_size);
            Ok(vec![respond(&payload)])
        }
        Reply::Packets(payload) => {
            let too_large = || IpcError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PACKETS * packet_size,
            };
            let count = match packet_size {
                0 if payload.is_empty() => 0,
                0 => return Err(too_large()),
                size => payload.len().div_ceil(size),
            };
            let count_byte = u8::try_from(count).map_err(|_| too_large())?;

            let mut records = Vec::with_capacity(count + 1);
            records.push(respond(&[count_byte]));
            if packet_size > 0 {
                records.extend(payload.chunks(packet_size).map(respond));
            }
            Ok(records)
        }
    }
}

/// Serves requests from the shared queue
pub struct Responder<T> {
    transport: T,
    config: ResponderConfig,
}

impl<T: Transport> Responder<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: ResponderConfig::default(),
        }
    }

    #[must_use]
    pub const fn with_config(mut self, config: ResponderConfig) -> Self {
        self.config = config;
        self
    }

    /// Payload bytes that fit in one response record on this transport
    pub fn packet_size(&self) -> usize {
        self.transport
            .max_message_size()
            .saturating_sub(HEADER_SIZE)
            .min(PACKET_PAYLOAD_SIZE)
    }

    /// Handle at most one waiting request.
    ///
    /// Returns `Ok(false)` if nothing was waiting. Malformed requests are
    /// discarded and count as handled.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue fails, or if a reply cannot be framed or
    /// sent. A reply that fails part way may leave some fragments queued;
    /// their owner discards them once they go stale.
    pub async fn poll_once(&self, handler: &dyn QueryHandler) -> Result<bool> {
        let Some(raw) = self.transport.try_receive(MessageType::REQUEST).await? else {
            return Ok(false);
        };

        let request = match Envelope::decode(&raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("Discarding unreadable request: {e}");
                return Ok(true);
            }
        };

        incoming!(
            level = INFO,
            id = %request.id,
            time = request.timestamp,
            "Request '{}'",
            redacted(&request.payload)
        );

        let reply = handler.handle(&request).await;
        if request.id.is_none() {
            if reply != Reply::None {
                warn!("Ignoring reply to a command");
            }
            return Ok(true);
        }

        for record in frame_reply(&request, reply, self.packet_size())? {
            outgoing!(
                id = %record.id,
                len = record.payload.len(),
                "Response '{}'",
                redacted(&record.payload)
            );
            self.transport
                .send(MessageType::RESPONSE, &record.encode())
                .await?;
        }

        Ok(true)
    }

    /// Serve requests until a shutdown signal arrives.
    ///
    /// Waiting requests are drained back to back, yielding between them; the
    /// loop only sleeps when the request direction is empty. Shutdown is
    /// honoured even while requests keep arriving. Per-request failures are
    /// logged and do not stop the loop.
    ///
    /// # Errors
    ///
    /// Currently never fails; the `Result` keeps room for fatal setup errors.
    pub async fn serve(
        &self,
        handler: &dyn QueryHandler,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<()> {
        info!("Responder polling every {:?}", self.config.poll_interval());

        loop {
            let busy = match self.poll_once(handler).await {
                Ok(handled) => handled,
                Err(e) => {
                    error!("Error handling request: {e}");
                    false
                }
            };

            let signal = if busy {
                match shutdown.try_recv() {
                    Err(TryRecvError::Empty) => {
                        tokio::task::yield_now().await;
                        continue;
                    }
                    sig => sig.map_err(|e| e.to_string()),
                }
            } else {
                tokio::select! {
                    () = tokio::time::sleep(self.config.poll_interval()) => continue,
                    sig = shutdown.recv() => sig.map_err(|e| e.to_string()),
                }
            };

            match signal {
                Ok(Signal::Shutdown | Signal::Finalised) => {
                    info!("Responder shutting down");
                }
                Err(e) => {
                    error!("Responder shutdown channel error: {e}");
                }
            }
            break;
        }

        Ok(())
    }
}
