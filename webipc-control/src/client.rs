//! Query client
//!
//! Many callers share one response direction on the queue, and the queue can
//! only filter by type. Each query therefore drains responses itself, keeps
//! the ones carrying its own correlation id, and puts everybody else's back
//! for their owners to find, unless they are old enough to be presumed
//! abandoned.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use webipc_common::{config::QueryTimeouts, incoming, internal, outgoing};

use crate::{
    IpcError, Result,
    envelope::{CorrelationId, Envelope, redacted, timestamp_now},
    transport::{MessageType, Transport},
};

/// Outcome of feeding one matching payload to a pending query
#[derive(Debug, PartialEq, Eq)]
enum Progress {
    Complete(Vec<u8>),
    Partial,
}

#[derive(Debug)]
enum Reassembly {
    /// The first matching payload is the answer
    Single,
    /// Waiting for the packet that carries the fragment count
    AwaitingCount,
    Collecting { remaining: u8, buffer: Vec<u8> },
}

/// State of one in-flight query, owned by that call alone
#[derive(Debug)]
struct PendingQuery {
    id: CorrelationId,
    reassembly: Reassembly,
}

impl PendingQuery {
    const fn new(id: CorrelationId, multi_packet: bool) -> Self {
        Self {
            id,
            reassembly: if multi_packet {
                Reassembly::AwaitingCount
            } else {
                Reassembly::Single
            },
        }
    }

    /// Fragments are appended in arrival order; the protocol carries no
    /// sequence numbers, so reordering by the queue would corrupt the result.
    fn accept(&mut self, payload: Vec<u8>) -> Progress {
        match &mut self.reassembly {
            Reassembly::Single => Progress::Complete(payload),
            Reassembly::AwaitingCount => {
                let count = payload.first().copied().unwrap_or(0);
                internal!(level = DEBUG, id = %self.id, "Expecting {count} packet(s)");
                if count == 0 {
                    return Progress::Complete(Vec::new());
                }
                self.reassembly = Reassembly::Collecting {
                    remaining: count,
                    buffer: Vec::new(),
                };
                Progress::Partial
            }
            Reassembly::Collecting { remaining, buffer } => {
                buffer.extend_from_slice(&payload);
                *remaining -= 1;
                if *remaining == 0 {
                    Progress::Complete(std::mem::take(buffer))
                } else {
                    Progress::Partial
                }
            }
        }
    }
}

/// Issues queries to the backend and waits for the matching response
#[derive(Debug, Clone)]
pub struct QueryClient<T> {
    transport: T,
    timeouts: QueryTimeouts,
}

impl<T: Transport> QueryClient<T> {
    /// Create a client with the default retry budget (50 × 100 ms)
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeouts: QueryTimeouts::default(),
        }
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: QueryTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub const fn timeouts(&self) -> &QueryTimeouts {
        &self.timeouts
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `text` as a query and wait for its response.
    ///
    /// With `multi_packet` set, the first matching response is read as a
    /// one-byte fragment count and the result is that many following
    /// fragments concatenated in arrival order.
    ///
    /// # Errors
    ///
    /// - [`IpcError::Send`] if the query could not be enqueued (not retried)
    /// - [`IpcError::Timeout`] if no complete response arrived within the
    ///   retry budget
    pub async fn query(&self, text: impl AsRef<[u8]>, multi_packet: bool) -> Result<Vec<u8>> {
        self.query_as(CorrelationId::generate(), text.as_ref(), multi_packet, None)
            .await
    }

    /// Like [`QueryClient::query`], but gives up early once `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`QueryClient::query`], plus [`IpcError::Cancelled`].
    pub async fn query_with_cancel(
        &self,
        text: impl AsRef<[u8]>,
        multi_packet: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.query_as(
            CorrelationId::generate(),
            text.as_ref(),
            multi_packet,
            Some(cancel),
        )
        .await
    }

    /// Single-packet query whose response is decoded as text.
    ///
    /// # Errors
    ///
    /// As [`QueryClient::query`].
    pub async fn query_text(&self, text: &str) -> Result<String> {
        let bytes = self.query(text, false).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub(crate) async fn query_as(
        &self,
        id: CorrelationId,
        text: &[u8],
        multi_packet: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<u8>> {
        let request = Envelope::stamped(id, text);
        outgoing!(
            level = DEBUG,
            id = %id,
            time = request.timestamp,
            "Sending query '{}'",
            redacted(&request.payload)
        );
        self.transport
            .send(MessageType::REQUEST, &request.encode())
            .await?;

        let mut pending = PendingQuery::new(id, multi_packet);
        let max_retries = self.timeouts.max_retries;

        for attempt in 1..=max_retries {
            // Our own fragments are drained back to back without pausing.
            while let Some(raw) = self.receive(id, attempt).await {
                match Envelope::decode(&raw) {
                    Err(e) => {
                        warn!(id = %id, "Discarding unreadable response: {e}");
                        break;
                    }
                    Ok(envelope) if envelope.id == pending.id => {
                        incoming!(
                            id = %id,
                            len = envelope.payload.len(),
                            "Received response '{}'",
                            redacted(&envelope.payload)
                        );
                        if let Progress::Complete(bytes) = pending.accept(envelope.payload) {
                            return Ok(bytes);
                        }
                    }
                    Ok(envelope) => {
                        self.requeue_or_drop(&envelope, &raw).await;
                        break;
                    }
                }
            }

            if attempt < max_retries {
                self.pause(id, cancel).await?;
            }
        }

        debug!(id = %id, attempts = max_retries, "Gave up waiting for response");
        Err(IpcError::Timeout {
            id,
            attempts: max_retries,
        })
    }

    /// One non-blocking read of the response direction. Failures are logged
    /// and treated as an empty queue; the retry budget bounds the wait.
    async fn receive(&self, id: CorrelationId, attempt: u32) -> Option<Vec<u8>> {
        match self.transport.try_receive(MessageType::RESPONSE).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(id = %id, attempt, "Receive failed, still waiting: {e}");
                None
            }
        }
    }

    /// Put another caller's response back unless it is stale.
    ///
    /// The record is re-sent byte for byte, so its original timestamp keeps
    /// counting toward staleness.
    async fn requeue_or_drop(&self, envelope: &Envelope, raw: &[u8]) {
        let age = envelope.age(timestamp_now());
        if age >= self.timeouts.stale_after_secs {
            internal!(
                level = DEBUG,
                id = %envelope.id,
                age,
                "Dropping abandoned response"
            );
            return;
        }

        internal!(id = %envelope.id, age, "Requeueing response for another caller");
        if let Err(e) = self.transport.send(MessageType::RESPONSE, raw).await {
            warn!(id = %envelope.id, "Failed to requeue response: {e}");
        }
    }

    async fn pause(&self, id: CorrelationId, cancel: Option<&CancellationToken>) -> Result<()> {
        let interval = self.timeouts.retry_interval();
        match cancel {
            Some(token) => {
                tokio::select! {
                    () = tokio::time::sleep(interval) => Ok(()),
                    () = token.cancelled() => {
                        debug!(id = %id, "Query cancelled");
                        Err(IpcError::Cancelled(id))
                    }
                }
            }
            None => {
                tokio::time::sleep(interval).await;
                Ok(())
            }
        }
    }
}
