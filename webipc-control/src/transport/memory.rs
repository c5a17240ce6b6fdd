//! In-process queue transport
//!
//! Stands in for the System V queue in tests and single-process setups, with
//! counters and fault hooks for exercising the error paths.

use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use super::{MAX_MESSAGE_SIZE, MessageType, Transport, check_size};
use crate::{IpcError, Result};

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<MessageType, VecDeque<Vec<u8>>>,
    receive_attempts: HashMap<MessageType, usize>,
    sends: HashMap<MessageType, usize>,
    closed: bool,
    pending_faults: usize,
    pending_send_faults: HashMap<MessageType, usize>,
}

impl Inner {
    fn total_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

/// In-process shared queue
///
/// Clones share the same underlying queue, so a `MemoryQueue` handed to
/// several clients and a responder behaves like one OS queue opened by
/// several processes. Records of each type are delivered in FIFO order.
///
/// # Capacity Management
/// An optional capacity limits the number of records held across all types.
/// A send into a full queue fails immediately, the way a non-blocking send
/// into a full OS queue does.
///
/// # Fault Injection
/// [`MemoryQueue::close`] makes every later operation fail, and
/// [`MemoryQueue::fail_next_receives`] and [`MemoryQueue::fail_next_sends`]
/// make only the next few operations fail.
/// Counters record how often each type was sent and polled.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    inner: Arc<Mutex<Inner>>,
    capacity: Option<usize>,
    max_message_size: usize,
}

impl MemoryQueue {
    /// Create an empty queue with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            capacity: None,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Create an empty queue holding at most `capacity` records
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of records of type `tag` waiting
    #[must_use]
    pub fn len(&self, tag: MessageType) -> usize {
        self.lock().queues.get(&tag).map_or(0, VecDeque::len)
    }

    /// Check if nothing of any type is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().total_len() == 0
    }

    /// Copy of the records of type `tag`, oldest first, without removing them
    #[must_use]
    pub fn snapshot(&self, tag: MessageType) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(&tag)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// How many receives of type `tag` have been attempted
    #[must_use]
    pub fn receive_attempts(&self, tag: MessageType) -> usize {
        self.lock().receive_attempts.get(&tag).copied().unwrap_or(0)
    }

    /// How many records of type `tag` have been accepted
    #[must_use]
    pub fn sends(&self, tag: MessageType) -> usize {
        self.lock().sends.get(&tag).copied().unwrap_or(0)
    }

    /// Remove the queue; every later send or receive fails
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Make the next `count` receives fail with a transport error
    pub fn fail_next_receives(&self, count: usize) {
        self.lock().pending_faults = count;
    }

    /// Make the next `count` sends of type `tag` fail with a transport error
    pub fn fail_next_sends(&self, tag: MessageType, count: usize) {
        self.lock().pending_send_faults.insert(tag, count);
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryQueue {
    async fn send(&self, tag: MessageType, bytes: &[u8]) -> Result<()> {
        check_size(tag, bytes, self.max_message_size)?;

        let mut inner = self.lock();
        if inner.closed {
            return Err(IpcError::Send {
                tag,
                len: bytes.len(),
                source: io::Error::new(io::ErrorKind::NotConnected, "queue removed"),
            });
        }

        if let Some(faults) = inner.pending_send_faults.get_mut(&tag)
            && *faults > 0
        {
            *faults -= 1;
            return Err(IpcError::Send {
                tag,
                len: bytes.len(),
                source: io::Error::other("injected send fault"),
            });
        }

        if let Some(cap) = self.capacity
            && inner.total_len() >= cap
        {
            return Err(IpcError::Send {
                tag,
                len: bytes.len(),
                source: io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!("queue full ({cap} messages)"),
                ),
            });
        }

        inner.queues.entry(tag).or_default().push_back(bytes.to_vec());
        *inner.sends.entry(tag).or_default() += 1;
        Ok(())
    }

    async fn try_receive(&self, tag: MessageType) -> Result<Option<Vec<u8>>> {
        let mut inner = self.lock();
        *inner.receive_attempts.entry(tag).or_default() += 1;

        if inner.closed {
            return Err(IpcError::Receive {
                tag,
                source: io::Error::new(io::ErrorKind::NotConnected, "queue removed"),
            });
        }

        if inner.pending_faults > 0 {
            inner.pending_faults -= 1;
            return Err(IpcError::Receive {
                tag,
                source: io::Error::other("injected receive fault"),
            });
        }

        Ok(inner.queues.get_mut(&tag).and_then(VecDeque::pop_front))
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}
