//! Command and query correlation over a shared message queue
//!
//! A frontend and a backend exchange envelopes over one System V message
//! queue with two directions, distinguished by message type:
//! - Commands are fire-and-forget and carry correlation id `0`
//! - Queries carry a random non-zero id and wait for the matching response
//! - Large responses arrive as a count packet followed by fragments
//!
//! Every waiting caller drains the shared response direction, keeps its own
//! responses, and requeues fresh ones that belong to somebody else.

pub mod client;
pub mod command;
pub mod envelope;
pub mod error;
pub mod responder;
pub mod transport;

pub use client::QueryClient;
pub use command::CommandSender;
pub use envelope::{CorrelationId, Envelope};
pub use error::{IpcError, Result};
pub use responder::{QueryHandler, Reply, Responder};
#[cfg(target_os = "linux")]
pub use transport::{QueueKey, SysvQueue};
pub use transport::{MemoryQueue, MessageType, Transport};
