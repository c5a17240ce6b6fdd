//! Integration tests for the query client and responder sharing one queue
//!
//! These tests run a responder task against an in-memory queue and verify the
//! full cycle: correlation between concurrent callers, multi-packet
//! reassembly, commands that never get a reply, and shutdown.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::unreachable
)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::broadcast, task::JoinHandle};
use webipc_common::{
    Signal,
    config::{QueryTimeouts, ResponderConfig},
};
use webipc_control::{
    CommandSender, Envelope, MemoryQueue, MessageType, QueryClient, QueryHandler, Reply,
    Responder, Result, responder::PACKET_PAYLOAD_SIZE,
};

/// Mock backend for testing
struct MockBackend {
    /// Size of the state dump returned for `dumpState`
    dump_size: usize,
}

impl MockBackend {
    fn dump(&self) -> Vec<u8> {
        (0..self.dump_size)
            .map(|i| b"0123456789abcdef"[i % 16])
            .collect()
    }
}

#[async_trait]
impl QueryHandler for MockBackend {
    async fn handle(&self, request: &Envelope) -> Reply {
        if request.id.is_none() {
            return Reply::None;
        }

        match request.payload.as_slice() {
            b"dumpState" => Reply::Packets(self.dump()),
            b"getStatus" => Reply::Single(b"32.00`80.00`1`0`0".to_vec()),
            other => {
                let mut reply = b"echo:".to_vec();
                reply.extend_from_slice(other);
                Reply::Single(reply)
            }
        }
    }
}

fn quick_timeouts() -> QueryTimeouts {
    QueryTimeouts {
        max_retries: 200,
        retry_interval_ms: 5,
        stale_after_secs: 30,
    }
}

/// Start a responder on `queue` and return the shutdown sender and task
fn start_backend(
    queue: MemoryQueue,
    backend: MockBackend,
) -> (broadcast::Sender<Signal>, JoinHandle<Result<()>>) {
    let (tx, rx) = broadcast::channel(1);
    let responder = Responder::new(queue).with_config(ResponderConfig {
        poll_interval_ms: 1,
    });

    let handle = tokio::spawn(async move { responder.serve(&backend, rx).await });
    (tx, handle)
}

async fn stop_backend(tx: broadcast::Sender<Signal>, handle: JoinHandle<Result<()>>) {
    tx.send(Signal::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("responder did not shut down")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_query_round_trip() {
    let queue = MemoryQueue::new();
    let (tx, handle) = start_backend(queue.clone(), MockBackend { dump_size: 0 });

    let client = QueryClient::new(queue.clone()).with_timeouts(quick_timeouts());
    let status = client.query_text("getStatus").await.unwrap();
    assert_eq!(status, "32.00`80.00`1`0`0");

    stop_backend(tx, handle).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queries_get_their_own_responses() {
    let queue = MemoryQueue::new();
    let (tx, handle) = start_backend(queue.clone(), MockBackend { dump_size: 0 });

    let client = Arc::new(QueryClient::new(queue.clone()).with_timeouts(quick_timeouts()));
    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let text = format!("caller-{i}");
                let response = client.query_text(&text).await.unwrap();
                (text, response)
            })
        })
        .collect();

    for task in tasks {
        let (text, response) = task.await.unwrap();
        assert_eq!(response, format!("echo:{text}"));
    }

    stop_backend(tx, handle).await;
    assert_eq!(queue.len(MessageType::RESPONSE), 0);
}

#[tokio::test]
async fn test_multi_packet_state_dump() {
    let queue = MemoryQueue::new();
    let backend = MockBackend {
        dump_size: PACKET_PAYLOAD_SIZE * 3 + 17,
    };
    let expected = backend.dump();
    let (tx, handle) = start_backend(queue.clone(), backend);

    let client = QueryClient::new(queue.clone()).with_timeouts(quick_timeouts());
    let dump = client.query("dumpState", true).await.unwrap();
    assert_eq!(dump.len(), expected.len());
    assert_eq!(dump, expected);

    stop_backend(tx, handle).await;
}

#[tokio::test]
async fn test_commands_get_no_reply() {
    let queue = MemoryQueue::new();
    let (tx, handle) = start_backend(queue.clone(), MockBackend { dump_size: 0 });

    let sender = CommandSender::new(queue.clone());
    sender.send_command("chargeNow").await.unwrap();
    sender.send_command("setNonScheduledAmps=16").await.unwrap();

    // Give the responder time to drain both commands.
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop_backend(tx, handle).await;

    assert!(queue.is_empty());
    assert_eq!(queue.sends(MessageType::RESPONSE), 0);
}

#[tokio::test]
async fn test_query_without_backend_times_out() {
    let queue = MemoryQueue::new();
    let client = QueryClient::new(queue.clone()).with_timeouts(QueryTimeouts {
        max_retries: 3,
        retry_interval_ms: 1,
        stale_after_secs: 30,
    });

    let err = client.query("getStatus", false).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.is_transport());

    // The unanswered query is still waiting for a backend.
    assert_eq!(queue.len(MessageType::REQUEST), 1);
}

#[tokio::test]
async fn test_responder_shutdown_with_idle_queue() {
    let queue = MemoryQueue::new();
    let (tx, handle) = start_backend(queue, MockBackend { dump_size: 0 });

    tokio::time::sleep(Duration::from_millis(10)).await;
    stop_backend(tx, handle).await;
}
