//! Command-line utility for the webipc control link
//!
//! Sends commands and queries to the backend over the shared System V
//! message queue, and can stand in for the backend with an echo responder.

#[cfg(not(target_os = "linux"))]
compile_error!("Only linux is currently supported");

use std::path::PathBuf;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::debug;
use webipc_common::{Signal, config::Config};
use webipc_control::{
    CommandSender, Envelope, IpcError, QueryClient, QueryHandler, QueueKey, Reply, Responder,
    SysvQueue,
};

/// Command-line utility for the webipc control link
#[derive(Parser, Debug)]
#[command(name = "webipcctl")]
#[command(about = "Talk to a webipc backend", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (RON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a command without waiting for a reply
    Command {
        /// Command text, e.g. `setNonScheduledAmps=16`
        text: String,
    },
    /// Send a query and print the response
    Query {
        /// Query text, e.g. `getStatus`
        text: String,
        /// Expect a multi-packet response
        #[arg(short, long)]
        packets: bool,
    },
    /// Answer every query with its own text until interrupted
    EchoResponder,
}

/// The one query a backend always answers in packets
const STATE_DUMP_QUERY: &[u8] = b"dumpState";

/// Replies to each query with the query text. `dumpState` is framed as
/// packets, the way a real backend answers it, so `query dumpState --packets`
/// works against this responder.
struct EchoHandler;

#[async_trait]
impl QueryHandler for EchoHandler {
    async fn handle(&self, request: &Envelope) -> Reply {
        if request.id.is_none() {
            Reply::None
        } else if request.payload == STATE_DUMP_QUERY {
            Reply::Packets(request.payload.clone())
        } else {
            Reply::Single(request.payload.clone())
        }
    }
}

fn open_queue(config: &Config) -> anyhow::Result<SysvQueue> {
    let key = QueueKey::from_path(&config.queue.key_path, config.queue.project_id)?;
    let queue = SysvQueue::open(key).map_err(|e| {
        anyhow::anyhow!(
            "Failed to open message queue for {}: {e}",
            config.queue.key_path.display()
        )
    })?;
    Ok(queue.with_max_message_size(config.queue.max_message_size))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    webipc_common::logging::init();

    let cli = Cli::parse();
    let config = Config::discover(cli.config.as_deref())?;
    let queue = open_queue(&config)?;

    match cli.command {
        Commands::Command { text } => {
            CommandSender::new(queue).send_command(&text).await?;
            println!("Sent");
        }
        Commands::Query { text, packets } => {
            let client = QueryClient::new(queue).with_timeouts(config.query.clone());
            match client.query(&text, packets).await {
                Ok(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
                Err(e @ IpcError::Timeout { .. }) => {
                    anyhow::bail!(
                        "{e}\nNo response within {:?}. Is the backend running?",
                        config.query.total_wait()
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::EchoResponder => {
            let responder = Responder::new(queue).with_config(config.responder.clone());
            let (tx, rx) = broadcast::channel(1);

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok()
                    && let Err(e) = tx.send(Signal::Shutdown)
                {
                    debug!("Responder already stopped: {e}");
                }
            });

            responder.serve(&EchoHandler, rx).await?;
        }
    }

    Ok(())
}
