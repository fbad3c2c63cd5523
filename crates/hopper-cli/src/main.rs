//! hopper: operate a hopper queue from the command line.
//!
//! - `push`: enqueue a raw message (`--ensure` skips duplicates)
//! - `stats`: queue counts as JSON
//! - `dead-letters`: most recent dead letters as JSON
//! - `retry`: one retry pass
//! - `clear`: drop every queued and leased message
//! - `demo`: run a processor over a demo workload until ctrl-c

mod config;
mod demo;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use hopper_core::app::{QueueBuilder, QueueProcessor};
use hopper_core::impls::{InMemoryStore, LoggingDeadMessageHandler, SqliteStore, TracingEventPublisher};
use hopper_core::ports::{AlwaysActive, MessageStore};
use hopper_core::{Envelope, MessageKind, Queue, QueueExt, StoreQueue};
use tracing::info;

use crate::config::HopperConfig;

#[derive(Parser, Debug)]
#[command(name = "hopper")]
#[command(about = "Durable at-least-once work queue")]
struct Args {
    /// TOML file with [queue], [processor] and [store] sections
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides [store].path
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Push {
        /// Message kind, e.g. `billing.invoice.v1`
        kind: String,
        /// JSON payload
        payload: String,
        /// Delay before the message becomes ready, in milliseconds
        #[arg(long, default_value = "0")]
        delay_ms: u64,
        /// Insert only if no live copy exists
        #[arg(long)]
        ensure: bool,
    },
    Stats,
    DeadLetters {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    Retry,
    Clear,
    Demo {
        /// Greetings to push before starting
        #[arg(short, long, default_value = "5")]
        count: u32,
        /// Failed deliveries before the handler starts succeeding
        #[arg(short, long, default_value = "2")]
        failures: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing();
    let args = Args::parse();

    let mut config = HopperConfig::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        config.store.path = db;
    }
    let queue = build_queue(&config)?;

    match args.command {
        Command::Push {
            kind,
            payload,
            delay_ms,
            ensure,
        } => {
            let envelope = Envelope::new(MessageKind::new(kind), serde_json::from_str(&payload)?);
            let fingerprint = envelope.fingerprint();
            let delay = Duration::from_millis(delay_ms);
            if !ensure {
                queue.push(envelope, delay).await?;
                println!("{fingerprint}");
            } else if queue.ensure(envelope, delay).await? {
                println!("{fingerprint}");
            } else {
                println!("{fingerprint} already queued");
            }
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&queue.counts().await?)?);
        }
        Command::DeadLetters { limit } => {
            let letters = queue.dead_letters(limit).await?;
            println!("{}", serde_json::to_string_pretty(&letters)?);
        }
        Command::Retry => {
            println!("{}", serde_json::to_string_pretty(&queue.retry().await?)?);
        }
        Command::Clear => queue.clear().await?,
        Command::Demo { count, failures } => run_demo(queue, &config, count, failures).await?,
    }
    Ok(())
}

fn build_queue(config: &HopperConfig) -> Result<StoreQueue, Box<dyn std::error::Error>> {
    let namespace = config.queue.namespace();
    let store: Arc<dyn MessageStore> = if config.in_memory() {
        Arc::new(InMemoryStore::new(namespace))
    } else {
        Arc::new(SqliteStore::open(&config.store.path, namespace)?)
    };
    let queue = QueueBuilder::new(config.queue.clone())
        .store(store)
        .event_publisher(Arc::new(TracingEventPublisher))
        .dead_message_handler(Arc::new(LoggingDeadMessageHandler))
        .build()?;
    Ok(queue)
}

async fn run_demo(
    queue: StoreQueue,
    config: &HopperConfig,
    count: u32,
    failures: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let queue = Arc::new(queue);
    for i in 0..count {
        let greet = demo::Greet {
            name: format!("guest-{i}"),
        };
        queue.push_message(&greet, Duration::ZERO).await?;
    }
    info!(count, "demo messages pushed, ctrl-c to stop");

    let processor = QueueProcessor::spawn(
        queue.clone(),
        demo::registry(failures)?,
        Arc::new(AlwaysActive),
        config.processor.clone(),
    )?;
    tokio::signal::ctrl_c().await?;
    processor.shutdown_and_join().await;

    println!("{}", serde_json::to_string_pretty(&queue.counts().await?)?);
    Ok(())
}
