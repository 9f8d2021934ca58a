//! relayq - polling event/queue consumer
//!
//! Consumes one or more queues subscribed to a topic and logs each message
//! before acking it. Supports the in-memory backend for local experiments
//! and the AWS backend, optionally pointed at an emulator endpoint.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relayq::{handler_fn, Broker, ConsumerOptions, Delivery, EventConsumer, HandlerError};

#[derive(Parser, Debug)]
#[command(name = "relayq")]
#[command(about = "Polling event/queue consumer", long_about = None)]
struct Args {
    /// Topic the queues subscribe to (falls back to the relayq config file
    /// and RELAYQ_* environment)
    #[arg(short, long)]
    topic: Option<String>,

    /// Queue to consume; repeat or comma-separate for several
    #[arg(short, long = "queue", env = "RELAYQ_QUEUES", value_delimiter = ',')]
    queues: Vec<String>,

    /// Broker backend: memory or aws
    #[arg(long, default_value = "memory", env = "RELAYQ_BACKEND")]
    backend: String,

    /// Custom provider endpoint, for local emulators
    #[arg(long, env = "RELAYQ_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Milliseconds between poll cycles
    #[arg(long)]
    listen_interval: Option<u64>,

    /// Receive batch size and per-pass concurrency budget
    #[arg(long)]
    max_number_of_messages: Option<i32>,

    /// Surface receive/send/ack failures instead of logging them
    #[arg(long)]
    propagate_errors: bool,

    /// Namespace prefix for provider-side queue names
    #[arg(long)]
    queue_prefix: Option<String>,

    /// Send this body to the first queue before consuming, as demo traffic
    #[arg(long)]
    send: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RELAYQ_LOG_LEVEL")]
    log_level: String,
}

fn build_options(args: &Args) -> anyhow::Result<ConsumerOptions> {
    let mut options = match ConsumerOptions::load() {
        Ok(options) => options,
        Err(_) => {
            let Some(topic) = &args.topic else {
                anyhow::bail!(
                    "topic name required: pass --topic, set RELAYQ_TOPIC_NAME, \
                     or provide a relayq config file"
                );
            };
            ConsumerOptions::new(topic)
        }
    };

    if let Some(topic) = &args.topic {
        options.topic_name = topic.clone();
    }
    if let Some(listen_interval) = args.listen_interval {
        options.listen_interval = listen_interval;
    }
    if let Some(max) = args.max_number_of_messages {
        options.max_number_of_messages = max;
    }
    if args.propagate_errors {
        options.propagate_errors = true;
    }
    if args.queue_prefix.is_some() {
        options.queue_prefix = args.queue_prefix.clone();
    }

    Ok(options)
}

async fn log_and_ack(delivery: Delivery) -> Result<(), HandlerError> {
    info!(
        queue = %delivery.queue_name(),
        message_id = %delivery.message().message_id,
        body = %delivery.body(),
        "Message received"
    );
    delivery.ack().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "relayq={0},relayq_memory={0},relayq_aws={0}",
                    args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.queues.is_empty() {
        anyhow::bail!("no queues given: pass --queue at least once");
    }

    let options = build_options(&args)?;

    let broker: Arc<dyn Broker> = match args.backend.as_str() {
        "memory" => Arc::new(relayq_memory::MemoryBroker::new()),
        "aws" => Arc::new(relayq_aws::AwsBroker::connect(args.endpoint_url.as_deref()).await),
        other => anyhow::bail!("unknown backend '{other}' (expected memory or aws)"),
    };

    let consumer = Arc::new(EventConsumer::initialize(broker, options).await?);
    for queue in &args.queues {
        consumer
            .register_queue(queue.as_str(), handler_fn(log_and_ack))
            .await?;
    }

    if let Some(body) = &args.send {
        consumer.send_raw(&args.queues[0], body.clone()).await?;
    }

    info!(
        backend = %args.backend,
        topic = %consumer.topic_address(),
        queues = args.queues.len(),
        "Consuming"
    );
    consumer.run().await?;

    Ok(())
}
