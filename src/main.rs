use anyhow::Context;
use clap::{Parser, Subcommand};
use mq_bridge::{
    config::{AppConfig, Backend},
    messaging::{
        handler_fn, init_messaging_metrics, BrokerMessageConsumer, BrokerMessageProducer,
        FailedMessageListener, InMemoryBroker, JsonCodec, KafkaConsumerClient,
        KafkaProducerClient, MessageConsumer, MessageHandler, MessageProducer,
    },
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mq-bridge")]
#[command(about = "Produce and consume test payloads through a message broker", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "MQ_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send numbered payloads to a topic
    Produce {
        #[arg(short, long, default_value = "dummyTopic")]
        topic: String,

        /// Number of payloads to send
        #[arg(short = 'n', long, default_value = "10")]
        count: u64,

        /// Payloads per send call
        #[arg(short, long, default_value = "1")]
        batch: usize,
    },

    /// Print every payload of a topic until Ctrl-C
    Consume {
        #[arg(short, long, default_value = "dummyTopic")]
        topic: String,

        /// Fail on payloads containing this text, so they get dead-lettered
        #[arg(short, long)]
        reject: Option<String>,
    },

    /// Consume and produce on the same topic until Ctrl-C
    Demo {
        #[arg(short, long, default_value = "dummyTopic")]
        topic: String,

        /// Stop producing after this many payloads
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Pause between two sends, in milliseconds
        #[arg(short, long, default_value = "100")]
        interval_ms: u64,

        /// Fail on payloads containing this text, so they get dead-lettered
        #[arg(short, long)]
        reject: Option<String>,
    },
}

/// Test payload, keyed by its value
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Dummy {
    value: String,
}

fn dummy_key(dummy: &Dummy) -> Option<String> {
    Some(dummy.value.clone())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    init_tracing(&config);
    init_messaging_metrics();

    info!("Starting mq-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(backend = ?config.backend, "Broker backend selected");

    let broker = InMemoryBroker::<Dummy>::new();
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    match cli.command {
        Commands::Produce {
            topic,
            count,
            batch,
        } => {
            let producer = build_producer(&config, &broker)?;
            let payloads: Vec<Dummy> = (0..count)
                .map(|n| Dummy {
                    value: format!("Hello, {}", n),
                })
                .collect();

            for chunk in payloads.chunks(batch.max(1)) {
                if cancel.is_cancelled() {
                    break;
                }
                producer.send_batch(&topic, &dummy_key, chunk).await?;
                for dummy in chunk {
                    println!("Produced : {}", dummy.value);
                }
            }
            producer.close().await?;
        }

        Commands::Consume { topic, reject } => {
            let consumer = build_consumer(&config, &broker)?;
            let handler = build_handler(&config, &broker, reject)?;

            let stopped = consumer.consume(&topic, handler.as_ref(), &cancel).await?;
            info!(
                handled = stopped.stats.handled,
                commits = stopped.stats.commits,
                "Consumer stopped"
            );
        }

        Commands::Demo {
            topic,
            count,
            interval_ms,
            reject,
        } => {
            let consumer = build_consumer(&config, &broker)?;
            let handler = build_handler(&config, &broker, reject)?;

            let consumer_topic = topic.clone();
            let consumer_cancel = cancel.clone();
            let consuming = tokio::spawn(async move {
                consumer
                    .consume(&consumer_topic, handler.as_ref(), &consumer_cancel)
                    .await
            });

            let producer = build_producer(&config, &broker)?;
            let mut sent = 0u64;
            while !cancel.is_cancelled() && count.map_or(true, |max| sent < max) {
                let dummy = Dummy {
                    value: format!("Hello, {}", sent),
                };
                producer.send(&topic, &dummy_key, &dummy).await?;
                println!("Produced : {}", dummy.value);
                sent += 1;

                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                }
            }
            producer.close().await?;

            if count.is_some() {
                info!(sent, "All payloads sent, press Ctrl-C to stop consuming");
            }
            let stopped = consuming.await.context("Consumer task panicked")??;
            info!(
                sent,
                handled = stopped.stats.handled,
                commits = stopped.stats.commits,
                "Demo finished"
            );
        }
    }

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("mq_bridge={}", config.observability.log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!(signal = "SIGINT", "Signal received, stopping");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
}

fn build_producer(
    config: &AppConfig,
    broker: &InMemoryBroker<Dummy>,
) -> anyhow::Result<Arc<dyn MessageProducer<Dummy>>> {
    let producer: Arc<dyn MessageProducer<Dummy>> = match config.backend {
        Backend::Kafka => Arc::new(BrokerMessageProducer::<Dummy, _>::new(&config.producer, |settings| {
            KafkaProducerClient::new(settings, JsonCodec::<Dummy>::new())
        })?),
        Backend::InMemory => Arc::new(BrokerMessageProducer::<Dummy, _>::new(&config.producer, |_| {
            Ok(broker.producer_client())
        })?),
    };
    Ok(producer)
}

fn build_consumer(
    config: &AppConfig,
    broker: &InMemoryBroker<Dummy>,
) -> anyhow::Result<Box<dyn MessageConsumer<Dummy>>> {
    let options = config.consumer_options.clone();
    let consumer: Box<dyn MessageConsumer<Dummy>> = match config.backend {
        Backend::Kafka => Box::new(BrokerMessageConsumer::<Dummy, _>::new(
            &config.consumer,
            options,
            |settings| KafkaConsumerClient::new(settings, JsonCodec::<Dummy>::new()),
        )?),
        Backend::InMemory => Box::new(BrokerMessageConsumer::<Dummy, _>::new(
            &config.consumer,
            options,
            |settings| Ok(broker.consumer_client(settings.group_id.clone())),
        )?),
    };
    Ok(consumer)
}

/// Printing handler, wrapped in a dead-letter listener when a dead-letter
/// topic is configured
fn build_handler(
    config: &AppConfig,
    broker: &InMemoryBroker<Dummy>,
    reject: Option<String>,
) -> anyhow::Result<Box<dyn MessageHandler<Dummy>>> {
    let print = handler_fn(move |dummy: Dummy| {
        let reject = reject.clone();
        async move {
            if let Some(reject) = reject.filter(|r| dummy.value.contains(r.as_str())) {
                anyhow::bail!("payload `{}` rejected on `{}`", dummy.value, reject);
            }
            println!("Consumed : {}", dummy.value);
            Ok(())
        }
    });

    match config.dead_letter_topic.as_deref() {
        Some(topic) if !topic.trim().is_empty() => {
            let producer = build_producer(config, broker)?;
            info!(dead_letter_topic = topic, "Dead-lettering enabled");
            Ok(Box::new(FailedMessageListener::new(producer, print, topic)?))
        }
        _ => Ok(Box::new(print)),
    }
}
