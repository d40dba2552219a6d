//! Typed producers and consumers over a partitioned log broker
//!
//! This module hides the broker client behind two small seams,
//! [`ProducerClient`] and [`ConsumerClient`], and builds the delivery
//! guarantees on top of them.
//!
//! # Features
//!
//! - **Ordered Batch Sends**: one record in flight per call, each acknowledged
//!   before the next, then a flush before returning
//! - **Batched Commits**: the checkpoint advances every N handled payloads and
//!   never past a payload the handler has not seen
//! - **Cooperative Cancellation**: the loop observes a cancellation token
//!   between every item and once per poll cycle
//! - **Dead Letter Redirection**: failed payloads are forwarded unchanged to a
//!   dead-letter destination
//! - **Metrics Integration**: Prometheus counters for every delivery path
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────────────┐
//! │ BrokerMessageProducer│        │ BrokerMessageConsumer        │
//! │ - send()             │        │ - consume(dest, handler, tok)│
//! │ - send_batch()       │        │ - stop() / close()           │
//! └──────────┬───────────┘        └──────────────┬───────────────┘
//!            │ ProducerClient                    │ ConsumerClient
//!            ▼                                   ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │   Kafka (rdkafka)                 │   In-memory               │
//! └──────────────────────────────────────────────────────────────┘
//!
//! handler ──▶ FailedMessageListener ──(non-broker failure)──▶ producer ──▶ dead-letter topic
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mq_bridge::messaging::{
//!     handler_fn, BrokerMessageConsumer, BrokerMessageProducer, ConsumerOptions,
//!     InMemoryBroker, MessageConsumer, MessageProducer, Settings,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::new()
//!         .with("bootstrap.servers", "localhost:9092")
//!         .with("client.id", "example")
//!         .with("group.id", "example-group")
//!         .with("schema.registry.url", "http://localhost:8081");
//!
//!     let broker = InMemoryBroker::<String>::new();
//!     let producer = BrokerMessageProducer::new(&settings, |_| Ok(broker.producer_client()))?;
//!     let key = |s: &String| Some(s.clone());
//!     producer.send("greetings", &key, &"hello".to_string()).await?;
//!
//!     let consumer = BrokerMessageConsumer::new(&settings, ConsumerOptions::default(), |s| {
//!         Ok(broker.consumer_client(s.group_id.clone()))
//!     })?;
//!     let cancel = CancellationToken::new();
//!     let handler = handler_fn(|msg: String| async move {
//!         println!("Consumed: {}", msg);
//!         Ok(())
//!     });
//!
//!     let stopper = cancel.clone();
//!     tokio::spawn(async move { stopper.cancel() });
//!     let stopped = consumer.consume("greetings", &handler, &cancel).await?;
//!     println!("handled {}", stopped.stats.handled);
//!
//!     Ok(())
//! }
//! ```

pub mod allow_list;
mod codec;
mod config;
mod consumer;
mod error;
mod kafka;
mod listener;
mod memory;
mod metrics;
mod producer;
mod traits;

pub use codec::{CodecError, JsonCodec, PayloadCodec};
pub use config::{
    ConsumerOptions, ConsumerSettings, ProducerSettings, Settings, BOOTSTRAP_SERVERS, CLIENT_ID,
    GROUP_ID, SCHEMA_REGISTRY_URL,
};
pub use consumer::{BrokerMessageConsumer, ConsumerState};
pub use error::{BrokerError, BrokerErrorKind, MessagingError, MessagingResult};
pub use kafka::{classify_kafka_error, KafkaConsumerClient, KafkaProducerClient};
pub use listener::FailedMessageListener;
pub use memory::{InMemoryBroker, InMemoryConsumerClient, InMemoryProducerClient, StoredRecord};
pub use metrics::{init_messaging_metrics, MESSAGING_METRICS};
pub use producer::BrokerMessageProducer;
pub use traits::{
    handler_fn, Cancelled, ConsumeStats, ConsumerClient, DeliveryAck, FnHandler, KeyProvider,
    MessageConsumer, MessageHandler, MessageProducer, NoKey, ProducerClient,
};
