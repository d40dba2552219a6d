//! mq-bridge: typed producers and consumers over a partitioned log broker
//!
//! - [`messaging`]: producer, consumer loop, dead-letter listener and the
//!   Kafka / in-memory broker clients
//! - [`config`]: application configuration for the `mq-bridge` binary

pub mod config;
pub mod messaging;

pub use config::{AppConfig, Backend};
pub use messaging::{
    BrokerMessageConsumer, BrokerMessageProducer, FailedMessageListener, MessageConsumer,
    MessageHandler, MessageProducer, MessagingError, MessagingResult,
};
