//! Kafka broker client implementation

use crate::messaging::codec::PayloadCodec;
use crate::messaging::config::{ConsumerSettings, ProducerSettings, Settings};
use crate::messaging::error::{BrokerError, MessagingError, MessagingResult};
use crate::messaging::traits::{ConsumerClient, DeliveryAck, ProducerClient};
use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::Message;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Classify an rdkafka error for the consumer loop.
///
/// Consumption errors are per-record unless their code says the client can
/// no longer make progress; every other failure is fatal.
pub fn classify_kafka_error(err: &KafkaError) -> BrokerError {
    let message = err.to_string();
    match err {
        KafkaError::PartitionEOF(_) => BrokerError::transient(message),
        KafkaError::MessageConsumption(code) if !is_fatal_code(*code) => {
            BrokerError::transient(message)
        }
        _ => BrokerError::fatal(message),
    }
}

fn is_fatal_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::Fatal
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::Authentication
            | RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed
            | RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::InvalidConfig
            | RDKafkaErrorCode::UnsupportedVersion
    )
}

fn client_config(settings: &Settings) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    for (key, value) in settings.iter() {
        client_config.set(key, value);
    }
    client_config
}

/// Offsets are stored for every pulled message and committed only by the
/// consumer loop, whatever the caller configured.
fn consumer_config(settings: &Settings) -> ClientConfig {
    let mut config = client_config(settings);
    config
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "true");
    config
}

/// Kafka producer client
pub struct KafkaProducerClient<T> {
    producer: Mutex<Option<Arc<FutureProducer>>>,
    codec: Arc<dyn PayloadCodec<T>>,
}

impl<T> KafkaProducerClient<T> {
    /// Create a new Kafka producer from validated settings
    pub fn new(
        settings: &ProducerSettings,
        codec: impl PayloadCodec<T> + 'static,
    ) -> MessagingResult<Self> {
        let producer: FutureProducer = client_config(&settings.client_settings)
            .create()
            .map_err(|e| {
                MessagingError::broker(
                    &settings.bootstrap_servers,
                    "connect",
                    classify_kafka_error(&e),
                )
            })?;

        info!(
            bootstrap = %settings.bootstrap_servers,
            client_id = %settings.client_id,
            "Kafka producer created"
        );

        Ok(Self {
            producer: Mutex::new(Some(Arc::new(producer))),
            codec: Arc::new(codec),
        })
    }

    fn handle(&self) -> Result<Arc<FutureProducer>, BrokerError> {
        self.producer
            .lock()
            .clone()
            .ok_or_else(|| BrokerError::fatal("Kafka producer is closed"))
    }
}

#[async_trait]
impl<T: Send + Sync> ProducerClient<T> for KafkaProducerClient<T> {
    async fn produce(
        &self,
        destination: &str,
        key: Option<&str>,
        payload: &T,
    ) -> Result<DeliveryAck, BrokerError> {
        let producer = self.handle()?;
        let bytes = self
            .codec
            .encode(payload)
            .map_err(|e| BrokerError::fatal(format!("payload encoding failed: {}", e)))?;

        let mut record: FutureRecord<'_, str, Vec<u8>> =
            FutureRecord::to(destination).payload(&bytes);
        if let Some(key) = key {
            record = record.key(key);
        }

        let (partition, offset) = producer
            .send(record, Timeout::Never)
            .await
            .map_err(|(e, _)| classify_kafka_error(&e))?;

        Ok(DeliveryAck { partition, offset })
    }

    async fn flush(&self, timeout: Option<Duration>) -> Result<(), BrokerError> {
        let producer = self.handle()?;
        let timeout = timeout.map(Timeout::After).unwrap_or(Timeout::Never);

        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BrokerError::fatal(format!("flush task failed: {}", e)))?
            .map_err(|e| classify_kafka_error(&e))
    }

    async fn close(&self) {
        if self.producer.lock().take().is_some() {
            debug!("Kafka producer handle released");
        }
    }
}

struct ConsumerHandle<T> {
    consumer: Arc<StreamConsumer>,
    codec: Arc<dyn PayloadCodec<T>>,
}

/// Kafka consumer client with manual commits
pub struct KafkaConsumerClient<T> {
    handle: Option<ConsumerHandle<T>>,
}

impl<T> KafkaConsumerClient<T> {
    /// Create a new Kafka consumer from validated settings.
    ///
    /// Auto-commit is always disabled and offset storing always enabled: the
    /// consumer loop owns the checkpoint.
    pub fn new(
        settings: &ConsumerSettings,
        codec: impl PayloadCodec<T> + 'static,
    ) -> MessagingResult<Self> {
        let consumer: StreamConsumer = consumer_config(&settings.client_settings)
            .create()
            .map_err(|e| {
                MessagingError::broker(
                    &settings.bootstrap_servers,
                    "connect",
                    classify_kafka_error(&e),
                )
            })?;

        info!(
            bootstrap = %settings.bootstrap_servers,
            group = %settings.group_id,
            "Kafka consumer created"
        );

        Ok(Self {
            handle: Some(ConsumerHandle {
                consumer: Arc::new(consumer),
                codec: Arc::new(codec),
            }),
        })
    }

    fn handle(&self) -> Result<&ConsumerHandle<T>, BrokerError> {
        self.handle
            .as_ref()
            .ok_or_else(|| BrokerError::fatal("Kafka consumer is closed"))
    }
}

#[async_trait]
impl<T: Send + Sync> ConsumerClient<T> for KafkaConsumerClient<T> {
    async fn subscribe(&mut self, destination: &str) -> Result<(), BrokerError> {
        self.handle()?
            .consumer
            .subscribe(&[destination])
            .map_err(|e| classify_kafka_error(&e))?;
        info!(destination, "Subscribed to topic");
        Ok(())
    }

    async fn pull(&mut self, timeout: Duration) -> Result<Option<T>, BrokerError> {
        let handle = self.handle()?;

        match tokio::time::timeout(timeout, handle.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(classify_kafka_error(&e)),
            Ok(Ok(message)) => {
                let Some(bytes) = message.payload() else {
                    return Err(BrokerError::transient(format!(
                        "empty payload at {}/{}@{}",
                        message.topic(),
                        message.partition(),
                        message.offset()
                    )));
                };

                handle.codec.decode(bytes).map(Some).map_err(|e| {
                    BrokerError::transient(format!(
                        "undecodable payload at {}/{}@{}: {}",
                        message.topic(),
                        message.partition(),
                        message.offset(),
                        e
                    ))
                })
            }
        }
    }

    async fn commit(&mut self) -> Result<(), BrokerError> {
        let consumer = Arc::clone(&self.handle()?.consumer);

        let committed = tokio::task::spawn_blocking(move || {
            consumer.commit_consumer_state(CommitMode::Sync)
        })
        .await
        .map_err(|e| BrokerError::fatal(format!("commit task failed: {}", e)))?;

        match committed {
            Ok(()) => Ok(()),
            Err(e) if e.rdkafka_error_code() == Some(RDKafkaErrorCode::NoOffset) => Ok(()),
            Err(e) => Err(classify_kafka_error(&e)),
        }
    }

    async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.consumer.unsubscribe();
            debug!("Kafka consumer handle released");
        }
    }
}
