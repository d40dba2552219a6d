//! Batch producer with ordered, acknowledged delivery

use crate::messaging::config::{ProducerSettings, Settings};
use crate::messaging::error::{require_non_blank, MessagingError, MessagingResult};
use crate::messaging::metrics::MESSAGING_METRICS;
use crate::messaging::traits::{KeyProvider, MessageProducer, ProducerClient};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, instrument};

/// Producer sending payloads through a [`ProducerClient`].
///
/// Within one `send_batch` call there is never more than one record in
/// flight: each payload is acknowledged before the next is submitted, and a
/// flush with no timeout runs once the last one is acknowledged. Instances
/// can be shared between tasks; batches from different callers may
/// interleave at the broker.
pub struct BrokerMessageProducer<T, C> {
    client: C,
    settings: ProducerSettings,
    closed: AtomicBool,
    _phantom: PhantomData<fn(&T)>,
}

impl<T, C> BrokerMessageProducer<T, C>
where
    T: Send + Sync,
    C: ProducerClient<T>,
{
    /// Validate `settings` and wrap a client built from them
    pub fn new<F>(settings: &Settings, build_client: F) -> MessagingResult<Self>
    where
        F: FnOnce(&ProducerSettings) -> MessagingResult<C>,
    {
        let settings = ProducerSettings::from_settings(settings)?;
        let client = build_client(&settings)?;

        info!(
            bootstrap = %settings.bootstrap_servers,
            client_id = %settings.client_id,
            "Producer created"
        );

        Ok(Self {
            client,
            settings,
            closed: AtomicBool::new(false),
            _phantom: PhantomData,
        })
    }

    /// Validated settings of this producer
    pub fn settings(&self) -> &ProducerSettings {
        &self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn transfer_error(
        destination: &str,
        operation: &'static str,
        source: crate::messaging::error::BrokerError,
    ) -> MessagingError {
        MESSAGING_METRICS
            .produce_failures
            .with_label_values(&[destination, operation])
            .inc();
        error!(destination, operation, error = %source, "Broker transfer failed");
        MessagingError::broker(destination, operation, source)
    }
}

#[async_trait]
impl<T, C> MessageProducer<T> for BrokerMessageProducer<T, C>
where
    T: Send + Sync,
    C: ProducerClient<T>,
{
    #[instrument(skip_all, fields(destination = %destination, count = payloads.len()))]
    async fn send_batch(
        &self,
        destination: &str,
        key_provider: &dyn KeyProvider<T>,
        payloads: &[T],
    ) -> MessagingResult<usize> {
        require_non_blank("destination", destination)?;
        if self.is_closed() {
            return Err(MessagingError::InvalidState(format!(
                "producer `{}` is closed",
                self.settings.client_id
            )));
        }

        info!(destination, "Starting to send messages");

        let mut sent = 0usize;
        for payload in payloads {
            let key = key_provider.key(payload);
            let ack = self
                .client
                .produce(destination, key.as_deref(), payload)
                .await
                .map_err(|e| Self::transfer_error(destination, "produce", e))?;

            debug!(
                destination,
                partition = ack.partition,
                offset = ack.offset,
                "Message acknowledged"
            );
            MESSAGING_METRICS
                .messages_produced
                .with_label_values(&[destination])
                .inc();
            sent += 1;
        }

        self.client
            .flush(None)
            .await
            .map_err(|e| Self::transfer_error(destination, "flush", e))?;
        MESSAGING_METRICS
            .flushes
            .with_label_values(&[destination])
            .inc();

        info!(destination, sent, "Successfully sent messages");
        Ok(sent)
    }

    async fn close(&self) -> MessagingResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let flushed = self.client.flush(None).await;
        self.client.close().await;
        info!(client_id = %self.settings.client_id, "Producer closed");

        flushed.map_err(|e| MessagingError::broker("all", "flush", e))
    }
}
