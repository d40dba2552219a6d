//! Dead-letter decorator for message handlers

use crate::messaging::error::{require_non_blank, MessagingError, MessagingResult};
use crate::messaging::metrics::MESSAGING_METRICS;
use crate::messaging::traits::{MessageHandler, MessageProducer, NoKey};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, warn};

/// Wraps a handler and redirects payloads it fails on to a dead-letter
/// destination.
///
/// Broker-domain failures are not intercepted: they are logged and returned
/// unchanged so the consumer loop can act on them. Every other failure is
/// logged and the original payload is sent, without a key, to the
/// dead-letter destination. If that send fails, its error is returned.
///
/// The producer is shared and is never closed by the listener.
pub struct FailedMessageListener<T, H> {
    producer: Arc<dyn MessageProducer<T>>,
    handler: H,
    dead_letter_destination: String,
}

impl<T, H> FailedMessageListener<T, H>
where
    T: Send + Sync + 'static,
    H: MessageHandler<T>,
{
    pub fn new(
        producer: Arc<dyn MessageProducer<T>>,
        handler: H,
        dead_letter_destination: impl Into<String>,
    ) -> MessagingResult<Self> {
        let dead_letter_destination = dead_letter_destination.into();
        require_non_blank("dead_letter_destination", &dead_letter_destination)?;

        Ok(Self {
            producer,
            handler,
            dead_letter_destination,
        })
    }

    pub fn dead_letter_destination(&self) -> &str {
        &self.dead_letter_destination
    }
}

#[async_trait]
impl<T, H> MessageHandler<T> for FailedMessageListener<T, H>
where
    T: Send + Sync + 'static,
    H: MessageHandler<T>,
{
    async fn on_message(&self, payload: &T) -> anyhow::Result<()> {
        let err = match self.handler.on_message(payload).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if MessagingError::is_broker_error_in(&err) {
            error!(error = %err, "Error with the message broker");
            return Err(err);
        }

        warn!(
            error = %err,
            dead_letter_destination = %self.dead_letter_destination,
            "Error processing message, redirecting to dead-letter destination"
        );
        self.producer
            .send(&self.dead_letter_destination, &NoKey, payload)
            .await?;

        MESSAGING_METRICS
            .dead_lettered
            .with_label_values(&[self.dead_letter_destination.as_str()])
            .inc();
        Ok(())
    }
}
