//! Batched-commit consumer loop
//!
//! The loop pulls one payload at a time, hands it to the handler, and
//! commits the checkpoint every `commit_batch_size` handled payloads. The
//! checkpoint never moves past a payload the handler has not seen. After an
//! ungraceful restart up to `commit_batch_size - 1` payloads can be
//! delivered again (at-least-once).
//!
//! ```text
//! Created ──consume──▶ Subscribed ──▶ Running ──┬──▶ Cancelled
//!                                               └──▶ Failed
//! ```

use crate::messaging::config::{ConsumerOptions, ConsumerSettings, Settings};
use crate::messaging::error::{require_non_blank, BrokerError, MessagingError, MessagingResult};
use crate::messaging::metrics::MESSAGING_METRICS;
use crate::messaging::traits::{
    Cancelled, ConsumeStats, ConsumerClient, MessageConsumer, MessageHandler,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::time::Instant;
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use validator::Validate;

/// Lifecycle of a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConsumerState {
    Created,
    Subscribed,
    Running,
    Cancelled,
    Failed,
}

/// Consumer pulling payloads through a [`ConsumerClient`]
pub struct BrokerMessageConsumer<T, C> {
    client: tokio::sync::Mutex<Option<C>>,
    settings: ConsumerSettings,
    options: ConsumerOptions,
    state: Mutex<ConsumerState>,
    stop: CancellationToken,
    _phantom: PhantomData<fn() -> T>,
}

impl<T, C> BrokerMessageConsumer<T, C>
where
    T: Send + Sync,
    C: ConsumerClient<T>,
{
    /// Validate `settings` and `options`, then wrap a client built from them.
    ///
    /// The client is not subscribed until [`consume`](MessageConsumer::consume)
    /// is called.
    pub fn new<F>(settings: &Settings, options: ConsumerOptions, build_client: F) -> MessagingResult<Self>
    where
        F: FnOnce(&ConsumerSettings) -> MessagingResult<C>,
    {
        let settings = ConsumerSettings::from_settings(settings)?;
        options.validate()?;
        let client = build_client(&settings)?;

        info!(
            bootstrap = %settings.bootstrap_servers,
            group = %settings.group_id,
            commit_batch_size = options.commit_batch_size,
            "Consumer created"
        );

        Ok(Self {
            client: tokio::sync::Mutex::new(Some(client)),
            settings,
            options,
            state: Mutex::new(ConsumerState::Created),
            stop: CancellationToken::new(),
            _phantom: PhantomData,
        })
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.lock()
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    fn set_state(&self, state: ConsumerState) {
        *self.state.lock() = state;
    }

    async fn release(&self, slot: &mut Option<C>) {
        if let Some(mut client) = slot.take() {
            client.close().await;
            info!(group = %self.settings.group_id, "Consumer released");
        }
    }

    async fn fail(
        &self,
        slot: &mut Option<C>,
        destination: &str,
        err: MessagingError,
    ) -> MessagingResult<Cancelled> {
        MESSAGING_METRICS
            .fatal_errors
            .with_label_values(&[destination])
            .inc();
        error!(destination, error = %err, "Aborting consumer");
        self.set_state(ConsumerState::Failed);
        self.release(slot).await;
        Err(err)
    }
}

/// Commit bookkeeping of one loop run
struct CommitTracker {
    batch_size: u64,
    pending: u64,
    last_commit: Instant,
}

impl CommitTracker {
    fn new(batch_size: u64) -> Self {
        Self {
            batch_size,
            pending: 0,
            last_commit: Instant::now(),
        }
    }

    fn batch_full(&self) -> bool {
        self.pending >= self.batch_size
    }

    fn interval_elapsed(&self, options: &ConsumerOptions) -> bool {
        match options.commit_interval {
            Some(interval) => self.pending > 0 && self.last_commit.elapsed() >= interval,
            None => false,
        }
    }

    fn committed(&mut self) {
        self.pending = 0;
        self.last_commit = Instant::now();
    }
}

async fn commit<T, C: ConsumerClient<T>>(
    client: &mut C,
    destination: &str,
    tracker: &mut CommitTracker,
    stats: &mut ConsumeStats,
) -> Result<(), BrokerError> {
    client.commit().await?;
    tracker.committed();
    stats.commits += 1;
    MESSAGING_METRICS
        .commits
        .with_label_values(&[destination])
        .inc();
    Ok(())
}

/// Broker-domain handler failures keep their identity, anything else is a
/// processing failure
fn classify_handler_error(destination: &str, err: anyhow::Error) -> MessagingError {
    let err = match err.downcast::<MessagingError>() {
        Ok(err) if err.is_broker_error() => return err,
        Ok(err) => anyhow::Error::from(err),
        Err(err) => err,
    };
    MessagingError::broker_error_in(destination, &err).unwrap_or_else(|| {
        MessagingError::Handler {
            destination: destination.to_string(),
            source: err,
        }
    })
}

#[async_trait]
impl<T, C> MessageConsumer<T> for BrokerMessageConsumer<T, C>
where
    T: Send + Sync,
    C: ConsumerClient<T>,
{
    #[instrument(skip_all, fields(destination = %destination))]
    async fn consume(
        &self,
        destination: &str,
        handler: &dyn MessageHandler<T>,
        cancel: &CancellationToken,
    ) -> MessagingResult<Cancelled> {
        require_non_blank("destination", destination)?;

        let mut guard = self.client.lock().await;
        let slot: &mut Option<C> = &mut guard;
        {
            let mut state = self.state.lock();
            if *state != ConsumerState::Created || slot.is_none() {
                return Err(MessagingError::InvalidState(format!(
                    "consumer is {} and cannot be reused",
                    *state
                )));
            }
            *state = ConsumerState::Subscribed;
        }

        let subscribed = match slot.as_mut() {
            Some(client) => client.subscribe(destination).await,
            None => return Err(MessagingError::InvalidState("consumer is closed".into())),
        };
        if let Err(e) = subscribed {
            let err = MessagingError::broker(destination, "subscribe", e);
            return self.fail(slot, destination, err).await;
        }

        self.set_state(ConsumerState::Running);
        info!(destination, group = %self.settings.group_id, "Consumer loop started");

        let mut stats = ConsumeStats::default();
        let mut tracker = CommitTracker::new(self.options.commit_batch_size);

        while !(cancel.is_cancelled() || self.stop.is_cancelled()) {
            let Some(client) = slot.as_mut() else {
                return Err(MessagingError::InvalidState("consumer is closed".into()));
            };

            match client.pull(self.options.poll_timeout).await {
                Ok(Some(payload)) => {
                    if let Err(e) = handler.on_message(&payload).await {
                        let err = classify_handler_error(destination, e);
                        return self.fail(slot, destination, err).await;
                    }

                    stats.handled += 1;
                    tracker.pending += 1;
                    MESSAGING_METRICS
                        .messages_consumed
                        .with_label_values(&[destination])
                        .inc();
                }
                Ok(None) => {}
                Err(e) if !e.is_fatal() => {
                    warn!(destination, error = %e, "Skipping record after transient broker error");
                    stats.skipped += 1;
                    MESSAGING_METRICS
                        .transient_skips
                        .with_label_values(&[destination])
                        .inc();
                }
                Err(e) => {
                    let err = MessagingError::broker(destination, "pull", e);
                    return self.fail(slot, destination, err).await;
                }
            }

            if tracker.batch_full() || tracker.interval_elapsed(&self.options) {
                if let Err(e) = commit::<T, C>(client, destination, &mut tracker, &mut stats).await {
                    let err = MessagingError::broker(destination, "commit", e);
                    return self.fail(slot, destination, err).await;
                }
            }
        }

        if tracker.pending > 0 {
            if let Some(client) = slot.as_mut() {
                if let Err(e) = commit::<T, C>(client, destination, &mut tracker, &mut stats).await {
                    let err = MessagingError::broker(destination, "commit", e);
                    return self.fail(slot, destination, err).await;
                }
            }
        }

        self.set_state(ConsumerState::Cancelled);
        self.release(slot).await;
        info!(
            destination,
            handled = stats.handled,
            commits = stats.commits,
            skipped = stats.skipped,
            "Consumer loop cancelled"
        );

        Ok(Cancelled { stats })
    }

    fn stop(&self) {
        if !self.stop.is_cancelled() {
            info!(group = %self.settings.group_id, "Stop requested");
        }
        self.stop.cancel();
    }

    async fn close(&self) {
        self.stop.cancel();
        let mut guard = self.client.lock().await;
        self.release(&mut guard).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_commit_tracker_batches() {
        let mut tracker = CommitTracker::new(3);
        tracker.pending = 2;
        assert!(!tracker.batch_full());
        tracker.pending = 3;
        assert!(tracker.batch_full());
        tracker.committed();
        assert_eq!(tracker.pending, 0);
    }

    #[test]
    fn test_commit_interval_needs_pending_payloads() {
        let options = ConsumerOptions {
            commit_interval: Some(Duration::ZERO),
            ..Default::default()
        };
        let mut tracker = CommitTracker::new(100);
        assert!(!tracker.interval_elapsed(&options));

        tracker.pending = 1;
        assert!(tracker.interval_elapsed(&options));

        assert!(!tracker.interval_elapsed(&ConsumerOptions::default()));
    }

    #[test]
    fn test_handler_error_classification() {
        let broker: anyhow::Error =
            MessagingError::broker("orders", "produce", BrokerError::fatal("down")).into();
        assert!(classify_handler_error("orders", broker).is_broker_error());

        let plain = anyhow::anyhow!("boom");
        assert!(matches!(
            classify_handler_error("orders", plain),
            MessagingError::Handler { destination, .. } if destination == "orders"
        ));

        let invalid: anyhow::Error = MessagingError::InvalidState("closed".into()).into();
        assert!(matches!(
            classify_handler_error("orders", invalid),
            MessagingError::Handler { .. }
        ));

        let raw: anyhow::Error = BrokerError::fatal("all brokers down").into();
        assert!(matches!(
            classify_handler_error("orders", raw),
            MessagingError::BrokerTransfer { ref destination, operation: "handle", .. }
                if destination == "orders"
        ));

        let wrapped = anyhow::Error::from(MessagingError::broker(
            "payments",
            "produce",
            BrokerError::fatal("down"),
        ))
        .context("billing failed");
        assert!(matches!(
            classify_handler_error("orders", wrapped),
            MessagingError::BrokerTransfer { ref destination, operation: "produce", .. }
                if destination == "payments"
        ));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConsumerState::Running.to_string(), "running");
        assert_eq!(ConsumerState::Cancelled.to_string(), "cancelled");
    }
}
