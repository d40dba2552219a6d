//! Messaging trait abstractions

use crate::messaging::error::{BrokerError, MessagingResult};
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Maps a payload to its optional partition/routing key
pub trait KeyProvider<T>: Send + Sync {
    /// Return the key for `payload`, or `None` to let the broker pick
    fn key(&self, payload: &T) -> Option<String>;
}

impl<T, F> KeyProvider<T> for F
where
    F: Fn(&T) -> Option<String> + Send + Sync,
{
    fn key(&self, payload: &T) -> Option<String> {
        self(payload)
    }
}

/// Key provider that never assigns a key
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKey;

impl<T> KeyProvider<T> for NoKey {
    fn key(&self, _payload: &T) -> Option<String> {
        None
    }
}

/// Processes payloads pulled by a consumer
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    /// Handle one payload.
    ///
    /// Returning an error that downcasts to a broker-domain
    /// [`MessagingError`](crate::messaging::MessagingError) marks the failure
    /// as a broker failure; anything else is a processing failure.
    async fn on_message(&self, payload: &T) -> anyhow::Result<()>;
}

/// Adapter turning a closure returning a future into a [`MessageHandler`]
pub struct FnHandler<F, T> {
    f: F,
    _phantom: PhantomData<fn(&T)>,
}

/// Wrap a closure as a [`MessageHandler`]
///
/// The closure receives an owned clone of the payload so the returned
/// future does not borrow from the consumer loop.
pub fn handler_fn<T, F, Fut>(f: F) -> FnHandler<F, T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnHandler {
        f,
        _phantom: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for FnHandler<F, T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn on_message(&self, payload: &T) -> anyhow::Result<()> {
        (self.f)(payload.clone()).await
    }
}

/// Message producer trait
#[async_trait]
pub trait MessageProducer<T: Sync>: Send + Sync {
    /// Send a single payload to `destination`
    async fn send(
        &self,
        destination: &str,
        key_provider: &dyn KeyProvider<T>,
        payload: &T,
    ) -> MessagingResult<()> {
        self.send_batch(destination, key_provider, std::slice::from_ref(payload))
            .await
            .map(|_| ())
    }

    /// Send payloads in order, each acknowledged before the next, then flush.
    ///
    /// Returns the number of acknowledged payloads.
    async fn send_batch(
        &self,
        destination: &str,
        key_provider: &dyn KeyProvider<T>,
        payloads: &[T],
    ) -> MessagingResult<usize>;

    /// Flush and release the broker handle. Idempotent.
    async fn close(&self) -> MessagingResult<()>;
}

/// Message consumer trait
#[async_trait]
pub trait MessageConsumer<T>: Send + Sync {
    /// Subscribe to `destination` and hand every pulled payload to `handler`
    /// until `cancel` (or [`stop`](Self::stop)) is raised or a fatal error
    /// occurs.
    async fn consume(
        &self,
        destination: &str,
        handler: &dyn MessageHandler<T>,
        cancel: &CancellationToken,
    ) -> MessagingResult<Cancelled>;

    /// Ask the running loop to stop. Idempotent, callable from anywhere.
    fn stop(&self);

    /// Release the broker handle. Idempotent.
    async fn close(&self);
}

/// Counters reported when a consumer loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    /// Payloads handed to the handler
    pub handled: u64,
    /// Commit calls that succeeded
    pub commits: u64,
    /// Records skipped because of transient broker errors
    pub skipped: u64,
}

/// Returned by [`MessageConsumer::consume`] when the loop stopped cooperatively
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Cancelled {
    pub stats: ConsumeStats,
}

/// Broker acknowledgment of a produced record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryAck {
    pub partition: i32,
    pub offset: i64,
}

/// Producing half of a broker client
#[async_trait]
pub trait ProducerClient<T>: Send + Sync {
    /// Submit one record and wait for its acknowledgment
    async fn produce(
        &self,
        destination: &str,
        key: Option<&str>,
        payload: &T,
    ) -> Result<DeliveryAck, BrokerError>;

    /// Wait until every submitted record is delivered. `None` waits forever.
    async fn flush(&self, timeout: Option<Duration>) -> Result<(), BrokerError>;

    /// Release the connection and buffers
    async fn close(&self);
}

/// Consuming half of a broker client
#[async_trait]
pub trait ConsumerClient<T>: Send {
    async fn subscribe(&mut self, destination: &str) -> Result<(), BrokerError>;

    /// Pull the next payload, or `None` once `timeout` expires
    async fn pull(&mut self, timeout: Duration) -> Result<Option<T>, BrokerError>;

    /// Commit the position of everything pulled so far
    async fn commit(&mut self) -> Result<(), BrokerError>;

    /// Release the connection and any auxiliary resource
    async fn close(&mut self);
}
