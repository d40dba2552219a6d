//! In-memory broker backend
//!
//! Every destination is an append-only log with a single partition.
//! Consumer groups keep a committed offset per destination, so a new
//! consumer in the same group resumes from the last commit, just like a
//! restarted Kafka consumer would.

use crate::messaging::error::BrokerError;
use crate::messaging::traits::{ConsumerClient, DeliveryAck, ProducerClient};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A record stored by the in-memory broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord<T> {
    pub key: Option<String>,
    pub payload: T,
}

struct BrokerState<T> {
    logs: Mutex<HashMap<String, Vec<StoredRecord<T>>>>,
    committed: Mutex<HashMap<(String, String), usize>>,
    commit_calls: AtomicU64,
    appended: Notify,
}

/// Shared in-memory broker; clones refer to the same logs
pub struct InMemoryBroker<T> {
    state: Arc<BrokerState<T>>,
}

impl<T> Clone for InMemoryBroker<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for InMemoryBroker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InMemoryBroker<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                logs: Mutex::new(HashMap::new()),
                committed: Mutex::new(HashMap::new()),
                commit_calls: AtomicU64::new(0),
                appended: Notify::new(),
            }),
        }
    }

    /// A new producer handle on this broker
    pub fn producer_client(&self) -> InMemoryProducerClient<T> {
        InMemoryProducerClient {
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// A new consumer handle belonging to `group`
    pub fn consumer_client(&self, group: impl Into<String>) -> InMemoryConsumerClient<T> {
        InMemoryConsumerClient {
            broker: self.clone(),
            group: group.into(),
            destination: None,
            position: 0,
            closed: false,
        }
    }

    /// Committed offset of `group` on `destination`
    pub fn committed_offset(&self, group: &str, destination: &str) -> Option<usize> {
        self.state
            .committed
            .lock()
            .get(&(group.to_string(), destination.to_string()))
            .copied()
    }

    /// Number of commit calls received from all groups
    pub fn commit_calls(&self) -> u64 {
        self.state.commit_calls.load(Ordering::Acquire)
    }

    /// Number of records appended to `destination`
    pub fn len(&self, destination: &str) -> usize {
        self.state
            .logs
            .lock()
            .get(destination)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, destination: &str) -> bool {
        self.len(destination) == 0
    }
}

impl<T: Clone> InMemoryBroker<T> {
    /// Snapshot of the records in `destination`
    pub fn records(&self, destination: &str) -> Vec<StoredRecord<T>> {
        self.state
            .logs
            .lock()
            .get(destination)
            .cloned()
            .unwrap_or_default()
    }

    fn append(&self, destination: &str, key: Option<&str>, payload: T) -> DeliveryAck {
        let offset = {
            let mut logs = self.state.logs.lock();
            let log = logs.entry(destination.to_string()).or_default();
            log.push(StoredRecord {
                key: key.map(String::from),
                payload,
            });
            log.len() - 1
        };
        self.state.appended.notify_waiters();

        DeliveryAck {
            partition: 0,
            offset: offset as i64,
        }
    }

    fn read(&self, destination: &str, position: usize) -> Option<T> {
        self.state
            .logs
            .lock()
            .get(destination)
            .and_then(|log| log.get(position))
            .map(|record| record.payload.clone())
    }
}

/// Producer handle on an [`InMemoryBroker`]
pub struct InMemoryProducerClient<T> {
    broker: InMemoryBroker<T>,
    closed: AtomicBool,
}

#[async_trait]
impl<T> ProducerClient<T> for InMemoryProducerClient<T>
where
    T: Clone + Send + Sync,
{
    async fn produce(
        &self,
        destination: &str,
        key: Option<&str>,
        payload: &T,
    ) -> Result<DeliveryAck, BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::fatal("producer handle is closed"));
        }
        Ok(self.broker.append(destination, key, payload.clone()))
    }

    async fn flush(&self, _timeout: Option<Duration>) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Consumer handle on an [`InMemoryBroker`]
pub struct InMemoryConsumerClient<T> {
    broker: InMemoryBroker<T>,
    group: String,
    destination: Option<String>,
    position: usize,
    closed: bool,
}

#[async_trait]
impl<T> ConsumerClient<T> for InMemoryConsumerClient<T>
where
    T: Clone + Send + Sync,
{
    async fn subscribe(&mut self, destination: &str) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::fatal("consumer handle is closed"));
        }
        self.position = self
            .broker
            .committed_offset(&self.group, destination)
            .unwrap_or(0);
        self.destination = Some(destination.to_string());
        Ok(())
    }

    async fn pull(&mut self, timeout: Duration) -> Result<Option<T>, BrokerError> {
        if self.closed {
            return Err(BrokerError::fatal("consumer handle is closed"));
        }
        let destination = self
            .destination
            .clone()
            .ok_or_else(|| BrokerError::fatal("pull before subscribe"))?;

        let appended = self.broker.state.appended.notified();
        tokio::pin!(appended);
        appended.as_mut().enable();

        if let Some(payload) = self.broker.read(&destination, self.position) {
            self.position += 1;
            return Ok(Some(payload));
        }

        if tokio::time::timeout(timeout, appended).await.is_err() {
            return Ok(None);
        }

        Ok(self.broker.read(&destination, self.position).map(|payload| {
            self.position += 1;
            payload
        }))
    }

    async fn commit(&mut self) -> Result<(), BrokerError> {
        let destination = self
            .destination
            .clone()
            .ok_or_else(|| BrokerError::fatal("commit before subscribe"))?;

        self.broker
            .state
            .committed
            .lock()
            .insert((self.group.clone(), destination), self.position);
        self.broker.state.commit_calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
