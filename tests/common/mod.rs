//! Common test utilities for messaging tests
//!
//! Hand-written broker clients that record every call, so tests can assert
//! on the exact sequence of produce / flush / pull / commit / close calls.

#![allow(dead_code)]

use async_trait::async_trait;
use mq_bridge::messaging::{
    BrokerError, ConsumerClient, DeliveryAck, ProducerClient, Settings, BOOTSTRAP_SERVERS,
    CLIENT_ID, GROUP_ID, SCHEMA_REGISTRY_URL,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn producer_settings() -> Settings {
    Settings::new()
        .with(BOOTSTRAP_SERVERS, "localhost:9092")
        .with(CLIENT_ID, "TestProducer")
        .with(SCHEMA_REGISTRY_URL, "http://localhost:8081")
}

pub fn consumer_settings() -> Settings {
    Settings::new()
        .with(BOOTSTRAP_SERVERS, "localhost:9092")
        .with(GROUP_ID, "TestConsumer")
        .with(SCHEMA_REGISTRY_URL, "http://localhost:8081")
}

/// A call observed by [`RecordingProducerClient`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProducerCall<T> {
    Produce {
        destination: String,
        key: Option<String>,
        payload: T,
    },
    Flush,
    Close,
}

struct ProducerState<T> {
    calls: Vec<ProducerCall<T>>,
    fail_produce_at: Option<usize>,
    fail_flush: bool,
    produced: usize,
}

/// Producer client recording every call; clones share the same record
pub struct RecordingProducerClient<T> {
    state: Arc<Mutex<ProducerState<T>>>,
}

impl<T> Clone for RecordingProducerClient<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone> RecordingProducerClient<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProducerState {
                calls: Vec::new(),
                fail_produce_at: None,
                fail_flush: false,
                produced: 0,
            })),
        }
    }

    /// Fail the produce call with this zero-based index
    pub fn failing_produce_at(self, index: usize) -> Self {
        self.state.lock().fail_produce_at = Some(index);
        self
    }

    pub fn failing_flush(self) -> Self {
        self.state.lock().fail_flush = true;
        self
    }

    pub fn calls(&self) -> Vec<ProducerCall<T>> {
        self.state.lock().calls.clone()
    }

    /// `(destination, key, payload)` of every produce call, in order
    pub fn produced(&self) -> Vec<(String, Option<String>, T)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProducerCall::Produce {
                    destination,
                    key,
                    payload,
                } => Some((destination, key, payload)),
                _ => None,
            })
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.count(|call| matches!(call, ProducerCall::Flush))
    }

    pub fn closes(&self) -> usize {
        self.count(|call| matches!(call, ProducerCall::Close))
    }

    fn count(&self, predicate: impl Fn(&ProducerCall<T>) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }
}

#[async_trait]
impl<T> ProducerClient<T> for RecordingProducerClient<T>
where
    T: Clone + Send + Sync,
{
    async fn produce(
        &self,
        destination: &str,
        key: Option<&str>,
        payload: &T,
    ) -> Result<DeliveryAck, BrokerError> {
        let mut state = self.state.lock();
        let index = state.produced;
        state.produced += 1;
        if state.fail_produce_at == Some(index) {
            return Err(BrokerError::fatal("message rejected by broker"));
        }

        state.calls.push(ProducerCall::Produce {
            destination: destination.to_string(),
            key: key.map(String::from),
            payload: payload.clone(),
        });
        Ok(DeliveryAck {
            partition: 0,
            offset: index as i64,
        })
    }

    async fn flush(&self, timeout: Option<Duration>) -> Result<(), BrokerError> {
        assert!(timeout.is_none(), "flush must wait without a timeout");
        let mut state = self.state.lock();
        state.calls.push(ProducerCall::Flush);
        if state.fail_flush {
            return Err(BrokerError::fatal("flush failed"));
        }
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().calls.push(ProducerCall::Close);
    }
}

/// One scripted result of a pull
#[derive(Debug, Clone)]
pub enum Step<T> {
    Payload(T),
    Error(BrokerError),
    Idle,
}

/// A call observed by [`ScriptedConsumerClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerCall {
    Subscribe(String),
    /// Commit issued after this many payloads were pulled
    Commit(usize),
    Close,
}

struct ConsumerState<T> {
    script: VecDeque<Step<T>>,
    calls: Vec<ConsumerCall>,
    pulled: usize,
    pull_calls: usize,
    fail_subscribe: bool,
    fail_commit: bool,
}

/// Consumer client replaying a script of pull results.
///
/// Once the script is exhausted it cancels `on_exhausted` (when given) and
/// keeps answering `Ok(None)`.
pub struct ScriptedConsumerClient<T> {
    state: Arc<Mutex<ConsumerState<T>>>,
    on_exhausted: Option<CancellationToken>,
}

impl<T> Clone for ScriptedConsumerClient<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            on_exhausted: self.on_exhausted.clone(),
        }
    }
}

impl<T> ScriptedConsumerClient<T> {
    pub fn new(script: impl IntoIterator<Item = Step<T>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConsumerState {
                script: script.into_iter().collect(),
                calls: Vec::new(),
                pulled: 0,
                pull_calls: 0,
                fail_subscribe: false,
                fail_commit: false,
            })),
            on_exhausted: None,
        }
    }

    /// Script of `count` payloads produced by `make`
    pub fn payloads(count: usize, make: impl Fn(usize) -> T) -> Self {
        Self::new((0..count).map(|n| Step::Payload(make(n))))
    }

    pub fn cancel_when_exhausted(mut self, token: &CancellationToken) -> Self {
        self.on_exhausted = Some(token.clone());
        self
    }

    pub fn failing_subscribe(self) -> Self {
        self.state.lock().fail_subscribe = true;
        self
    }

    pub fn failing_commit(self) -> Self {
        self.state.lock().fail_commit = true;
        self
    }

    pub fn calls(&self) -> Vec<ConsumerCall> {
        self.state.lock().calls.clone()
    }

    /// Payload counts at which commits were issued
    pub fn commits(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ConsumerCall::Commit(at) => Some(at),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ConsumerCall::Close))
            .count()
    }

    pub fn pull_calls(&self) -> usize {
        self.state.lock().pull_calls
    }

    pub fn remaining(&self) -> usize {
        self.state.lock().script.len()
    }
}

#[async_trait]
impl<T: Send> ConsumerClient<T> for ScriptedConsumerClient<T> {
    async fn subscribe(&mut self, destination: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.calls.push(ConsumerCall::Subscribe(destination.to_string()));
        if state.fail_subscribe {
            return Err(BrokerError::fatal("unknown topic or partition"));
        }
        Ok(())
    }

    async fn pull(&mut self, _timeout: Duration) -> Result<Option<T>, BrokerError> {
        let next = {
            let mut state = self.state.lock();
            state.pull_calls += 1;
            state.script.pop_front()
        };

        match next {
            Some(Step::Payload(payload)) => {
                self.state.lock().pulled += 1;
                Ok(Some(payload))
            }
            Some(Step::Error(err)) => Err(err),
            Some(Step::Idle) => Ok(None),
            None => {
                if let Some(token) = &self.on_exhausted {
                    token.cancel();
                }
                tokio::task::yield_now().await;
                Ok(None)
            }
        }
    }

    async fn commit(&mut self) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if state.fail_commit {
            return Err(BrokerError::fatal("commit rejected"));
        }
        let at = state.pulled;
        state.calls.push(ConsumerCall::Commit(at));
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().calls.push(ConsumerCall::Close);
    }
}
