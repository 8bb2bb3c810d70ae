//! Mock broker that is always down

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::broker::{Broker, BrokerError, BrokerResult, ConsumerInfo, StreamEntry};

/// A broker whose every command fails with the same connection error
#[derive(Debug)]
pub struct FailingBroker {
    message: String,
    xadd_calls: AtomicUsize,
}

impl FailingBroker {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            xadd_calls: AtomicUsize::new(0),
        }
    }

    /// Number of publish attempts
    pub fn xadd_calls(&self) -> usize {
        self.xadd_calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> BrokerResult<T> {
        Err(BrokerError::connection(&self.message))
    }
}

#[async_trait]
impl Broker for FailingBroker {
    async fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> BrokerResult<()> {
        self.fail()
    }

    async fn get(&self, _key: &str) -> BrokerResult<Option<Vec<u8>>> {
        self.fail()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> BrokerResult<bool> {
        self.fail()
    }

    async fn xadd(&self, _stream: &str, _fields: &[(&str, &[u8])]) -> BrokerResult<String> {
        self.xadd_calls.fetch_add(1, Ordering::SeqCst);
        self.fail()
    }

    async fn xlen(&self, _stream: &str) -> BrokerResult<usize> {
        self.fail()
    }

    async fn xread(
        &self,
        _stream: &str,
        _after: &str,
        _block: Duration,
    ) -> BrokerResult<Vec<StreamEntry>> {
        self.fail()
    }

    async fn xreadgroup(
        &self,
        _stream: &str,
        _group: &str,
        _consumer: &str,
        _count: usize,
        _block: Duration,
    ) -> BrokerResult<Vec<StreamEntry>> {
        self.fail()
    }

    async fn xdel(&self, _stream: &str, _ids: &[String]) -> BrokerResult<usize> {
        self.fail()
    }

    async fn create_group(&self, _stream: &str, _group: &str) -> BrokerResult<bool> {
        self.fail()
    }

    async fn consumers(&self, _stream: &str, _group: &str) -> BrokerResult<Vec<ConsumerInfo>> {
        self.fail()
    }

    async fn delete_consumer(
        &self,
        _stream: &str,
        _group: &str,
        _consumer: &str,
    ) -> BrokerResult<usize> {
        self.fail()
    }
}
