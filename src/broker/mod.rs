//! Broker abstraction
//!
//! The pipeline uses a small set of key/value and stream primitives from the
//! message broker: the task queue is a stream read through a consumer group,
//! each process log is a stream keyed by pid, and process headers are plain
//! keys. [`Broker`] names exactly those primitives so the pipeline can run
//! against Redis in production and against [`MemoryBroker`] in tests.

mod memory;
mod redis;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Broker error types
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Could not reach the broker or get a pooled connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// The broker rejected or failed a command
    #[error("Command {command} failed: {message}")]
    Command { command: &'static str, message: String },

    /// A reply could not be decoded into the expected shape
    #[error("Unexpected reply: {0}")]
    Decode(String),

    /// The consumer group does not exist on the stream
    #[error("No consumer group {group:?} on stream {stream:?}")]
    NoGroup { stream: String, group: String },
}

impl BrokerError {
    /// Create a connection error
    pub fn connection<E: std::fmt::Display>(err: E) -> Self {
        Self::Connection(err.to_string())
    }

    /// Create a command error
    pub fn command<E: std::fmt::Display>(command: &'static str, err: E) -> Self {
        Self::Command {
            command,
            message: err.to_string(),
        }
    }

    /// Create a decode error
    pub fn decode<E: std::fmt::Display>(err: E) -> Self {
        Self::Decode(err.to_string())
    }
}

/// One entry of a stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, Vec<u8>>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&[u8]> {
        self.fields.get(name).map(Vec::as_slice)
    }
}

/// A consumer registered in a consumer group
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerInfo {
    pub name: String,
    pub pending: usize,
    pub idle: Duration,
}

/// The broker primitives the pipeline depends on
///
/// A zero `block` duration means "do not block" for the reading calls.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Set a key, with an optional expiry
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> BrokerResult<()>;

    /// Get a key, `None` when it does not exist
    async fn get(&self, key: &str) -> BrokerResult<Option<Vec<u8>>>;

    /// Set the expiry of a key; returns false when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> BrokerResult<bool>;

    /// Append an entry to a stream, creating it if needed; returns the entry id
    async fn xadd(&self, stream: &str, fields: &[(&str, &[u8])]) -> BrokerResult<String>;

    /// Number of entries in a stream, 0 when it does not exist
    async fn xlen(&self, stream: &str) -> BrokerResult<usize>;

    /// Read entries with ids after `after` ("0" reads from the start),
    /// waiting up to `block` when there are none
    async fn xread(&self, stream: &str, after: &str, block: Duration)
        -> BrokerResult<Vec<StreamEntry>>;

    /// Read new entries as `consumer` in `group`, without acknowledgement
    async fn xreadgroup(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> BrokerResult<Vec<StreamEntry>>;

    /// Delete entries from a stream; returns the number deleted
    async fn xdel(&self, stream: &str, ids: &[String]) -> BrokerResult<usize>;

    /// Create a consumer group, and the stream if missing.
    /// Returns false when the group already existed.
    async fn create_group(&self, stream: &str, group: &str) -> BrokerResult<bool>;

    /// List the consumers registered in a group
    async fn consumers(&self, stream: &str, group: &str) -> BrokerResult<Vec<ConsumerInfo>>;

    /// Remove a consumer from a group; returns its pending count
    async fn delete_consumer(&self, stream: &str, group: &str, consumer: &str)
        -> BrokerResult<usize>;
}
