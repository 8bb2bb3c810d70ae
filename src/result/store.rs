//! Per-process result log
//!
//! Every process owns a stream keyed by its pid. Each completed part appends
//! one entry whose single field is the part label; a failed part appends one
//! entry with the field `error`. The header lives next to it under
//! `<pid>/header.json`.

use std::sync::Arc;
use std::time::Duration;

use crate::broker::{Broker, BrokerResult, StreamEntry};
use crate::message::PartLabel;

/// Field name of a failure entry
pub const ERROR_FIELD: &str = "error";

/// Key of the process header
pub fn header_key(pid: &str) -> String {
    format!("{}/header.json", pid)
}

/// One entry of a process log
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Part { label: String, bytes: Vec<u8> },
    Error(String),
}

impl LogEntry {
    fn from_stream(entry: StreamEntry) -> Self {
        if let Some(message) = entry.fields.get(ERROR_FIELD) {
            return Self::Error(String::from_utf8_lossy(message).into_owned());
        }
        match entry.fields.into_iter().next() {
            Some((label, bytes)) => Self::Part { label, bytes },
            None => Self::Error(format!("empty log entry {}", entry.id)),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Reads and writes process logs through the broker
#[derive(Clone)]
pub struct ResultStore {
    broker: Arc<dyn Broker>,
    ttl: Duration,
}

impl ResultStore {
    pub fn new(broker: Arc<dyn Broker>, ttl: Duration) -> Self {
        Self { broker, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn header(&self, pid: &str) -> BrokerResult<Option<Vec<u8>>> {
        self.broker.get(&header_key(pid)).await
    }

    /// Append a completed part
    pub async fn write_part(&self, pid: &str, part: &PartLabel, bytes: &[u8]) -> BrokerResult<String> {
        let label = part.to_string();
        self.broker.xadd(pid, &[(label.as_str(), bytes)]).await
    }

    /// Append a failure entry
    pub async fn write_error(&self, pid: &str, message: &str) -> BrokerResult<String> {
        self.broker
            .xadd(pid, &[(ERROR_FIELD, message.as_bytes())])
            .await
    }

    /// Push the expiry of the log and the header out by one TTL
    pub async fn refresh(&self, pid: &str) -> BrokerResult<()> {
        self.broker.expire(pid, self.ttl).await?;
        self.broker.expire(&header_key(pid), self.ttl).await?;
        Ok(())
    }

    /// Number of entries written so far
    pub async fn count(&self, pid: &str) -> BrokerResult<usize> {
        self.broker.xlen(pid).await
    }

    /// Entries after the cursor, waiting up to `block`. Returns the entries
    /// with their ids so callers can advance the cursor.
    pub async fn read(
        &self,
        pid: &str,
        after: &str,
        block: Duration,
    ) -> BrokerResult<Vec<(String, LogEntry)>> {
        let entries = self.broker.xread(pid, after, block).await?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.id.clone(), LogEntry::from_stream(entry)))
            .collect())
    }
}
