//! Garbage collection of stale consumer registrations
//!
//! Every fetch worker registers a consumer in the group the first time it
//! reads, and nothing removes it when the worker goes away. Consumers that
//! have been idle for longer than the threshold are deleted. Tasks are read
//! with NOACK, so a consumer never owns pending entries and deleting one
//! loses no work; a live worker is simply registered again on its next read.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::broker::{Broker, BrokerError};

#[derive(Debug, Error)]
pub enum GcError {
    #[error("Unable to list consumers: {0}")]
    Enumerate(#[source] BrokerError),

    #[error("Could not delete consumer {consumer}: {source}")]
    Delete {
        consumer: String,
        #[source]
        source: BrokerError,
    },
}

/// What a collection pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcReport {
    /// Consumers removed, or that would have been in a dry run
    pub removed: Vec<String>,
    /// Consumers below the threshold
    pub kept: usize,
    pub dry_run: bool,
}

pub struct GarbageCollector {
    broker: Arc<dyn Broker>,
    stream: String,
    group: String,
    threshold: Duration,
    dry_run: bool,
}

impl GarbageCollector {
    pub fn new(
        broker: Arc<dyn Broker>,
        stream: impl Into<String>,
        group: impl Into<String>,
        threshold: Duration,
    ) -> Self {
        Self {
            broker,
            stream: stream.into(),
            group: group.into(),
            threshold,
            dry_run: false,
        }
    }

    /// Log what would be removed without removing it
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// One collection pass; the first failed delete ends it
    pub async fn run(&self) -> Result<GcReport, GcError> {
        let consumers = self
            .broker
            .consumers(&self.stream, &self.group)
            .await
            .map_err(GcError::Enumerate)?;

        let mut report = GcReport {
            dry_run: self.dry_run,
            ..Default::default()
        };
        for consumer in consumers {
            if consumer.idle <= self.threshold {
                debug!(consumer = %consumer.name, idle = ?consumer.idle, "Keeping consumer");
                report.kept += 1;
                continue;
            }

            info!(
                "Removing consumer {} from group {} in stream {}{}",
                consumer.name,
                self.group,
                self.stream,
                if self.dry_run { " (dry run)" } else { "" }
            );
            if !self.dry_run {
                self.broker
                    .delete_consumer(&self.stream, &self.group, &consumer.name)
                    .await
                    .map_err(|source| GcError::Delete {
                        consumer: consumer.name.clone(),
                        source,
                    })?;
            }
            report.removed.push(consumer.name);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::testing::mocks::FailingBroker;

    const MINUTE: Duration = Duration::from_secs(60);

    async fn broker_with_consumers() -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker.register_consumer("jobs", "fetch", "A", 45 * MINUTE).await;
        broker.register_consumer("jobs", "fetch", "B", 5 * MINUTE).await;
        broker
    }

    fn collector(broker: &MemoryBroker) -> GarbageCollector {
        GarbageCollector::new(Arc::new(broker.clone()), "jobs", "fetch", 30 * MINUTE)
    }

    async fn names(broker: &MemoryBroker) -> Vec<String> {
        broker
            .consumers("jobs", "fetch")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    #[tokio::test]
    async fn test_removes_only_idle_consumers() {
        let broker = broker_with_consumers().await;
        let report = collector(&broker).run().await.unwrap();
        assert_eq!(report.removed, vec!["A".to_string()]);
        assert_eq!(report.kept, 1);
        assert_eq!(names(&broker).await, vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let broker = broker_with_consumers().await;
        let gc = collector(&broker);
        gc.run().await.unwrap();
        let report = gc.run().await.unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(names(&broker).await, vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let broker = broker_with_consumers().await;
        let report = collector(&broker).dry_run(true).run().await.unwrap();
        assert_eq!(report.removed, vec!["A".to_string()]);
        assert!(report.dry_run);
        assert_eq!(names(&broker).await.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_group_fails_enumeration() {
        let broker = MemoryBroker::new();
        let err = collector(&broker).run().await.unwrap_err();
        assert!(matches!(err, GcError::Enumerate(BrokerError::NoGroup { .. })));
    }

    #[tokio::test]
    async fn test_broker_failure_is_reported() {
        let gc = GarbageCollector::new(
            Arc::new(FailingBroker::new("connection refused")),
            "jobs",
            "fetch",
            MINUTE,
        );
        let err = gc.run().await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
