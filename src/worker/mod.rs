//! Fetch worker: the consumer-group read loop
//!
//! The worker reads one queue entry at a time with NOACK, deletes what it
//! read without waiting for the delete, and gathers each part on its own
//! task. At most `max_parts` parts are in flight; the worker does not read
//! while it is at capacity, so the rest of the queue is left to the other
//! consumers of the group. Once read, a message belongs to this worker alone: a crash between
//! the read and the part's result write loses the part, and the client sees
//! a stalled status until the process log expires. Redelivery would need
//! acknowledgements, which the queue deliberately does not use.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, BrokerError, StreamEntry};
use crate::config::Settings;
use crate::gather::{GatherError, Gatherer};
use crate::message::TaskMessage;

/// Errors that stop the worker
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Unable to create group {group} for stream {stream}: {source}")]
    CreateGroup {
        stream: String,
        group: String,
        #[source]
        source: BrokerError,
    },

    #[error("Unable to read from the queue: {0}")]
    Read(#[source] BrokerError),

    #[error("Unable to XDEL: {0}")]
    Delete(#[source] BrokerError),

    #[error(transparent)]
    Gather(#[from] GatherError),
}

/// Parts a worker gathers at once unless configured otherwise
pub const DEFAULT_MAX_PARTS: usize = 4;

/// A fresh consumer identity
pub fn make_consumer_id() -> String {
    format!("consumer:{}", Uuid::new_v4())
}

pub struct Worker {
    broker: Arc<dyn Broker>,
    gatherer: Gatherer,
    stream: String,
    group: String,
    consumer: String,
    heartbeat: Duration,
    max_parts: usize,
}

impl Worker {
    pub fn new(
        broker: Arc<dyn Broker>,
        gatherer: Gatherer,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        heartbeat: Duration,
    ) -> Self {
        Self {
            broker,
            gatherer,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            heartbeat,
            max_parts: DEFAULT_MAX_PARTS,
        }
    }

    /// Bound the parts in flight; at least one
    pub fn with_max_parts(mut self, max_parts: usize) -> Self {
        self.max_parts = max_parts.max(1);
        self
    }

    /// Worker reading the configured stream and group; generates a consumer
    /// id when none is configured
    pub fn from_settings(settings: &Settings, broker: Arc<dyn Broker>, gatherer: Gatherer) -> Self {
        let consumer = settings
            .consumer_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(make_consumer_id);
        Self::new(
            broker,
            gatherer,
            settings.stream.clone(),
            settings.group.clone(),
            consumer,
            settings.heartbeat,
        )
        .with_max_parts(settings.parts)
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer
    }

    /// Try-create the stream and group; an existing group is fine
    pub async fn ensure_group(&self) -> Result<(), WorkerError> {
        match self.broker.create_group(&self.stream, &self.group).await {
            Ok(true) => info!("Created group {} on stream {}", self.group, self.stream),
            Ok(false) => debug!("Group {} already exists on stream {}", self.group, self.stream),
            Err(source) => {
                return Err(WorkerError::CreateGroup {
                    stream: self.stream.clone(),
                    group: self.group.clone(),
                    source,
                })
            }
        }
        Ok(())
    }

    /// Read and gather until `shutdown` is cancelled or something fatal
    /// happens
    ///
    /// On shutdown the in-flight parts are allowed to finish. On a fatal
    /// error they are cancelled, which fails them and writes their error
    /// entries, before the error is returned.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        self.ensure_group().await?;
        info!(
            "Consumer {} in group {} connecting to stream {}",
            self.consumer, self.group, self.stream
        );

        let parts_token = CancellationToken::new();
        let slots = Arc::new(Semaphore::new(self.max_parts));
        let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
        let mut tasks = JoinSet::new();

        let result = loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    warn!("Worker task panicked: {}", e);
                }
            }

            let permit = tokio::select! {
                biased;
                Some(err) = fatal_rx.recv() => break Err(err),
                _ = shutdown.cancelled() => break Ok(()),
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
            };

            let entries = tokio::select! {
                biased;
                Some(err) = fatal_rx.recv() => break Err(err),
                _ = shutdown.cancelled() => break Ok(()),
                read = self.broker.xreadgroup(&self.stream, &self.group, &self.consumer, 1, self.heartbeat) => {
                    match read {
                        Ok(entries) => entries,
                        Err(e) => break Err(WorkerError::Read(e)),
                    }
                }
            };
            if entries.is_empty() {
                debug!(consumer = %self.consumer, "Heartbeat");
                continue;
            }

            self.spawn_delete(&mut tasks, &entries, fatal_tx.clone());
            // COUNT 1 reads return at most one entry
            if let Some(entry) = entries.into_iter().next() {
                self.spawn_part(&mut tasks, entry, &parts_token, permit, fatal_tx.clone());
            }
        };

        if result.is_err() {
            parts_token.cancel();
        }
        info!("Waiting for {} in-flight task(s)", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Worker task panicked: {}", e);
            }
        }

        result?;
        match fatal_rx.try_recv() {
            Ok(err) => Err(err),
            Err(_) => {
                info!("Consumer {} stopped", self.consumer);
                Ok(())
            }
        }
    }

    /// Delete what was just read without waiting for it
    fn spawn_delete(
        &self,
        tasks: &mut JoinSet<()>,
        entries: &[StreamEntry],
        fatal: mpsc::Sender<WorkerError>,
    ) {
        let ids: Vec<String> = entries.iter().map(|entry| entry.id.clone()).collect();
        let broker = self.broker.clone();
        let stream = self.stream.clone();
        tasks.spawn(async move {
            if let Err(e) = broker.xdel(&stream, &ids).await {
                error!("Unable to XDEL {:?}: {}", ids, e);
                let _ = fatal.try_send(WorkerError::Delete(e));
            }
        });
    }

    fn spawn_part(
        &self,
        tasks: &mut JoinSet<()>,
        entry: StreamEntry,
        token: &CancellationToken,
        permit: OwnedSemaphorePermit,
        fatal: mpsc::Sender<WorkerError>,
    ) {
        let message = match TaskMessage::from_fields(&entry.fields) {
            Ok(message) => message,
            Err(e) => {
                warn!(id = %entry.id, "Dropping malformed queue entry: {}", e);
                return;
            }
        };
        debug!(pid = %message.pid, part = %message.part, "Received task");

        let gatherer = self.gatherer.clone();
        let token = token.clone();
        tasks.spawn(async move {
            let _permit = permit;
            if let Err(e) = gatherer.run(message, &token).await {
                error!("Stopping worker: {}", e);
                let _ = fatal.try_send(WorkerError::Gather(e));
                token.cancel();
            }
        });
    }
}
