//! Per-part gather state machine

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::reassembly::{ReassemblyFactory, ReassemblyHandle};
use super::{GatherError, PartOutcome};
use crate::fetch::{FetchError, FetchPool, FetchTask, RetryPolicy};
use crate::message::{PartLabel, Task, TaskMessage};
use crate::result::ResultStore;
use crate::storage::{BlobStorage, StorageRegistry};

/// Shared dependencies of every part a worker gathers
#[derive(Clone)]
pub struct Gatherer {
    store: ResultStore,
    storages: Arc<StorageRegistry>,
    factory: Arc<dyn ReassemblyFactory>,
    jobs: usize,
    retry: RetryPolicy,
}

impl Gatherer {
    pub fn new(
        store: ResultStore,
        storages: Arc<StorageRegistry>,
        factory: Arc<dyn ReassemblyFactory>,
        jobs: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            storages,
            factory,
            jobs: jobs.max(1),
            retry,
        }
    }

    /// Gather one part and write its entry to the process log
    ///
    /// The part gets its own child of `token`: cancelling `token` fails the
    /// part, while a failing part never cancels its siblings. Only a pack
    /// failure is returned as an error; every other outcome is reported
    /// through [`PartOutcome`].
    pub async fn run(
        &self,
        message: TaskMessage,
        token: &CancellationToken,
    ) -> Result<PartOutcome, GatherError> {
        let process = match PartProcess::init(self, message, token.child_token()) {
            Ok(process) => process,
            Err(outcome) => return Ok(outcome),
        };
        process.run().await
    }
}

/// State of one part; consumed by [`PartProcess::run`]
struct PartProcess<'a> {
    gatherer: &'a Gatherer,
    pid: String,
    part: PartLabel,
    task: Task,
    handle: ReassemblyHandle,
    token: CancellationToken,
}

impl<'a> PartProcess<'a> {
    fn init(
        gatherer: &'a Gatherer,
        message: TaskMessage,
        token: CancellationToken,
    ) -> Result<Self, PartOutcome> {
        let TaskMessage { pid, part, task: raw } = message;
        let task = Task::unpack(&raw).map_err(|e| {
            warn!(pid = %pid, part = %part, "Dropping part, unparseable task: {}", e);
            PartOutcome::Dropped(e.to_string())
        })?;
        let reassembly = gatherer.factory.init(&task, &raw).map_err(|e| {
            warn!(pid = %pid, part = %part, "Dropping part: {}", e);
            PartOutcome::Dropped(e.to_string())
        })?;

        Ok(Self {
            gatherer,
            pid,
            part,
            task,
            handle: ReassemblyHandle::new(reassembly),
            token,
        })
    }

    async fn run(mut self) -> Result<PartOutcome, GatherError> {
        let storage = match self
            .gatherer
            .storages
            .client(&self.task.storage_kind, &self.task.storage_endpoint)
            .await
        {
            Ok(storage) => storage,
            Err(e) => return Ok(self.fail(format!("storage: {}", e)).await),
        };

        let ids = match self.handle.enumerate() {
            Ok(ids) => ids,
            Err(e) => return Ok(self.fail(e.to_string()).await),
        };
        debug!(pid = %self.pid, part = %self.part, fragments = ids.len(), "Collecting");

        if !ids.is_empty() {
            if let Err(message) = self.collect(ids, storage).await {
                return Ok(self.fail(message).await);
            }
        }
        self.complete().await
    }

    /// Fetch every fragment and add it; `Err` carries the failure message
    async fn collect(&mut self, ids: Vec<String>, storage: Arc<dyn BlobStorage>) -> Result<(), String> {
        let total = ids.len();
        let FetchPool {
            tasks,
            mut fragments,
            mut errors,
            workers,
        } = FetchPool::spawn(self.gatherer.jobs, self.token.clone(), self.gatherer.retry.clone());

        let enqueuer = tokio::spawn(enqueue(
            tasks,
            ids,
            storage,
            Arc::from(self.task.token.as_str()),
            self.token.clone(),
        ));

        let mut received = 0;
        let result = loop {
            if received == total {
                break Ok(());
            }
            tokio::select! {
                biased;
                Some(err) = errors.recv() => {
                    break Err(drain_errors(err.to_string(), &mut errors));
                }
                fragment = fragments.recv() => {
                    let Some(fragment) = fragment else {
                        break Err("fetch workers exited before the part was complete".to_string());
                    };
                    if let Err(e) = self.handle.add(fragment.index, &fragment.chunk) {
                        break Err(e.to_string());
                    }
                    received += 1;
                }
                _ = self.token.cancelled() => {
                    break Err(FetchError::Cancelled.to_string());
                }
            }
        };

        if result.is_err() {
            self.token.cancel();
        }
        drop(fragments);
        drop(errors);
        let _ = enqueuer.await;
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(pid = %self.pid, part = %self.part, "Fetch worker panicked: {}", e);
            }
        }
        result
    }

    /// Terminal failure: one error entry for this part's slot
    async fn fail(self, message: String) -> PartOutcome {
        self.token.cancel();
        warn!(pid = %self.pid, part = %self.part, "Part failed: {}", message);

        let entry = format!("part {}: {}", self.part, message);
        if let Err(e) = self.gatherer.store.write_error(&self.pid, &entry).await {
            error!(pid = %self.pid, part = %self.part, "Unable to write error entry: {}", e);
        }
        self.refresh().await;
        PartOutcome::Failed(message)
    }

    /// Terminal success: pack, write the part entry, refresh the TTL
    async fn complete(self) -> Result<PartOutcome, GatherError> {
        let Self {
            gatherer,
            pid,
            part,
            handle,
            token,
            ..
        } = self;

        let packed = match handle.pack() {
            Ok(packed) => packed,
            Err(source) => {
                token.cancel();
                error!(pid = %pid, part = %part, "Unable to pack part: {}", source);
                let entry = format!("part {}: {}", part, source);
                if let Err(e) = gatherer.store.write_error(&pid, &entry).await {
                    error!(pid = %pid, part = %part, "Unable to write error entry: {}", e);
                }
                return Err(GatherError::Pack { pid, part, source });
            }
        };

        match gatherer.store.write_part(&pid, &part, &packed).await {
            Ok(_) => info!(pid = %pid, part = %part, bytes = packed.len(), "Part complete"),
            Err(e) => error!(pid = %pid, part = %part, "Unable to write part: {}", e),
        }
        if let Err(e) = gatherer.store.refresh(&pid).await {
            warn!(pid = %pid, part = %part, "Unable to refresh expiry: {}", e);
        }
        Ok(PartOutcome::Completed)
    }

    async fn refresh(&self) {
        if let Err(e) = self.gatherer.store.refresh(&self.pid).await {
            warn!(pid = %self.pid, part = %self.part, "Unable to refresh expiry: {}", e);
        }
    }
}

/// Feed the pool; stops early on cancellation or when the workers are gone
async fn enqueue(
    tasks: mpsc::Sender<FetchTask>,
    ids: Vec<String>,
    storage: Arc<dyn BlobStorage>,
    credentials: Arc<str>,
    token: CancellationToken,
) {
    for (index, id) in ids.into_iter().enumerate() {
        let task = FetchTask {
            index,
            id,
            credentials: credentials.clone(),
            storage: storage.clone(),
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            sent = tasks.send(task) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

/// Combine the first error with whatever else is already queued
fn drain_errors(first: String, errors: &mut mpsc::Receiver<FetchError>) -> String {
    let mut more = 0;
    while let Ok(err) = errors.try_recv() {
        if !err.is_cancelled() {
            debug!("Further fetch failure: {}", err);
        }
        more += 1;
    }
    if more == 0 {
        first
    } else {
        format!("{} (and {} more)", first, more)
    }
}
