//! Bounded fetch worker pool

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{FetchError, FetchTask, Fragment, RetryPolicy};

/// N workers reading one task channel
///
/// Dropping `tasks` tells the workers no more fragments are coming.
/// Cancelling the token stops every worker within one scheduling step.
pub struct FetchPool {
    pub tasks: mpsc::Sender<FetchTask>,
    pub fragments: mpsc::Receiver<Fragment>,
    pub errors: mpsc::Receiver<FetchError>,
    pub workers: Vec<JoinHandle<()>>,
}

impl FetchPool {
    /// Start `jobs` workers
    pub fn spawn(jobs: usize, token: CancellationToken, retry: RetryPolicy) -> Self {
        let jobs = jobs.max(1);
        let (task_tx, task_rx) = mpsc::channel(jobs);
        let (fragment_tx, fragment_rx) = mpsc::channel(jobs);
        let (error_tx, error_rx) = mpsc::channel(jobs);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let workers = (0..jobs)
            .map(|worker| {
                let worker = Worker {
                    id: worker,
                    tasks: task_rx.clone(),
                    fragments: fragment_tx.clone(),
                    errors: error_tx.clone(),
                    token: token.clone(),
                    retry: retry.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self {
            tasks: task_tx,
            fragments: fragment_rx,
            errors: error_rx,
            workers,
        }
    }
}

struct Worker {
    id: usize,
    tasks: Arc<Mutex<mpsc::Receiver<FetchTask>>>,
    fragments: mpsc::Sender<Fragment>,
    errors: mpsc::Sender<FetchError>,
    token: CancellationToken,
    retry: RetryPolicy,
}

impl Worker {
    async fn next_task(&self) -> Option<FetchTask> {
        let mut tasks = self.tasks.lock().await;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            task = tasks.recv() => task,
        }
    }

    async fn run(self) {
        loop {
            let task = self.next_task().await;
            if self.token.is_cancelled() {
                // Capacity equals the worker count and each worker sends at
                // most one error, so this never blocks.
                let _ = self.errors.send(FetchError::Cancelled).await;
                trace!(worker = self.id, "Worker cancelled");
                return;
            }
            let Some(task) = task else {
                trace!(worker = self.id, "Task channel closed");
                return;
            };

            let storage = task.storage.clone();
            let credentials = task.credentials.clone();
            let id = task.id.clone();
            let fetched = self
                .retry
                .run(&self.token, || storage.get(&credentials, &id))
                .await;

            match fetched {
                Ok(chunk) => {
                    let fragment = Fragment {
                        index: task.index,
                        chunk,
                    };
                    if self.fragments.send(fragment).await.is_err() {
                        return;
                    }
                }
                Err(source) => {
                    debug!(worker = self.id, fragment = %task.id, "Fetch failed: {}", source);
                    let err = if source.is_cancelled() {
                        FetchError::Cancelled
                    } else {
                        FetchError::Storage {
                            index: task.index,
                            id: task.id,
                            source,
                        }
                    };
                    let _ = self.errors.send(err).await;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BlobStorage;
    use crate::testing::mocks::MockStorage;
    use std::time::Duration;

    fn task(index: usize, storage: &Arc<MockStorage>) -> FetchTask {
        let storage: Arc<dyn BlobStorage> = storage.clone();
        FetchTask {
            index,
            id: format!("cube/{}", index),
            credentials: Arc::from(""),
            storage,
        }
    }

    #[tokio::test]
    async fn test_pool_fetches_every_task() {
        let storage = Arc::new(MockStorage::new().with_blobs((0..10).map(|i| {
            (format!("cube/{}", i), vec![i as u8; 4])
        })));
        let mut pool = FetchPool::spawn(3, CancellationToken::new(), RetryPolicy::none());

        let sender = pool.tasks.clone();
        let feed = {
            let storage = storage.clone();
            tokio::spawn(async move {
                for i in 0..10 {
                    sender.send(task(i, &storage)).await.unwrap();
                }
            })
        };
        drop(pool.tasks);

        let mut seen = Vec::new();
        for _ in 0..10 {
            let fragment = pool.fragments.recv().await.unwrap();
            assert_eq!(fragment.chunk, vec![fragment.index as u8; 4]);
            seen.push(fragment.index);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        feed.await.unwrap();

        for worker in pool.workers {
            worker.await.unwrap();
        }
        assert!(pool.errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_worker_retires_on_first_failure() {
        let storage = Arc::new(MockStorage::new());
        let mut pool = FetchPool::spawn(1, CancellationToken::new(), RetryPolicy::none());
        pool.tasks.send(task(0, &storage)).await.unwrap();

        let err = pool.errors.recv().await.unwrap();
        assert!(matches!(err, FetchError::Storage { index: 0, .. }));

        // The only worker is gone, so nothing fetches the next task
        let _ = pool.tasks.send(task(1, &storage)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(storage.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_pool_reports_and_stops() {
        let storage = Arc::new(MockStorage::new().with_blob("cube/0", b"x"));
        let token = CancellationToken::new();
        let mut pool = FetchPool::spawn(2, token.clone(), RetryPolicy::none());
        token.cancel();
        let _ = pool.tasks.try_send(task(0, &storage));

        for _ in 0..2 {
            let err = pool.errors.recv().await.unwrap();
            assert!(err.is_cancelled());
        }
        for worker in pool.workers {
            worker.await.unwrap();
        }
        assert_eq!(storage.calls(), 0);
    }
}
