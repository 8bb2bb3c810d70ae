//! End-to-end tests of the pipeline against the in-memory broker
//!
//! A query is planned and scheduled, a fetch worker gathers the parts from
//! files on disk, and the result is read back through the retrieval API.

use cubeflow::broker::{Broker, MemoryBroker};
use cubeflow::fetch::RetryPolicy;
use cubeflow::gather::{Gatherer, KindRegistry};
use cubeflow::message::{ProcessHeader, Query};
use cubeflow::planner::BundlePlanner;
use cubeflow::result::{ProcessState, ResultApi, ResultError, ResultStore};
use cubeflow::scheduler::Scheduler;
use cubeflow::storage::StorageRegistry;
use cubeflow::worker::Worker;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const TTL: Duration = Duration::from_secs(600);

struct Pipeline {
    broker: MemoryBroker,
    scheduler: Scheduler,
    api: ResultApi,
    root: TempDir,
}

impl Pipeline {
    fn new(task_size: usize) -> Self {
        let broker = MemoryBroker::new();
        let shared: Arc<dyn Broker> = Arc::new(broker.clone());
        let scheduler = Scheduler::new(
            shared.clone(),
            Arc::new(BundlePlanner::new(task_size)),
            "jobs",
            TTL,
        );
        let api = ResultApi::new(ResultStore::new(shared, TTL), Duration::from_secs(5));
        Self {
            broker,
            scheduler,
            api,
            root: TempDir::new().unwrap(),
        }
    }

    /// Write `<root>/cube/<name>` with the name as content
    fn write_fragments(&self, names: &[&str]) {
        let dir = self.root.path().join("cube");
        std::fs::create_dir_all(&dir).unwrap();
        for name in names {
            std::fs::write(dir.join(name), name.as_bytes()).unwrap();
        }
    }

    fn query(&self, pid: &str, fragments: &[&str]) -> Query {
        Query {
            pid: pid.into(),
            token: String::new(),
            guid: "cube".into(),
            manifest: json!({}),
            storage_endpoint: self.root.path().display().to_string(),
            storage_kind: "file".into(),
            function: "bundle".into(),
            args: json!({ "fragments": fragments }),
        }
    }

    async fn submit(&self, pid: &str, fragments: &[&str]) -> usize {
        let plan = self.scheduler.make_query(&self.query(pid, fragments)).unwrap();
        self.scheduler
            .schedule(&CancellationToken::new(), pid, &plan)
            .await
            .unwrap();
        plan.ntasks()
    }

    fn worker(&self) -> Worker {
        let gatherer = Gatherer::new(
            ResultStore::new(Arc::new(self.broker.clone()), TTL),
            Arc::new(StorageRegistry::new(64, Duration::from_secs(5))),
            Arc::new(KindRegistry::builtin()),
            4,
            RetryPolicy::none(),
        );
        Worker::new(
            Arc::new(self.broker.clone()),
            gatherer,
            "jobs",
            "fetch",
            "consumer:it",
            Duration::from_millis(20),
        )
    }

    /// Run a worker until the process has `ntasks` log entries
    async fn drain(&self, pid: &str, ntasks: usize) {
        let worker = self.worker();
        let shutdown = CancellationToken::new();
        let run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        };
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.broker.xlen(pid).await.unwrap() < ntasks {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("process did not finish in time");
        shutdown.cancel();
        run.await.unwrap().unwrap();
    }
}

fn read_bin(cursor: &mut &[u8]) -> Vec<u8> {
    let len = rmp::decode::read_bin_len(cursor).unwrap() as usize;
    let (value, rest) = cursor.split_at(len);
    *cursor = rest;
    value.to_vec()
}

#[tokio::test]
async fn test_scheduled_process_finishes() {
    let names = ["a", "b", "c", "d", "e"];
    let pipeline = Pipeline::new(2);
    pipeline.write_fragments(&names);

    let ntasks = pipeline.submit("pid-1", &names).await;
    assert_eq!(ntasks, 3);
    assert_eq!(
        pipeline.api.status("pid-1").await.unwrap().status,
        ProcessState::Working
    );

    pipeline.drain("pid-1", ntasks).await;

    let status = pipeline.api.status("pid-1").await.unwrap();
    assert_eq!(status.status, ProcessState::Finished);
    assert_eq!(status.progress.as_deref(), Some("3/3"));

    let bytes = pipeline.api.get("pid-1").await.unwrap();
    let mut cursor = bytes.as_slice();
    assert_eq!(rmp::decode::read_array_len(&mut cursor).unwrap(), 4);
    let header = ProcessHeader::parse(&read_bin(&mut cursor)).unwrap();
    assert_eq!(header.ntasks, 3);

    let mut fragments = Vec::new();
    for _ in 0..3 {
        let n = rmp::decode::read_array_len(&mut cursor).unwrap();
        for _ in 0..n {
            fragments.push(String::from_utf8(read_bin(&mut cursor)).unwrap());
        }
    }
    fragments.sort();
    assert_eq!(fragments, names);
    assert_eq!(pipeline.broker.xlen("jobs").await.unwrap(), 0);
}

#[tokio::test]
async fn test_reads_after_completion_are_identical() {
    let names = ["a", "b", "c"];
    let pipeline = Pipeline::new(1);
    pipeline.write_fragments(&names);
    let ntasks = pipeline.submit("pid-2", &names).await;
    pipeline.drain("pid-2", ntasks).await;

    let first = pipeline.api.get("pid-2").await.unwrap();
    let second = pipeline.api.get("pid-2").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        pipeline.api.status("pid-2").await.unwrap(),
        pipeline.api.status("pid-2").await.unwrap()
    );
}

#[tokio::test]
async fn test_missing_fragment_fills_its_slot_with_an_error() {
    let pipeline = Pipeline::new(2);
    pipeline.write_fragments(&["a", "b", "c"]);

    // "d" is never written, so the second part fails
    let ntasks = pipeline.submit("pid-3", &["a", "b", "c", "d"]).await;
    pipeline.drain("pid-3", ntasks).await;

    assert_eq!(pipeline.broker.xlen("pid-3").await.unwrap(), ntasks);
    let status = pipeline.api.status("pid-3").await.unwrap();
    assert_eq!(status.status, ProcessState::Finished);

    let err = pipeline.api.get("pid-3").await.unwrap_err();
    assert!(matches!(err, ResultError::PartFailed(_)));
}

#[tokio::test]
async fn test_unknown_process_is_pending_and_not_found() {
    let pipeline = Pipeline::new(2);
    let status = pipeline.api.status("nobody").await.unwrap();
    assert_eq!(status.status, ProcessState::Pending);
    assert!(matches!(
        pipeline.api.get("nobody").await.unwrap_err(),
        ResultError::NotFound(_)
    ));
}
