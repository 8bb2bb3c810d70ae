//! Performance benchmarks for gathering parts

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use cubeflow::broker::MemoryBroker;
use cubeflow::fetch::RetryPolicy;
use cubeflow::gather::{Gatherer, KindRegistry};
use cubeflow::result::ResultStore;
use cubeflow::storage::{BlobStorage, StorageKind, StorageRegistry};
use cubeflow::testing::mocks::MockStorage;
use cubeflow::testing::{bundle_task, task_message};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

const ENDPOINT: &str = "mock://bench";

fn fragment_names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("0-0-{}.f32", i)).collect()
}

fn gatherer(rt: &Runtime, names: &[String], jobs: usize) -> Gatherer {
    let payload = vec![0u8; 64 * 64 * 4];
    let storage: Arc<dyn BlobStorage> = Arc::new(
        MockStorage::new()
            .with_blobs(names.iter().map(|n| (format!("cube/{}", n), payload.clone()))),
    );
    let registry = StorageRegistry::new(0, Duration::from_secs(5));
    rt.block_on(registry.insert(StorageKind::Http, ENDPOINT, storage));
    Gatherer::new(
        ResultStore::new(Arc::new(MemoryBroker::new()), Duration::from_secs(600)),
        Arc::new(registry),
        Arc::new(KindRegistry::builtin()),
        jobs,
        RetryPolicy::none(),
    )
}

fn bench_gather_part(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("gather_part");
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(5));

    for fragments in [10, 100, 500] {
        for jobs in [1, 8, 30] {
            let names = fragment_names(fragments);
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let message = task_message(&bundle_task("bench", "cube", ENDPOINT, &refs), 0, 1);
            let gatherer = gatherer(&rt, &names, jobs);

            group.bench_with_input(
                BenchmarkId::new(format!("jobs_{}", jobs), fragments),
                &fragments,
                |b, _| {
                    b.to_async(&rt).iter(|| async {
                        let outcome = gatherer
                            .run(message.clone(), &CancellationToken::new())
                            .await
                            .unwrap();
                        black_box(outcome)
                    })
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_gather_part);
criterion_main!(benches);
