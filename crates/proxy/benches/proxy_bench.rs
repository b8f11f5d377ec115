//! Benchmarks for the coordinator: consistency arithmetic, digests and
//! reconciliation, range splitting, single-node writes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ringstore_common::{
    Cell, ConsistencyLevel, DecoratedKey, Endpoint, PartitionData, ReconcilableResult, Row, Token,
    TokenRange,
};

// ────────────────────────── Consistency benchmarks ──────────────────────────

fn bench_ack_policy(c: &mut Criterion) {
    use ringstore_proxy::consistency::AckPolicy;
    use ringstore_proxy::ReplicationStrategy;

    let strategy = ReplicationStrategy::network_topology([("dc1", 3), ("dc2", 3), ("dc3", 3)]);
    let live: Vec<(Endpoint, String)> = (0..9u16)
        .map(|i| (Endpoint::localhost(7000 + i), format!("dc{}", i / 3 + 1)))
        .collect();

    let mut group = c.benchmark_group("ack_policy");
    for cl in [
        ConsistencyLevel::Quorum,
        ConsistencyLevel::LocalQuorum,
        ConsistencyLevel::EachQuorum,
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(cl), &cl, |b, &cl| {
            b.iter(|| {
                let policy = AckPolicy::for_level(cl, &strategy, "dc1", &[]);
                black_box(policy.assure_sufficient(cl, &live).is_ok());
                black_box(policy.filter_for_query(&live))
            });
        });
    }
    group.finish();
}

// ────────────────────────── Read path benchmarks ──────────────────────────

fn result(partitions: usize, rows: usize, timestamp: i64) -> ReconcilableResult {
    ReconcilableResult::new(
        (0..partitions)
            .map(|p| PartitionData {
                key: DecoratedKey::new(format!("key_{p:06}").into_bytes()),
                rows: (0..rows)
                    .map(|r| Row {
                        clustering: format!("c{r:04}").into_bytes(),
                        cell: Cell::live(format!("v{timestamp}").into_bytes(), timestamp),
                    })
                    .collect(),
            })
            .collect(),
    )
}

fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest");
    for partitions in [1, 100, 1000] {
        let data = result(partitions, 10, 1);
        group.bench_with_input(BenchmarkId::from_parameter(partitions), &data, |b, data| {
            b.iter(|| black_box(data.digest()));
        });
    }
    group.finish();
}

fn bench_reconcile_and_repair(c: &mut Criterion) {
    let versions = vec![result(100, 10, 1), result(100, 10, 2), result(100, 10, 1)];
    c.bench_function("reconcile_3x100", |b| {
        b.iter(|| black_box(ReconcilableResult::reconcile(&versions)));
    });

    let reconciled = ReconcilableResult::reconcile(&versions);
    c.bench_function("repair_mutations_100", |b| {
        b.iter(|| black_box(versions[0].repair_mutations(&reconciled, "ks", "t")));
    });
}

// ────────────────────────── Range benchmarks ──────────────────────────

fn bench_restricted_ranges(c: &mut Criterion) {
    use ringstore_proxy::range_query::get_restricted_ranges;

    let mut group = c.benchmark_group("restricted_ranges");
    for vnodes in [16u64, 256, 4096] {
        let step = u64::MAX / vnodes;
        let ring: Vec<Token> = (1..=vnodes).map(|i| Token(i * step)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(vnodes), &ring, |b, ring| {
            b.iter(|| black_box(get_restricted_ranges(&TokenRange::full(), ring)));
        });
    }
    group.finish();
}

// ────────────────────────── Coordinator benchmarks ──────────────────────────

fn bench_single_node_mutate(c: &mut Criterion) {
    use ringstore_common::{FrozenMutation, Mutation, PartitionRange, ReadCommand, ReadDigest};
    use ringstore_proxy::batchlog::Batch;
    use ringstore_proxy::{
        LocalBatchlog, Messaging, MessagingError, ProxyConfig, ReplicationStrategy, StorageProxy,
        TokenRing,
    };
    use ringstore_storage::{FsyncPolicy, StorageEngine};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    struct NoopMessaging;

    #[async_trait::async_trait]
    impl Messaging for NoopMessaging {
        async fn send_mutation(
            &self,
            _to: Endpoint,
            _mutation: Arc<FrozenMutation>,
        ) -> Result<(), MessagingError> {
            Ok(())
        }
        async fn read_data(
            &self,
            _to: Endpoint,
            _cmd: &ReadCommand,
            _range: &PartitionRange,
        ) -> Result<ReconcilableResult, MessagingError> {
            Ok(ReconcilableResult::default())
        }
        async fn read_digest(
            &self,
            _to: Endpoint,
            _cmd: &ReadCommand,
            _range: &PartitionRange,
        ) -> Result<ReadDigest, MessagingError> {
            Ok(ReconcilableResult::default().digest())
        }
        async fn store_batch(&self, _to: Endpoint, _batch: Arc<Batch>) -> Result<(), MessagingError> {
            Ok(())
        }
        async fn remove_batch(&self, _to: Endpoint, _id: uuid::Uuid) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("single_node_mutate", |b| {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = StorageEngine::open(dir.path(), FsyncPolicy::None).unwrap();
        let storage = Arc::new(RwLock::new(engine));
        let local = Endpoint::localhost(7000);
        let ring = Arc::new(
            TokenRing::new(local, "dc1")
                .with_node(local, "dc1", &[Token(1 << 63)])
                .with_default_strategy(ReplicationStrategy::simple(1)),
        );
        let batchlog = Arc::new(LocalBatchlog::new(storage.clone()));
        let proxy = StorageProxy::new(
            storage,
            ring,
            Arc::new(NoopMessaging),
            batchlog,
            ProxyConfig::default(),
        );

        let mut i = 0u64;
        b.iter(|| {
            rt.block_on(async {
                let m = Mutation::new("ks", "t", DecoratedKey::new(format!("key_{i}").into_bytes()))
                    .with_row(b"c".to_vec(), b"value".to_vec());
                proxy.mutate(vec![m], ConsistencyLevel::One).await.unwrap();
            });
            i += 1;
        });
    });
}

criterion_group!(
    benches,
    bench_ack_policy,
    bench_digest,
    bench_reconcile_and_repair,
    bench_restricted_ranges,
    bench_single_node_mutate,
);
criterion_main!(benches);
