use balanza::core::{
    CachedPositions, HostPool, Position, Primary, Replica, Session, StatementKind,
};
use balanza::jobs::{
    BackoffPolicy, ConsistencyLevel, InMemoryRetryQueue, JobEnvelope, JobKindInfo, JobRegistry,
    StaticJobRegistry,
};
use balanza::metrics::NoopMetrics;
use balanza::LoadBalancer;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;

fn create_balancer(replica_position: u64) -> LoadBalancer {
    let primary = Arc::new(Primary::new("127.0.0.1:5432".parse().unwrap()));
    primary.record_write_position(Position::new(1_000));

    let hosts = (0..4)
        .map(|i| {
            let replica = Replica::new(
                format!("replica-{}", i),
                format!("127.0.0.1:{}", 5433 + i).parse().unwrap(),
                "main".to_string(),
            );
            replica.record_position(Position::new(replica_position));
            Arc::new(replica)
        })
        .collect();

    LoadBalancer::new(
        primary.clone(),
        primary,
        Arc::new(HostPool::new(hosts, Arc::new(NoopMetrics))),
        Arc::new(CachedPositions),
        "main".to_string(),
    )
}

fn create_registry() -> Arc<dyn JobRegistry> {
    let registry = StaticJobRegistry::new();
    registry.register(JobKindInfo {
        name: "ProjectCacheWorker".to_string(),
        consistency: Some(ConsistencyLevel::Delayed),
        propagation_enabled: true,
        max_retry_attempts: 3,
    });
    Arc::new(registry)
}

/// Session routing for a typical unit of work
fn bench_session_routing(c: &mut Criterion) {
    let balancer = create_balancer(1_000);
    let mut group = c.benchmark_group("session");

    group.bench_function("read_only_request", |b| {
        b.iter(|| {
            let mut session = Session::new();
            for _ in 0..10 {
                black_box(balancer.route(&mut session, StatementKind::Read));
            }
        })
    });

    group.bench_function("read_write_read_request", |b| {
        b.iter(|| {
            let mut session = Session::new();
            black_box(balancer.route(&mut session, StatementKind::Read));
            black_box(balancer.route(&mut session, StatementKind::Write));
            black_box(balancer.route(&mut session, StatementKind::Read));
        })
    });

    group.bench_function("nested_scopes", |b| {
        b.iter(|| {
            let mut session = Session::new();
            session.ignore_writes_for_scope(|session| {
                session.force_primary_for_scope(|session| {
                    black_box(balancer.route(session, StatementKind::Ambiguous))
                })
            })
        })
    });

    group.finish();
}

/// Stamping at enqueue and resolution at dequeue
fn bench_job_consistency(c: &mut Criterion) {
    let registry = create_registry();
    let mut group = c.benchmark_group("jobs");

    let caught_up = create_balancer(1_000);
    let stamper = caught_up.stamper(registry.clone());
    let mut session = Session::new();
    session.record_write();
    let job = stamper.stamp_for_enqueue(
        JobEnvelope::new("ProjectCacheWorker", json!({"project_id": 42})),
        &mut session,
    );

    group.bench_function("stamp_for_enqueue", |b| {
        b.iter(|| {
            let mut session = Session::new();
            session.record_write();
            black_box(stamper.stamp_for_enqueue(
                JobEnvelope::new("ProjectCacheWorker", json!({"project_id": 42})),
                &mut session,
            ))
        })
    });

    let resolver = caught_up.resolver(
        registry.clone(),
        BackoffPolicy::default(),
        Arc::new(InMemoryRetryQueue::new()),
    );
    group.bench_function("resolve_caught_up", |b| {
        b.iter(|| black_box(resolver.resolve_for_dequeue(&job)))
    });

    let lagging = create_balancer(10);
    let resolver = lagging.resolver(
        registry,
        BackoffPolicy::default(),
        Arc::new(InMemoryRetryQueue::new()),
    );
    group.bench_function("resolve_lagging", |b| {
        b.iter(|| black_box(resolver.resolve_for_dequeue(&job)))
    });

    group.finish();
}

criterion_group!(benches, bench_session_routing, bench_job_consistency);
criterion_main!(benches);
