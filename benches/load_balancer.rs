//! Benchmarks for tcplb components.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::Duration;
use tcplb::backend::algorithms::{LeastConnections, LoadBalancer, RoundRobin};
use tcplb::backend::{Backend, BackendAddress, BackendRegistry};
use tcplb::metrics::{FailureReason, MetricsCollector};
use tcplb::util::ConnectionId;

fn create_registry(num_backends: usize, healthy_every: usize) -> BackendRegistry {
    let registry = BackendRegistry::new();
    for i in 0..num_backends {
        let backend = registry
            .add_backend(BackendAddress::new("127.0.0.1", 9000 + i as u16))
            .unwrap();
        backend.set_healthy(i % healthy_every == 0);
    }
    registry
}

fn candidates(num_backends: usize) -> Vec<Arc<Backend>> {
    create_registry(num_backends, 1).all_backends()
}

fn benchmark_round_robin(c: &mut Criterion) {
    let lb = RoundRobin::new();
    let backends = candidates(10);

    c.bench_function("round_robin_select", |b| {
        b.iter(|| {
            black_box(lb.select(black_box(&backends)));
        })
    });

    // Half the candidates filtered out on every call
    let mixed = create_registry(10, 2).all_backends();
    c.bench_function("round_robin_select_mixed_health", |b| {
        b.iter(|| {
            black_box(lb.select(black_box(&mixed)));
        })
    });
}

fn benchmark_least_connections(c: &mut Criterion) {
    let lb = LeastConnections::new();
    let backends = candidates(10);

    // Simulate some connections
    for (i, backend) in backends.iter().enumerate().take(5) {
        for _ in 0..i {
            lb.on_connect(backend.address());
        }
    }

    c.bench_function("least_connections_select", |b| {
        b.iter(|| {
            black_box(lb.select(black_box(&backends)));
        })
    });

    let address = backends[0].address().clone();
    c.bench_function("least_connections_connect_disconnect", |b| {
        b.iter(|| {
            lb.on_connect(black_box(&address));
            lb.on_disconnect(black_box(&address));
        })
    });
}

fn benchmark_registry(c: &mut Criterion) {
    let registry = create_registry(100, 3);

    let mut group = c.benchmark_group("registry");

    group.bench_function("healthy_backends", |b| {
        b.iter(|| {
            black_box(registry.healthy_backends());
        })
    });

    group.bench_function("healthy_count", |b| {
        b.iter(|| {
            black_box(registry.healthy_count());
        })
    });

    group.finish();
}

fn benchmark_metrics(c: &mut Criterion) {
    let collector = MetricsCollector::new();
    let backend = BackendAddress::new("127.0.0.1", 9000);

    let mut group = c.benchmark_group("metrics");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record_session", |b| {
        b.iter(|| {
            collector.record_session(
                black_box(&backend),
                black_box(1024),
                black_box(4096),
                black_box(Duration::from_millis(10)),
            );
        })
    });

    group.bench_function("record_selection", |b| {
        b.iter(|| {
            collector.record_selection(black_box(&backend));
        })
    });

    group.bench_function("record_dispatch_failure", |b| {
        b.iter(|| {
            collector.record_dispatch_failure(black_box(FailureReason::NoBackend));
        })
    });

    group.finish();
}

fn benchmark_connection_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("connection_id");

    group.bench_function("new", |b| {
        b.iter(|| {
            black_box(ConnectionId::new());
        })
    });

    group.bench_function("new_and_format", |b| {
        b.iter(|| {
            black_box(ConnectionId::new().to_string());
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_round_robin,
    benchmark_least_connections,
    benchmark_registry,
    benchmark_metrics,
    benchmark_connection_id,
);

criterion_main!(benches);
