//! Resilience benchmarks
//!
//! Hot paths of the circuit breaker state machine, the breaker registry and
//! backoff computation.
//!
//! Run with: `cargo bench --bench resilience_bench -p keel-common
//! --features runtime`

use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use keel_common::error::{CommonError, RetryStrategy};
use keel_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, RetryExecutor, RetryPolicy,
};
use tokio::runtime::Builder as RuntimeBuilder;

fn bench_breaker_recording(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker");

    group.bench_function("record_success_closed", |b| {
        let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default())
            .unwrap_or_else(|err| panic!("default config rejected: {err}"));
        b.iter(|| {
            breaker.record_success();
            black_box(breaker.can_execute());
        });
    });

    group.bench_function("record_failure_open", |b| {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .build()
            .unwrap_or_else(|err| panic!("bench config rejected: {err}"));
        let breaker = CircuitBreaker::new("bench", config)
            .unwrap_or_else(|err| panic!("bench config rejected: {err}"));
        b.iter(|| {
            breaker.record_failure();
            black_box(breaker.can_execute());
        });
    });

    group.bench_function("snapshot", |b| {
        let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default())
            .unwrap_or_else(|err| panic!("default config rejected: {err}"));
        for _ in 0..100 {
            breaker.record_success();
        }
        b.iter(|| black_box(breaker.snapshot()));
    });

    group.finish();
}

fn bench_registry_lookup(c: &mut Criterion) {
    let registry = CircuitBreakerRegistry::default();
    let keys: Vec<String> = (0..64).map(|i| format!("destination-{i}")).collect();
    for key in &keys {
        registry.get(key);
    }

    c.bench_function("registry_get_existing", |b| {
        let mut index = 0usize;
        b.iter(|| {
            index = (index + 1) % keys.len();
            black_box(registry.get(&keys[index]));
        });
    });
}

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("delay_for_attempt");
    for strategy in [RetryStrategy::Exponential, RetryStrategy::Linear] {
        for jitter in [false, true] {
            let policy = RetryPolicy::builder()
                .strategy(strategy)
                .jitter(jitter)
                .build()
                .unwrap_or_else(|err| panic!("bench policy rejected: {err}"));
            let id = BenchmarkId::new(strategy.as_str(), if jitter { "jitter" } else { "plain" });
            group.bench_with_input(id, &policy, |b, policy| {
                b.iter(|| {
                    for attempt in 1..=8 {
                        black_box(policy.delay_for_attempt(attempt));
                    }
                });
            });
        }
    }
    group.finish();
}

fn bench_executor_success_path(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| panic!("runtime: {err}"));
    let policy = RetryPolicy::builder()
        .base_delay(Duration::from_millis(1))
        .build()
        .unwrap_or_else(|err| panic!("bench policy rejected: {err}"));
    let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default())
        .unwrap_or_else(|err| panic!("default config rejected: {err}"));
    let executor = RetryExecutor::new(policy, std::sync::Arc::new(breaker));

    c.bench_function("executor_first_attempt_success", |b| {
        b.iter(|| {
            let result = runtime.block_on(executor.execute(|| async { Ok::<_, CommonError>(1u8) }));
            black_box(result.is_ok());
        });
    });
}

criterion_group!(
    benches,
    bench_breaker_recording,
    bench_registry_lookup,
    bench_backoff,
    bench_executor_success_path
);
criterion_main!(benches);
