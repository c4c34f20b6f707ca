//! Resilience benchmarks
//!
//! Admission checks sit on every guarded call and every broadcast, so their
//! cost matters more than the state transitions themselves.
//!
//! Run with: `cargo bench --bench resilience_bench -p vigil-common
//! --features runtime`

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Builder as RuntimeBuilder;
use vigil_common::error::CommonError;
use vigil_common::resilience::{CircuitBreaker, CircuitBreakerConfig, MockClock, RetryConfig};

fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker_admission");

    group.bench_function("allow_call_closed", |b| {
        let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default())
            .unwrap_or_else(|err| panic!("bench breaker: {err}"));
        b.iter(|| {
            let _ = black_box(breaker.allow_call());
            breaker.record_success();
        });
    });

    group.bench_function("allow_call_open_rejects", |b| {
        let breaker = CircuitBreaker::with_clock("bench", CircuitBreakerConfig::default(), MockClock::new())
            .unwrap_or_else(|err| panic!("bench breaker: {err}"));
        breaker.force_open();
        b.iter(|| black_box(breaker.allow_call().is_err()));
    });

    group.finish();
}

fn bench_async_call(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| panic!("bench runtime: {err}"));
    let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default())
        .unwrap_or_else(|err| panic!("bench breaker: {err}"));

    c.bench_function("circuit_breaker_call_success", |b| {
        b.to_async(&runtime).iter(|| async {
            let result = breaker.call(|| async { Ok::<_, CommonError>(1u32) }).await;
            black_box(result.is_ok())
        });
    });
}

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff_delay");
    for jitter in [false, true] {
        let schedule = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter_enabled: jitter,
        }
        .schedule();
        group.bench_with_input(BenchmarkId::from_parameter(jitter), &schedule, |b, schedule| {
            b.iter(|| {
                for attempt in 1..=10 {
                    black_box(schedule.delay_for(black_box(attempt)));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_admission, bench_async_call, bench_backoff);
criterion_main!(benches);
