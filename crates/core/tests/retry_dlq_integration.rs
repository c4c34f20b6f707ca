//! Integration tests for retry handling, dead-letter escalation and DLQ
//! management.

mod support;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use support::{job, FakeDlq, FakeQueue};
use vigil_common::resilience::{CircuitBreakerConfig, RetryConfig};
use vigil_common::testing::{RecordingEventRecorder, RecordingMetrics};
use vigil_common::LogSeverity;
use vigil_core::{DeadLetterQueue, RetryHandler};
use vigil_domain::VigilError;

fn retry_config(max_retries: u32) -> RetryConfig {
    RetryConfig::builder()
        .max_retries(max_retries)
        .base_delay(Duration::from_secs(1))
        .max_delay(Duration::from_secs(10))
        .exponential_base(2.0)
        .jitter(false)
        .build()
        .unwrap()
}

fn dlq_breaker(threshold: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig::builder()
        .failure_threshold(threshold)
        .recovery_timeout(Duration::from_secs(60))
        .build()
        .unwrap()
}

/// Validates an always-failing job is dead-lettered with full diagnostics.
///
/// Assertions:
/// - Three attempts with 1s and 2s between them.
/// - The DLQ entry carries kind, HTTP status, body, delays and a snapshot.
/// - The DLQ counter is incremented once.
#[tokio::test(start_paused = true)]
async fn test_exhausted_job_moves_to_dlq() {
    let dlq = FakeDlq::new();
    let queues = FakeQueue::new();
    let metrics = Arc::new(RecordingMetrics::new());
    let handler = RetryHandler::new(retry_config(3), dlq_breaker(10), dlq.clone(), queues.clone())
        .unwrap()
        .with_observability(metrics.clone(), Arc::new(RecordingEventRecorder::new()));
    let alert = job("send_webhook");

    let result = handler
        .with_retry(&alert, "webhooks", |_| async {
            Err::<(), _>(VigilError::transport("upstream unavailable", Some(503), Some("busy".into())))
        })
        .await;

    assert!(!result.success());
    assert_eq!(result.attempts, 3);
    assert_eq!(result.delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    assert!(result.moved_to_dlq);

    let entries = dlq.entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.original_job.id, alert.id);
    assert_eq!(entry.source_queue, "webhooks");
    assert_eq!(entry.error_kind, "transport");
    assert_eq!(entry.attempt_count, 3);
    assert_eq!(entry.http_status, Some(503));
    assert_eq!(entry.response_body.as_deref(), Some("busy"));
    assert_eq!(entry.retry_delays_ms, vec![1000, 2000]);
    assert!(entry.stack_trace.as_deref().unwrap().contains("upstream unavailable"));
    assert!(entry.first_failed_at <= entry.last_failed_at);
    assert_eq!(entry.system_snapshot.dlq_breaker_state, "closed");
    assert_eq!(metrics.counter("vigil_dlq_jobs_total"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_without_dlq() {
    let dlq = FakeDlq::new();
    let handler = RetryHandler::new(retry_config(3), dlq_breaker(10), dlq.clone(), FakeQueue::new()).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let result = handler
        .with_retry(&job("index"), "search", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(VigilError::Connection("reset".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

    assert!(result.success());
    assert_eq!(result.result.as_ref().ok(), Some(&2));
    assert_eq!(result.attempts, 2);
    assert!(!result.moved_to_dlq);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(dlq.len(), 0);
}

/// Validates DLQ writes denied by an open breaker are reported as data loss.
///
/// Assertions:
/// - The second failure trips the `dlq_overflow` breaker.
/// - The third job is lost and a critical `dlq.write_denied` record is emitted.
#[tokio::test(start_paused = true)]
async fn test_dlq_breaker_open_reports_data_loss() {
    let dlq = FakeDlq::new();
    dlq.set_fail_writes(true);
    let metrics = Arc::new(RecordingMetrics::new());
    let recorder = Arc::new(RecordingEventRecorder::new());
    let handler = RetryHandler::new(retry_config(1), dlq_breaker(2), dlq.clone(), FakeQueue::new())
        .unwrap()
        .with_observability(metrics.clone(), recorder.clone());

    for _ in 0..3 {
        let result = handler
            .with_retry(&job("notify"), "notifications", |_| async {
                Err::<(), _>(VigilError::Broker("down".into()))
            })
            .await;
        assert!(!result.moved_to_dlq);
    }

    assert_eq!(handler.dlq_breaker().state().as_str(), "open");
    assert_eq!(recorder.by_event("dlq.write_failed").len(), 2);
    let denied = recorder.by_event("dlq.write_denied");
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].severity, LogSeverity::Critical);
    assert_eq!(metrics.counter("vigil_dlq_jobs_lost_total"), 3);
    assert_eq!(dlq.len(), 0);
}

/// Validates the management surface: stats, listing, requeue and clear.
#[tokio::test(start_paused = true)]
async fn test_dlq_management_roundtrip() {
    let dlq = FakeDlq::new();
    let queues = FakeQueue::new();
    let handler = RetryHandler::new(retry_config(1), dlq_breaker(10), dlq.clone(), queues.clone()).unwrap();
    for (job_type, queue) in [("a", "alerts"), ("b", "alerts"), ("c", "exports")] {
        handler
            .with_retry(&job(job_type), queue, |_| async { Err::<(), _>(VigilError::Broker("down".into())) })
            .await;
    }

    let service = DeadLetterQueue::new(dlq.clone(), queues.clone(), 1000);
    let stats = service.stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_source_queue.get("alerts"), Some(&2));

    let page = service.list(1, 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].original_job.job_type, "b");

    let requeued = service.requeue_oldest().await.unwrap().unwrap();
    assert_eq!(requeued.original_job.job_type, "a");
    let sent = queues.jobs("alerts");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].retry_count, 1);

    let target = dlq.entries()[1].id;
    service.move_entry(target, "manual_review").await.unwrap();
    assert_eq!(queues.jobs("manual_review")[0].job_type, "c");
    assert!(matches!(service.move_entry(target, "x").await, Err(VigilError::NotFound(_))));

    assert_eq!(service.clear().await.unwrap(), 1);
    assert_eq!(service.stats().await.unwrap().total, 0);
}

/// Validates a failed requeue leaves the entry at the front.
///
/// Assertions:
/// - `requeue_all` with the broker down fails without losing entries.
/// - Once the broker is back, `requeue_all` honors its limit.
#[tokio::test(start_paused = true)]
async fn test_requeue_all_is_bounded_and_lossless() {
    let dlq = FakeDlq::new();
    let queues = FakeQueue::new();
    let handler = RetryHandler::new(retry_config(1), dlq_breaker(10), dlq.clone(), queues.clone()).unwrap();
    for index in 0..5 {
        handler
            .with_retry(&job(&format!("job-{index}")), "alerts", |_| async {
                Err::<(), _>(VigilError::Broker("down".into()))
            })
            .await;
    }
    let oldest = dlq.entries()[0].id;

    queues.set_failing(true);
    let service = DeadLetterQueue::new(dlq.clone(), queues.clone(), 3);
    assert!(service.requeue_all().await.is_err());
    assert_eq!(dlq.len(), 5);
    assert_eq!(dlq.entries()[0].id, oldest);

    queues.set_failing(false);
    assert_eq!(service.requeue_all().await.unwrap(), 3);
    assert_eq!(dlq.len(), 2);
    let sent: Vec<String> = queues.jobs("alerts").into_iter().map(|j| j.job_type).collect();
    assert_eq!(sent, vec!["job-0", "job-1", "job-2"]);
}

/// Validates a requeue with both the broker and the store failing keeps the entry.
///
/// Assertions:
/// - `requeue_oldest` and `move_entry` return the broker error.
/// - The entry is still in the DLQ, unchanged, and nothing reached a queue.
#[tokio::test(start_paused = true)]
async fn test_failed_requeue_with_unwritable_store_keeps_entry() {
    let dlq = FakeDlq::new();
    let queues = FakeQueue::new();
    let handler = RetryHandler::new(retry_config(1), dlq_breaker(10), dlq.clone(), queues.clone()).unwrap();
    handler
        .with_retry(&job("notify"), "alerts", |_| async { Err::<(), _>(VigilError::Broker("down".into())) })
        .await;
    let entry = dlq.entries()[0].clone();

    dlq.set_fail_writes(true);
    queues.set_failing(true);
    let service = DeadLetterQueue::new(dlq.clone(), queues.clone(), 10);

    assert!(matches!(service.requeue_oldest().await, Err(VigilError::Broker(_))));
    assert!(matches!(service.move_entry(entry.id, "manual_review").await, Err(VigilError::Broker(_))));
    assert_eq!(dlq.entries(), vec![entry]);
    assert!(queues.jobs("alerts").is_empty());
    assert!(queues.jobs("manual_review").is_empty());
}

/// Validates management calls stay consistent while failures keep arriving.
///
/// Assertions:
/// - Every written failure ends up in the DLQ, requeued, moved or cleared.
/// - No job is requeued twice.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_management_during_concurrent_writes_accounts_for_every_job() {
    const WRITERS: usize = 4;
    const JOBS_PER_WRITER: usize = 50;

    let dlq = FakeDlq::new();
    let queues = FakeQueue::new();
    let handler = Arc::new(
        RetryHandler::new(retry_config(1), dlq_breaker(1000), dlq.clone(), queues.clone()).unwrap(),
    );
    let service = Arc::new(DeadLetterQueue::new(dlq.clone(), queues.clone(), 7));
    let cleared = Arc::new(AtomicUsize::new(0));

    let mut writers = Vec::new();
    for writer in 0..WRITERS {
        let handler = handler.clone();
        writers.push(tokio::spawn(async move {
            let mut dead_lettered = 0;
            for index in 0..JOBS_PER_WRITER {
                let result = handler
                    .with_retry(&job(&format!("w{writer}-{index}")), "alerts", |_| async {
                        Err::<(), _>(VigilError::Broker("down".into()))
                    })
                    .await;
                if result.moved_to_dlq {
                    dead_lettered += 1;
                }
                tokio::task::yield_now().await;
            }
            dead_lettered
        }));
    }

    let manager = {
        let service = service.clone();
        let cleared = cleared.clone();
        tokio::spawn(async move {
            for round in 0..60 {
                match round % 4 {
                    0 | 1 => {
                        let _ = service.requeue_all().await;
                    }
                    2 => {
                        if let Some(entry) = service.list(0, 1).await.unwrap().first() {
                            let _ = service.move_entry(entry.id, "manual_review").await;
                        }
                    }
                    _ => {
                        cleared.fetch_add(service.clear().await.unwrap(), Ordering::SeqCst);
                    }
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let mut written = 0;
    for writer in writers {
        written += writer.await.unwrap();
    }
    manager.await.unwrap();

    assert_eq!(written, WRITERS * JOBS_PER_WRITER);
    let requeued: Vec<_> =
        queues.jobs("alerts").into_iter().chain(queues.jobs("manual_review")).collect();
    let unique: HashSet<_> = requeued.iter().map(|job| job.id).collect();
    assert_eq!(unique.len(), requeued.len());
    assert_eq!(dlq.len() + requeued.len() + cleared.load(Ordering::SeqCst), written);
}
