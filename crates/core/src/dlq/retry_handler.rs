//! Retry handler with dead-letter escalation
//!
//! [`RetryHandler::with_retry`] runs an operation through a
//! [`RetryExecutor`]. When every attempt fails the job is written to the
//! dead-letter store together with diagnostics: the error kind, the formatted
//! error chain, transport status and body, the delays used and a snapshot of
//! queue depths.
//!
//! The DLQ write is guarded by its own circuit breaker. A write the breaker
//! refuses is lost; that path is logged at error level with
//! `data_loss = true`, counted in `vigil_dlq_jobs_lost_total` and recorded as
//! a critical `dlq.write_denied` event.

use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use vigil_common::observability::{
    EventRecorder, LogRecord, LogSeverity, MetricsCollector, NoOpEventRecorder, NoOpMetricsCollector,
};
use vigil_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, Clock, ResilienceError, RetryConfig, RetryExecutor,
    SystemClock,
};
use vigil_common::utils::truncate_chars;
use vigil_common::ErrorClassification;
use vigil_domain::constants::{DLQ_BREAKER_NAME, MAX_RESPONSE_BODY_CHARS, MAX_STACK_TRACE_CHARS};
use vigil_domain::{JobFailure, QueuedJob, Result, SystemSnapshot, VigilError};

use crate::ports::{DlqStore, JobQueue};

/// Outcome of [`RetryHandler::with_retry`]
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// First success, or the last error
    pub result: std::result::Result<T, E>,
    pub attempts: u32,
    pub delays: Vec<Duration>,
    /// Whether the failure record reached the dead-letter store
    pub moved_to_dlq: bool,
}

impl<T, E> RetryResult<T, E> {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&E> {
        self.result.as_ref().err()
    }
}

/// Retries jobs and dead-letters the ones that keep failing
pub struct RetryHandler<C: Clock = SystemClock> {
    executor: RetryExecutor,
    dlq: Arc<dyn DlqStore>,
    queues: Arc<dyn JobQueue>,
    dlq_breaker: Arc<CircuitBreaker<C>>,
    metrics: Arc<dyn MetricsCollector>,
    recorder: Arc<dyn EventRecorder>,
}

impl RetryHandler<SystemClock> {
    /// Create a handler with its own `dlq_overflow` breaker
    pub fn new(
        retry: RetryConfig,
        dlq_breaker: CircuitBreakerConfig,
        dlq: Arc<dyn DlqStore>,
        queues: Arc<dyn JobQueue>,
    ) -> Result<Self> {
        let breaker = CircuitBreaker::new(DLQ_BREAKER_NAME, dlq_breaker)
            .map_err(|e| VigilError::Config(e.to_string()))?;
        Self::with_breaker(retry, Arc::new(breaker), dlq, queues)
    }
}

impl<C: Clock> RetryHandler<C> {
    /// Create a handler around an existing DLQ breaker
    ///
    /// Sharing one breaker between handlers makes them trip together.
    pub fn with_breaker(
        retry: RetryConfig,
        dlq_breaker: Arc<CircuitBreaker<C>>,
        dlq: Arc<dyn DlqStore>,
        queues: Arc<dyn JobQueue>,
    ) -> Result<Self> {
        let executor = RetryExecutor::new(retry).map_err(|e| VigilError::Config(e.to_string()))?;
        Ok(Self {
            executor,
            dlq,
            queues,
            dlq_breaker,
            metrics: Arc::new(NoOpMetricsCollector),
            recorder: Arc::new(NoOpEventRecorder),
        })
    }

    pub fn with_observability(
        mut self,
        metrics: Arc<dyn MetricsCollector>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        self.metrics = metrics;
        self.recorder = recorder;
        self
    }

    pub fn dlq_breaker(&self) -> &Arc<CircuitBreaker<C>> {
        &self.dlq_breaker
    }

    /// Run `operation` with retries, dead-lettering `job` on exhaustion
    ///
    /// The operation receives the 1-based attempt number.
    #[instrument(skip(self, job, operation), fields(job_id = %job.id, job_type = %job.job_type))]
    pub async fn with_retry<F, Fut, T, E>(
        &self,
        job: &QueuedJob,
        source_queue: &str,
        mut operation: F,
    ) -> RetryResult<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: StdError + ErrorClassification + 'static,
    {
        let first_failed_at: Mutex<Option<DateTime<Utc>>> = Mutex::new(None);

        let outcome = self
            .executor
            .execute(|attempt| {
                let attempt_future = operation(attempt);
                let first_failed_at = &first_failed_at;
                async move {
                    let result = attempt_future.await;
                    if result.is_err() {
                        first_failed_at.lock().get_or_insert_with(Utc::now);
                    }
                    result
                }
            })
            .await;

        let moved_to_dlq = match &outcome.result {
            Ok(_) => false,
            Err(error) => {
                let now = Utc::now();
                let first_failed_at = first_failed_at.lock().unwrap_or(now);
                let failure = self
                    .build_failure(
                        job,
                        source_queue,
                        error,
                        outcome.attempts,
                        &outcome.delays,
                        first_failed_at,
                        now,
                    )
                    .await;
                self.write_failure(failure).await
            }
        };

        RetryResult {
            result: outcome.result,
            attempts: outcome.attempts,
            delays: outcome.delays,
            moved_to_dlq,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_failure<E>(
        &self,
        job: &QueuedJob,
        source_queue: &str,
        error: &E,
        attempts: u32,
        delays: &[Duration],
        first_failed_at: DateTime<Utc>,
        last_failed_at: DateTime<Utc>,
    ) -> JobFailure
    where
        E: StdError + ErrorClassification + 'static,
    {
        let transport = transport_error(error);

        JobFailure {
            id: Uuid::now_v7(),
            original_job: job.clone(),
            source_queue: source_queue.to_string(),
            error: error.to_string(),
            error_kind: error.error_kind().to_string(),
            attempt_count: attempts,
            first_failed_at,
            last_failed_at,
            stack_trace: Some(truncate_chars(&format_error_chain(error), MAX_STACK_TRACE_CHARS)),
            http_status: transport.and_then(VigilError::http_status),
            response_body: transport
                .and_then(VigilError::response_body)
                .map(|body| truncate_chars(body, MAX_RESPONSE_BODY_CHARS)),
            retry_delays_ms: delays
                .iter()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .collect(),
            system_snapshot: self.snapshot().await,
        }
    }

    async fn snapshot(&self) -> SystemSnapshot {
        let queue_depths = match self.queues.depths().await {
            Ok(depths) => depths,
            Err(e) => {
                warn!(error = %e, "Could not read queue depths for DLQ snapshot");
                Default::default()
            }
        };

        SystemSnapshot {
            queue_depths,
            dlq_breaker_state: self.dlq_breaker.state().as_str().to_string(),
            captured_at: Utc::now(),
        }
    }

    async fn write_failure(&self, failure: JobFailure) -> bool {
        let job_id = failure.original_job.id;
        let source_queue = failure.source_queue.clone();
        let error_kind = failure.error_kind.clone();
        let labels = [("source_queue", source_queue.as_str()), ("error_kind", error_kind.as_str())];

        match self.dlq_breaker.call(|| self.dlq.push(failure)).await {
            Ok(()) => {
                info!(%job_id, source_queue = %source_queue, error_kind = %error_kind, "Job moved to DLQ");
                self.metrics.increment_counter("vigil_dlq_jobs_total", &labels);
                true
            }
            Err(err) => {
                let (event, reason) = match &err {
                    ResilienceError::CircuitOpen(_) => ("dlq.write_denied", "dlq breaker open"),
                    _ => ("dlq.write_failed", "dlq store write failed"),
                };
                error!(
                    %job_id,
                    source_queue = %source_queue,
                    error_kind = %error_kind,
                    error = %err,
                    data_loss = true,
                    "Job permanently lost: {}",
                    reason
                );
                self.metrics.increment_counter("vigil_dlq_jobs_lost_total", &labels);
                self.recorder.record(
                    LogRecord::new(event, LogSeverity::Critical, "Job permanently lost")
                        .with_field("job_id", job_id.to_string())
                        .with_field("source_queue", source_queue.clone())
                        .with_field("error_kind", error_kind.clone())
                        .with_field("reason", err.to_string()),
                );
                false
            }
        }
    }
}

/// First `VigilError::Transport` in the error's source chain
fn transport_error<'a>(error: &'a (dyn StdError + 'static)) -> Option<&'a VigilError> {
    std::iter::successors(Some(error), |&e| e.source())
        .filter_map(|e| e.downcast_ref::<VigilError>())
        .find(|e| matches!(e, VigilError::Transport { .. }))
}

/// The error and each of its sources, one per line
fn format_error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut lines = vec![error.to_string()];
    lines.extend(
        std::iter::successors(error.source(), |&e| e.source()).map(|cause| format!("caused by: {}", cause)),
    );
    lines.join("\n")
}
