//! Fallback queues used while the primary broker is impaired
//!
//! Jobs go to a bounded in-memory ring per queue first. When a ring is full
//! they spill to the durable store if one is configured, and only then does
//! the [`OverflowPolicy`] apply. Draining moves jobs back to the primary
//! broker oldest-first, memory before disk, and stops at the first failure
//! with the remainder left in place.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vigil_common::observability::{MetricsCollector, NoOpMetricsCollector};
use vigil_common::RingBuffer;
use vigil_domain::{JobFailure, OverflowPolicy, QueuedJob, Result, SystemSnapshot, VigilError};

use crate::ports::{DlqStore, FallbackStore, JobQueue};

/// Where [`queue_with_fallback`](super::DegradationManager::queue_with_fallback) put a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuedVia {
    Primary,
    Memory,
    Disk,
    /// Fallback was full and the job was escalated to the DLQ
    DeadLetter,
}

/// Result of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub drained: usize,
    /// Entries still waiting after the pass
    pub remaining: usize,
    /// The pass stopped because the primary refused a job
    pub interrupted: bool,
}

/// Memory and durable fallback storage
pub struct FallbackQueues {
    capacity: usize,
    policy: OverflowPolicy,
    memory: Mutex<HashMap<String, RingBuffer<QueuedJob>>>,
    durable: Option<Arc<dyn FallbackStore>>,
    dlq: Option<Arc<dyn DlqStore>>,
    metrics: Arc<dyn MetricsCollector>,
}

impl FallbackQueues {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            memory: Mutex::new(HashMap::new()),
            durable: None,
            dlq: None,
            metrics: Arc::new(NoOpMetricsCollector),
        }
    }

    /// Spill full rings to a durable store
    pub fn with_durable(mut self, store: Arc<dyn FallbackStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Store used by [`OverflowPolicy::EscalateToDlq`]
    pub fn with_dlq(mut self, dlq: Arc<dyn DlqStore>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Hold a job the primary broker refused
    pub async fn store(&self, queue: &str, job: QueuedJob, reason: &VigilError) -> Result<QueuedVia> {
        let job = match self.push_if_room(queue, job) {
            None => return Ok(QueuedVia::Memory),
            Some(job) => job,
        };

        if let Some(durable) = &self.durable {
            match durable.push(queue, &job).await {
                Ok(()) => {
                    debug!(queue, job_id = %job.id, "Memory fallback full, spilled job to disk");
                    return Ok(QueuedVia::Disk);
                }
                Err(e) => warn!(queue, error = %e, "Durable fallback write failed"),
            }
        }

        self.apply_overflow(queue, job, reason).await
    }

    /// Push into the ring unless it is full, handing the job back if so
    fn push_if_room(&self, queue: &str, job: QueuedJob) -> Option<QueuedJob> {
        let mut memory = self.memory.lock();
        let ring = memory.entry(queue.to_string()).or_insert_with(|| RingBuffer::new(self.capacity));
        ring.try_push(job).err()
    }

    async fn apply_overflow(&self, queue: &str, job: QueuedJob, reason: &VigilError) -> Result<QueuedVia> {
        match (self.policy, &self.dlq) {
            (OverflowPolicy::DropOldest, _) => {
                let evicted = {
                    let mut memory = self.memory.lock();
                    let ring =
                        memory.entry(queue.to_string()).or_insert_with(|| RingBuffer::new(self.capacity));
                    ring.push(job)
                };
                if let Some(dropped) = evicted {
                    warn!(
                        queue,
                        dropped_job_id = %dropped.id,
                        capacity = self.capacity,
                        "Memory fallback full, dropped oldest job"
                    );
                    self.metrics.increment_counter("vigil_fallback_dropped_total", &[("queue", queue)]);
                }
                Ok(QueuedVia::Memory)
            }
            (OverflowPolicy::EscalateToDlq, Some(dlq)) => {
                let failure = self.overflow_failure(queue, job, reason);
                let job_id = failure.original_job.id;
                dlq.push(failure).await?;
                warn!(queue, %job_id, "Memory fallback full, escalated job to DLQ");
                self.metrics.increment_counter("vigil_fallback_escalated_total", &[("queue", queue)]);
                Ok(QueuedVia::DeadLetter)
            }
            (OverflowPolicy::RejectNew | OverflowPolicy::EscalateToDlq, _) => {
                warn!(queue, job_id = %job.id, "Memory fallback full, rejecting job");
                self.metrics.increment_counter("vigil_fallback_rejected_total", &[("queue", queue)]);
                Err(VigilError::ResourceExhausted(format!(
                    "fallback queue '{}' is full ({} jobs)",
                    queue, self.capacity
                )))
            }
        }
    }

    fn overflow_failure(&self, queue: &str, job: QueuedJob, reason: &VigilError) -> JobFailure {
        let now = Utc::now();
        JobFailure {
            id: Uuid::now_v7(),
            original_job: job,
            source_queue: queue.to_string(),
            error: format!("fallback queue full after primary failure: {}", reason),
            error_kind: "resource_exhausted".to_string(),
            attempt_count: 1,
            first_failed_at: now,
            last_failed_at: now,
            stack_trace: None,
            http_status: reason.http_status(),
            response_body: None,
            retry_delays_ms: Vec::new(),
            system_snapshot: SystemSnapshot {
                queue_depths: self.memory_depths(),
                dlq_breaker_state: "unknown".to_string(),
                captured_at: now,
            },
        }
    }

    fn memory_depths(&self) -> BTreeMap<String, usize> {
        self.memory
            .lock()
            .iter()
            .filter(|(_, ring)| !ring.is_empty())
            .map(|(name, ring)| (name.clone(), ring.len()))
            .collect()
    }

    /// Entries waiting per queue, memory and disk combined
    pub async fn depths(&self) -> BTreeMap<String, usize> {
        let mut depths = self.memory_depths();
        if let Some(durable) = &self.durable {
            match durable.queues().await {
                Ok(queues) => {
                    for queue in queues {
                        match durable.len(&queue).await {
                            Ok(0) => {}
                            Ok(len) => *depths.entry(queue).or_insert(0) += len,
                            Err(e) => warn!(queue = %queue, error = %e, "Could not read fallback depth"),
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Could not list durable fallback queues"),
            }
        }
        depths
    }

    /// Total entries waiting
    pub async fn total_depth(&self) -> usize {
        self.depths().await.values().sum()
    }

    /// Move up to `batch_size` jobs per queue back to the primary broker
    pub async fn drain_to(&self, primary: &dyn JobQueue, batch_size: usize) -> DrainReport {
        let mut report = DrainReport::default();
        let mut queues: BTreeSet<String> = self.memory.lock().keys().cloned().collect();
        if let Some(durable) = &self.durable {
            match durable.queues().await {
                Ok(names) => queues.extend(names),
                Err(e) => warn!(error = %e, "Could not list durable fallback queues"),
            }
        }

        for queue in &queues {
            let drained_memory = match self.drain_memory(queue, primary, batch_size).await {
                Ok(count) => count,
                Err(count) => {
                    report.drained += count;
                    report.interrupted = true;
                    break;
                }
            };
            report.drained += drained_memory;

            match self.drain_durable(queue, primary, batch_size.saturating_sub(drained_memory)).await {
                Ok(count) => report.drained += count,
                Err(count) => {
                    report.drained += count;
                    report.interrupted = true;
                    break;
                }
            }
        }

        report.remaining = self.total_depth().await;
        if report.drained > 0 {
            info!(
                drained = report.drained,
                remaining = report.remaining,
                interrupted = report.interrupted,
                "Drained fallback queues"
            );
            self.metrics.record_gauge("vigil_fallback_depth", report.remaining as f64, &[]);
        }
        report
    }

    /// `Err` carries the count drained before the primary refused a job
    async fn drain_memory(
        &self,
        queue: &str,
        primary: &dyn JobQueue,
        limit: usize,
    ) -> std::result::Result<usize, usize> {
        let mut drained = 0;
        while drained < limit {
            let Some(job) = self.memory.lock().get(queue).and_then(|ring| ring.front().cloned()) else {
                break;
            };
            let job_id = job.id;

            if let Err(e) = primary.enqueue(queue, job).await {
                warn!(queue, %job_id, error = %e, "Drain to primary failed, keeping remainder");
                return Err(drained);
            }

            let mut memory = self.memory.lock();
            if let Some(ring) = memory.get_mut(queue) {
                // A concurrent DropOldest push may already have evicted it
                if ring.front().is_some_and(|front| front.id == job_id) {
                    ring.pop();
                }
            }
            drained += 1;
        }
        Ok(drained)
    }

    async fn drain_durable(
        &self,
        queue: &str,
        primary: &dyn JobQueue,
        limit: usize,
    ) -> std::result::Result<usize, usize> {
        let Some(durable) = &self.durable else {
            return Ok(0);
        };
        if limit == 0 {
            return Ok(0);
        }

        let jobs = match durable.take(queue, limit).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(queue, error = %e, "Could not read durable fallback queue");
                return Ok(0);
            }
        };

        for (index, job) in jobs.iter().enumerate() {
            if let Err(e) = primary.enqueue(queue, job.clone()).await {
                warn!(queue, job_id = %job.id, error = %e, "Drain to primary failed, restoring remainder");
                let remainder = jobs[index..].to_vec();
                let lost = remainder.len();
                if let Err(restore_err) = durable.restore(queue, remainder).await {
                    error!(
                        queue,
                        lost,
                        error = %restore_err,
                        data_loss = true,
                        "Jobs permanently lost: durable fallback restore failed"
                    );
                    for _ in 0..lost {
                        self.metrics.increment_counter("vigil_fallback_jobs_lost_total", &[("queue", queue)]);
                    }
                }
                return Err(index);
            }
        }
        Ok(jobs.len())
    }
}
