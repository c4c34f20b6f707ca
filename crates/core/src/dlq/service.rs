//! Dead-letter queue management
//!
//! Operational surface over a [`DlqStore`]: stats, paginated listing,
//! requeueing and clearing. Authorization belongs to the caller.
//!
//! A requeue enqueues a copy of the entry first and removes the entry only
//! after the enqueue succeeded, so a failed management call leaves the entry
//! where it was. Management calls are serialized with each other; new
//! failures written by the retry handler only ever append.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use vigil_domain::{DlqStats, JobFailure, Result, VigilError};

use crate::ports::{DlqStore, JobQueue};

/// Management operations for dead-lettered jobs
pub struct DeadLetterQueue {
    store: Arc<dyn DlqStore>,
    queues: Arc<dyn JobQueue>,
    requeue_all_limit: usize,
    management: Mutex<()>,
}

impl DeadLetterQueue {
    pub fn new(store: Arc<dyn DlqStore>, queues: Arc<dyn JobQueue>, requeue_all_limit: usize) -> Self {
        Self { store, queues, requeue_all_limit: requeue_all_limit.max(1), management: Mutex::new(()) }
    }

    /// Entry counts per source queue
    pub async fn stats(&self) -> Result<DlqStats> {
        self.store.stats().await
    }

    /// Oldest-first page of entries; `limit` is capped at 100
    pub async fn list(&self, offset: usize, limit: usize) -> Result<Vec<JobFailure>> {
        self.store.list(offset, limit.min(100)).await
    }

    /// Requeue the oldest entry to its source queue
    ///
    /// Returns the requeued entry, or `None` when the DLQ is empty.
    #[instrument(skip(self))]
    pub async fn requeue_oldest(&self) -> Result<Option<JobFailure>> {
        let _guard = self.management.lock().await;
        self.requeue_next().await
    }

    /// Requeue entries oldest-first, stopping at the configured limit
    ///
    /// Stops at the first failure; entries already requeued stay requeued.
    #[instrument(skip(self))]
    pub async fn requeue_all(&self) -> Result<usize> {
        let _guard = self.management.lock().await;
        let mut requeued = 0;
        while requeued < self.requeue_all_limit {
            match self.requeue_next().await {
                Ok(Some(_)) => requeued += 1,
                Ok(None) => break,
                Err(e) => {
                    warn!(requeued, error = %e, "Requeue-all stopped early");
                    if requeued == 0 {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        info!(requeued, limit = self.requeue_all_limit, "Requeued DLQ entries");
        Ok(requeued)
    }

    /// Move one entry to an arbitrary queue
    #[instrument(skip(self))]
    pub async fn move_entry(&self, id: Uuid, target_queue: &str) -> Result<JobFailure> {
        let _guard = self.management.lock().await;
        let entry = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| VigilError::NotFound(format!("DLQ entry {}", id)))?;
        self.send_back(entry, target_queue).await
    }

    /// Drop every entry
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.management.lock().await;
        let cleared = self.store.clear().await?;
        warn!(cleared, "DLQ cleared");
        Ok(cleared)
    }

    async fn requeue_next(&self) -> Result<Option<JobFailure>> {
        let Some(entry) = self.store.oldest().await? else {
            return Ok(None);
        };
        let target = entry.source_queue.clone();
        self.send_back(entry, &target).await.map(Some)
    }

    async fn send_back(&self, entry: JobFailure, target_queue: &str) -> Result<JobFailure> {
        let mut job = entry.original_job.clone();
        job.retry_count = job.retry_count.saturating_add(1);

        if let Err(e) = self.queues.enqueue(target_queue, job).await {
            warn!(entry_id = %entry.id, target_queue, error = %e, "Requeue failed, entry kept in DLQ");
            return Err(e);
        }

        match self.store.remove(entry.id).await {
            Ok(Some(_)) => {
                info!(entry_id = %entry.id, target_queue, "DLQ entry requeued");
                Ok(entry)
            }
            Ok(None) => {
                warn!(entry_id = %entry.id, target_queue, "DLQ entry vanished while being requeued");
                Ok(entry)
            }
            Err(e) => {
                // The job is queued again but its entry stays; a later requeue duplicates it
                error!(
                    entry_id = %entry.id,
                    target_queue,
                    error = %e,
                    "Requeued job could not be removed from the DLQ"
                );
                Err(e)
            }
        }
    }
}
