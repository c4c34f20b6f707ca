//! In-process job broker
//!
//! FIFO queues keyed by name. Availability can be switched off to exercise
//! fallback queueing without a real broker.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use vigil_core::ports::JobQueue;
use vigil_domain::{QueuedJob, Result, VigilError};

pub struct InMemoryJobQueue {
    queues: Mutex<BTreeMap<String, VecDeque<QueuedJob>>>,
    available: AtomicBool,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self { queues: Mutex::new(BTreeMap::new()), available: AtomicBool::new(true) }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Take the oldest job from `queue`
    pub fn dequeue(&self, queue: &str) -> Option<QueuedJob> {
        self.queues.lock().get_mut(queue).and_then(VecDeque::pop_front)
    }

    /// Copy of every job waiting in `queue`, oldest first
    pub fn snapshot(&self, queue: &str) -> Vec<QueuedJob> {
        self.queues.lock().get(queue).map(|jobs| jobs.iter().cloned().collect()).unwrap_or_default()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VigilError::Broker("job broker unavailable".to_string()))
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, queue: &str, job: QueuedJob) -> Result<()> {
        self.ensure_available()?;
        debug!(queue, job_id = %job.id, "Job enqueued");
        self.queues.lock().entry(queue.to_string()).or_default().push_back(job);
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<usize> {
        self.ensure_available()?;
        Ok(self.queues.lock().get(queue).map_or(0, VecDeque::len))
    }

    async fn depths(&self) -> Result<BTreeMap<String, usize>> {
        self.ensure_available()?;
        Ok(self.queues.lock().iter().map(|(name, jobs)| (name.clone(), jobs.len())).collect())
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_available()
    }
}
