//! Port interfaces implemented by infrastructure adapters

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use uuid::Uuid;
use vigil_domain::{DlqStats, JobFailure, QueuedJob, Result};

/* -------------------------------------------------------------------------- */
/* Pub/sub */
/* -------------------------------------------------------------------------- */

/// Publish/subscribe primitive used for realtime events
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a message, returning how many subscribers received it
    async fn publish(&self, channel: &str, message: &str) -> Result<usize>;

    /// Subscribe to a channel
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>>;

    /// Check broker connectivity
    async fn ping(&self) -> Result<()>;
}

/// An active channel subscription
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message; `Ok(None)` once the channel is closed
    async fn next_message(&mut self) -> Result<Option<String>>;

    /// Release the subscription
    async fn unsubscribe(&mut self) -> Result<()>;
}

/* -------------------------------------------------------------------------- */
/* Job queues */
/* -------------------------------------------------------------------------- */

/// Primary job broker
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, queue: &str, job: QueuedJob) -> Result<()>;

    async fn depth(&self, queue: &str) -> Result<usize>;

    /// Depth of every known queue
    async fn depths(&self) -> Result<BTreeMap<String, usize>>;

    async fn health_check(&self) -> Result<()>;
}

/// Durable store for dead-lettered jobs
///
/// Every method is a single atomic operation so concurrent writers and
/// management calls never lose an entry.
#[async_trait]
pub trait DlqStore: Send + Sync {
    /// Append a failure as the newest entry
    async fn push(&self, failure: JobFailure) -> Result<()>;

    /// Oldest entry, left in place
    async fn oldest(&self) -> Result<Option<JobFailure>>;

    async fn get(&self, id: Uuid) -> Result<Option<JobFailure>>;

    async fn remove(&self, id: Uuid) -> Result<Option<JobFailure>>;

    /// Oldest-first page of entries, without removing them
    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<JobFailure>>;

    async fn stats(&self) -> Result<DlqStats>;

    /// Remove everything, returning how many entries were dropped
    async fn clear(&self) -> Result<usize>;
}

/// Keyed list store backing the durable fallback queues
#[async_trait]
pub trait FallbackStore: Send + Sync {
    /// Append a job to the end of `queue`
    async fn push(&self, queue: &str, job: &QueuedJob) -> Result<()>;

    /// Remove and return up to `limit` of the oldest live jobs
    async fn take(&self, queue: &str, limit: usize) -> Result<Vec<QueuedJob>>;

    /// Put jobs back at the front of `queue`, keeping their order
    async fn restore(&self, queue: &str, jobs: Vec<QueuedJob>) -> Result<()>;

    async fn len(&self, queue: &str) -> Result<usize>;

    /// Names of queues that currently hold entries
    async fn queues(&self) -> Result<Vec<String>>;
}

/* -------------------------------------------------------------------------- */
/* Client connections */
/* -------------------------------------------------------------------------- */

/// A frame sent to a realtime client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    /// Gzip-compressed JSON
    Binary(Vec<u8>),
}

impl OutboundFrame {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outbound half of a realtime client connection
#[async_trait]
pub trait ClientConnection: Send + Sync {
    fn id(&self) -> &str;

    async fn send(&self, frame: OutboundFrame) -> Result<()>;
}

/* -------------------------------------------------------------------------- */
/* Health checks */
/* -------------------------------------------------------------------------- */

/// Health probe for a dependency registered with the degradation manager
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<()>;
}

/// Adapts an async closure into a [`HealthCheck`]
pub struct FnHealthCheck<F> {
    check: F,
}

impl<F> FnHealthCheck<F> {
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

impl<F> fmt::Debug for FnHealthCheck<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHealthCheck").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> HealthCheck for FnHealthCheck<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn check(&self) -> Result<()> {
        (self.check)().await
    }
}
