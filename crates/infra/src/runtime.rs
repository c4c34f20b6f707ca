//! Composition root
//!
//! Builds every component from one [`Config`] on the in-process adapters,
//! registers the broker, job queue and broadcaster with the degradation
//! manager, and owns start/stop for all background tasks.

use std::sync::Arc;

use tracing::{info, warn};
use vigil_common::observability::{EventRecorder, MetricsCollector};
use vigil_common::resilience::CircuitBreakerRegistry;
use vigil_core::ports::{DlqStore, FallbackStore, FnHealthCheck, JobQueue, PubSub};
use vigil_core::{
    BroadcasterHealthCheck, DeadLetterQueue, DegradationManager, EventBroadcaster, FallbackQueues,
    ProtocolHandler, QueuedVia, RetryHandler, SubscriptionManager,
};
use vigil_domain::constants::DLQ_BREAKER_NAME;
use vigil_domain::{Config, QueuedJob, Result, VigilError};

use crate::dlq::InMemoryDlqStore;
use crate::fallback::FileFallbackStore;
use crate::observability::TracingSink;
use crate::pubsub::InMemoryPubSub;
use crate::queue::InMemoryJobQueue;

/// Dependency names registered with the degradation manager
pub const BROKER_SERVICE: &str = "broker";
pub const JOB_QUEUE_SERVICE: &str = "job_queue";
pub const BROADCASTER_SERVICE: &str = "event_broadcaster";

pub struct RealtimeRuntime {
    config: Config,
    pubsub: Arc<InMemoryPubSub>,
    queue: Arc<InMemoryJobQueue>,
    dlq_store: Arc<InMemoryDlqStore>,
    breakers: CircuitBreakerRegistry,
    degradation: Arc<DegradationManager>,
    broadcaster: Arc<EventBroadcaster>,
    protocol: ProtocolHandler,
    retry: RetryHandler,
    dead_letters: DeadLetterQueue,
}

impl RealtimeRuntime {
    /// Build with [`TracingSink`] for metrics and structured records
    pub async fn build(config: Config) -> Result<Self> {
        let sink = Arc::new(TracingSink::new());
        Self::build_with_observability(config, sink.clone(), sink).await
    }

    /// Build with caller-supplied observability sinks
    ///
    /// # Errors
    /// Returns `VigilError::Config` for an invalid config and
    /// `VigilError::Storage` if the fallback directory cannot be created.
    pub async fn build_with_observability(
        config: Config,
        metrics: Arc<dyn MetricsCollector>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Result<Self> {
        config.validate()?;

        let pubsub = Arc::new(InMemoryPubSub::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let dlq_store = Arc::new(InMemoryDlqStore::new());
        let breakers = CircuitBreakerRegistry::new(metrics.clone());

        let mut fallback = FallbackQueues::new(
            config.degradation.memory_queue_capacity,
            config.degradation.overflow_policy,
        )
        .with_dlq(dlq_store.clone() as Arc<dyn DlqStore>)
        .with_metrics(metrics.clone());
        if let Some(dir) = &config.degradation.fallback_dir {
            let store = FileFallbackStore::open(dir, config.degradation.fallback_ttl).await?;
            fallback = fallback.with_durable(Arc::new(store) as Arc<dyn FallbackStore>);
        }

        let degradation = Arc::new(
            DegradationManager::new(config.degradation.clone(), queue.clone() as Arc<dyn JobQueue>, fallback)
                .with_observability(metrics.clone(), recorder.clone()),
        );

        let broadcaster = Arc::new(
            EventBroadcaster::new(
                config.broadcaster.clone(),
                pubsub.clone() as Arc<dyn PubSub>,
                Arc::new(SubscriptionManager::new()),
            )?
            .with_observability(metrics.clone(), recorder.clone()),
        );
        let protocol = ProtocolHandler::new(Arc::clone(&broadcaster));

        let dlq_breaker = breakers
            .get_or_create(DLQ_BREAKER_NAME, config.dlq.breaker.clone())
            .map_err(|e| VigilError::Config(format!("dlq.breaker: {}", e)))?;
        let retry = RetryHandler::with_breaker(
            config.retry.clone(),
            dlq_breaker,
            dlq_store.clone() as Arc<dyn DlqStore>,
            queue.clone() as Arc<dyn JobQueue>,
        )?
        .with_observability(metrics, recorder);
        let dead_letters = DeadLetterQueue::new(
            dlq_store.clone() as Arc<dyn DlqStore>,
            queue.clone() as Arc<dyn JobQueue>,
            config.dlq.requeue_all_limit,
        );

        let runtime = Self {
            config,
            pubsub,
            queue,
            dlq_store,
            breakers,
            degradation,
            broadcaster,
            protocol,
            retry,
            dead_letters,
        };
        runtime.register_dependencies();
        Ok(runtime)
    }

    fn register_dependencies(&self) {
        let pubsub = Arc::clone(&self.pubsub);
        self.degradation.register(
            BROKER_SERVICE,
            Arc::new(FnHealthCheck::new(move || {
                let pubsub = Arc::clone(&pubsub);
                async move { pubsub.ping().await }
            })),
            true,
        );

        let queue = Arc::clone(&self.queue);
        self.degradation.register(
            JOB_QUEUE_SERVICE,
            Arc::new(FnHealthCheck::new(move || {
                let queue = Arc::clone(&queue);
                async move { queue.health_check().await }
            })),
            true,
        );

        self.degradation.register(
            BROADCASTER_SERVICE,
            Arc::new(BroadcasterHealthCheck::new(Arc::clone(&self.broadcaster))),
            false,
        );
    }

    /// Start the degradation loops and the event listener
    pub async fn start(&self) -> Result<()> {
        self.degradation.start()?;
        if let Err(e) = self.broadcaster.start().await {
            warn!(error = %e, "Event broadcaster failed to start");
            self.degradation.stop().await?;
            return Err(e);
        }
        info!(channel = %self.config.broadcaster.channel, "Realtime runtime started");
        Ok(())
    }

    /// Stop every background task, reporting the first failure
    pub async fn stop(&self) -> Result<()> {
        let broadcaster = self.broadcaster.stop().await;
        let degradation = self.degradation.stop().await;
        info!("Realtime runtime stopped");
        broadcaster.and(degradation)
    }

    /// Enqueue on the primary broker or its fallback
    pub async fn submit(&self, queue: &str, job: QueuedJob) -> Result<QueuedVia> {
        self.degradation.queue_with_fallback(queue, job).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pubsub(&self) -> &Arc<InMemoryPubSub> {
        &self.pubsub
    }

    pub fn job_queue(&self) -> &Arc<InMemoryJobQueue> {
        &self.queue
    }

    pub fn dlq_store(&self) -> &Arc<InMemoryDlqStore> {
        &self.dlq_store
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn degradation(&self) -> &Arc<DegradationManager> {
        &self.degradation
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    pub fn protocol(&self) -> &ProtocolHandler {
        &self.protocol
    }

    pub fn retry_handler(&self) -> &RetryHandler {
        &self.retry
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }
}
