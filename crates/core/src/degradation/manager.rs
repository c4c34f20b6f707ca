//! Degradation manager
//!
//! Tracks the health of registered dependencies, derives the global
//! [`DegradationMode`] after every check cycle and gates features through a
//! [`FeatureTable`]. Producers queue work through
//! [`queue_with_fallback`](DegradationManager::queue_with_fallback), which
//! falls back to [`FallbackQueues`] when the primary broker refuses a job.
//!
//! Two background tasks run between `start` and `stop`: the health-check loop
//! and the fallback drain loop. Health-check errors and timeouts count as
//! failures and never reach callers.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use vigil_common::observability::{
    EventRecorder, LogRecord, LogSeverity, MetricsCollector, NoOpEventRecorder, NoOpMetricsCollector,
};
use vigil_domain::{
    DegradationConfig, DegradationMode, DegradationStatus, QueuedJob, Result, ServiceHealth,
    VigilError,
};

use super::fallback::{DrainReport, FallbackQueues, QueuedVia};
use super::features::FeatureTable;
use crate::ports::{HealthCheck, JobQueue};
use crate::tasks::BackgroundTasks;

struct RegisteredService {
    health: ServiceHealth,
    check: Arc<dyn HealthCheck>,
}

/// System-wide degradation control
pub struct DegradationManager {
    config: DegradationConfig,
    services: Mutex<BTreeMap<String, RegisteredService>>,
    features: FeatureTable,
    mode_tx: watch::Sender<DegradationMode>,
    primary: Arc<dyn JobQueue>,
    fallback: FallbackQueues,
    /// Serializes drain passes
    draining: tokio::sync::Mutex<()>,
    tasks: Mutex<Option<BackgroundTasks>>,
    metrics: Arc<dyn MetricsCollector>,
    recorder: Arc<dyn EventRecorder>,
}

impl DegradationManager {
    pub fn new(config: DegradationConfig, primary: Arc<dyn JobQueue>, fallback: FallbackQueues) -> Self {
        let (mode_tx, _) = watch::channel(DegradationMode::Normal);
        Self {
            config,
            services: Mutex::new(BTreeMap::new()),
            features: FeatureTable::default(),
            mode_tx,
            primary,
            fallback,
            draining: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(None),
            metrics: Arc::new(NoOpMetricsCollector),
            recorder: Arc::new(NoOpEventRecorder),
        }
    }

    /// Replace the default feature table
    pub fn with_features(mut self, features: FeatureTable) -> Self {
        self.features = features;
        self
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

    /// Register a dependency; re-registering a name replaces its check and
    /// resets its history
    pub fn register(&self, name: impl Into<String>, check: Arc<dyn HealthCheck>, critical: bool) {
        let name = name.into();
        info!(service = %name, critical, "Registered dependency");
        self.services
            .lock()
            .insert(name.clone(), RegisteredService { health: ServiceHealth::new(name, critical), check });
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.services.lock().remove(name).is_some();
        if removed {
            self.recompute_mode();
        }
        removed
    }

    /// Clear a dependency's history after manual remediation
    pub fn reset_service(&self, name: &str) -> Result<()> {
        {
            let mut services = self.services.lock();
            let service = services
                .get_mut(name)
                .ok_or_else(|| VigilError::NotFound(format!("service '{}'", name)))?;
            service.health.reset();
        }
        self.recompute_mode();
        Ok(())
    }

    /// Run every registered check once and recompute the mode
    #[instrument(skip(self))]
    pub async fn run_health_checks(&self) -> DegradationMode {
        let checks: Vec<(String, Arc<dyn HealthCheck>)> = self
            .services
            .lock()
            .iter()
            .map(|(name, service)| (name.clone(), service.check.clone()))
            .collect();

        let timeout = self.config.check_timeout;
        let results = join_all(checks.into_iter().map(|(name, check)| async move {
            let result = match tokio::time::timeout(timeout, check.check()).await {
                Ok(result) => result,
                Err(_) => Err(VigilError::timeout(format!("{} health check", name), timeout)),
            };
            (name, result)
        }))
        .await;

        let now = Utc::now();
        {
            let mut services = self.services.lock();
            for (name, result) in results {
                // Unregistered while the check was running
                let Some(service) = services.get_mut(&name) else {
                    continue;
                };
                let was_unhealthy = service.health.is_unhealthy();
                match result {
                    Ok(()) => service.health.record_success(self.config.recovery_threshold, now),
                    Err(e) => {
                        debug!(service = %name, error = %e, "Health check failed");
                        service.health.record_failure(e.to_string(), self.config.failure_threshold, now);
                    }
                }
                match (was_unhealthy, service.health.is_unhealthy()) {
                    (false, true) => warn!(
                        service = %name,
                        critical = service.health.critical,
                        failures = service.health.consecutive_failures,
                        "Dependency marked unhealthy"
                    ),
                    (true, false) => info!(service = %name, "Dependency recovered"),
                    _ => {}
                }
            }
        }

        self.recompute_mode()
    }

    fn recompute_mode(&self) -> DegradationMode {
        let mode = DegradationMode::evaluate(self.services.lock().values().map(|s| &s.health));
        let previous = self.mode_tx.send_replace(mode);

        if previous != mode {
            let severity = match mode {
                DegradationMode::Normal => LogSeverity::Info,
                DegradationMode::Degraded => LogSeverity::Warning,
                DegradationMode::Minimal | DegradationMode::Offline => LogSeverity::Critical,
            };
            if mode > previous {
                error!(from = %previous, to = %mode, "Degradation mode worsened");
            } else {
                info!(from = %previous, to = %mode, "Degradation mode improved");
            }
            self.metrics.increment_counter(
                "vigil_degradation_transitions_total",
                &[("from", previous.as_str()), ("to", mode.as_str())],
            );
            self.recorder.record(
                LogRecord::new("degradation.mode_changed", severity, format!("{} -> {}", previous, mode))
                    .with_field("from", previous)
                    .with_field("to", mode),
            );
        }
        self.metrics.record_gauge(
            "vigil_degradation_mode",
            f64::from(mode as u8),
            &[],
        );
        mode
    }

    pub fn current_mode(&self) -> DegradationMode {
        *self.mode_tx.borrow()
    }

    /// Receiver notified on every mode change
    pub fn subscribe_mode(&self) -> watch::Receiver<DegradationMode> {
        self.mode_tx.subscribe()
    }

    pub fn available_features(&self) -> Vec<String> {
        self.features.features(self.current_mode())
    }

    pub fn is_feature_available(&self, feature: &str) -> bool {
        self.features.is_available(self.current_mode(), feature)
    }

    pub fn service_health(&self, name: &str) -> Option<ServiceHealth> {
        self.services.lock().get(name).map(|s| s.health.clone())
    }

    /// Full status snapshot
    pub async fn status(&self) -> DegradationStatus {
        let services = self.services.lock().values().map(|s| s.health.clone()).collect();
        let mode = self.current_mode();
        DegradationStatus {
            mode,
            services,
            available_features: self.features.features(mode),
            fallback_depths: self.fallback.depths().await,
            evaluated_at: Utc::now(),
        }
    }

    /// Enqueue on the primary broker, falling back when it refuses
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn queue_with_fallback(&self, queue: &str, job: QueuedJob) -> Result<QueuedVia> {
        match self.primary.enqueue(queue, job.clone()).await {
            Ok(()) => Ok(QueuedVia::Primary),
            Err(e) => {
                warn!(queue, error = %e, "Primary broker refused job, using fallback");
                self.metrics.increment_counter("vigil_fallback_queued_total", &[("queue", queue)]);
                self.fallback.store(queue, job, &e).await
            }
        }
    }

    pub fn fallback(&self) -> &FallbackQueues {
        &self.fallback
    }

    /// Drain fallback queues if the primary broker answers its health check
    pub async fn drain_fallback(&self) -> DrainReport {
        let _guard = self.draining.lock().await;

        let probe = tokio::time::timeout(self.config.check_timeout, self.primary.health_check()).await;
        if !matches!(probe, Ok(Ok(()))) {
            debug!("Primary broker not healthy, skipping fallback drain");
            return DrainReport {
                remaining: self.fallback.total_depth().await,
                interrupted: true,
                ..DrainReport::default()
            };
        }

        self.fallback.drain_to(self.primary.as_ref(), self.config.drain_batch_size).await
    }

    /// Spawn the health-check and drain loops
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.tasks.lock();
        if slot.is_some() {
            return Err(VigilError::Internal("Degradation manager already running".to_string()));
        }

        let mut tasks = BackgroundTasks::new();
        let manager = Arc::clone(self);
        tasks.spawn("health_checks", move |cancel| async move {
            manager.health_loop(cancel).await;
        });
        let manager = Arc::clone(self);
        tasks.spawn("fallback_drain", move |cancel| async move {
            manager.drain_loop(cancel).await;
        });

        info!(
            check_interval = ?self.config.check_interval,
            drain_interval = ?self.config.drain_interval,
            "Degradation manager started"
        );
        *slot = Some(tasks);
        Ok(())
    }

    /// Stop the background loops; a no-op when not running
    pub async fn stop(&self) -> Result<()> {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.shutdown(self.config.shutdown_timeout).await?;
            info!("Degradation manager stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    async fn health_loop(&self, cancel: CancellationToken) {
        loop {
            self.run_health_checks().await;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.check_interval) => {}
            }
        }
    }

    async fn drain_loop(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.drain_interval) => {
                    if self.fallback.total_depth().await > 0 {
                        self.drain_fallback().await;
                    }
                }
            }
        }
    }
}
