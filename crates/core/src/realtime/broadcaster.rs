//! Event broadcaster
//!
//! Single subscriber to the pub/sub channel. Every message gets the next
//! sequence number, goes into the replay ring and is fanned out to the
//! connections whose subscriptions match.
//!
//! ## Tasks
//!
//! - **listener**: reads the subscription; dies on a broker error or when the
//!   channel closes
//! - **supervisor**: polls the listener and restarts it. Once restarts exceed
//!   `max_recovery_attempts` the broadcaster is degraded: it stops listening,
//!   sends one `service_status` notice to connected clients and keeps
//!   accepting connections
//! - **heartbeat**: sends `{"type":"ping","lastSeq":n}` to every connection
//!
//! The listener path runs through its own circuit breaker. Publishing through
//! [`broadcast_event`](EventBroadcaster::broadcast_event) uses a separate
//! retry policy.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use vigil_common::compression::{EncodedPayload, PayloadCompressor};
use vigil_common::observability::{
    EventRecorder, LogRecord, LogSeverity, MetricsCollector, NoOpEventRecorder, NoOpMetricsCollector,
};
use vigil_common::resilience::{CircuitBreaker, CircuitState, RetryExecutor, TokioClock};
use vigil_common::ErrorClassification;
use vigil_domain::constants::LISTENER_BREAKER_NAME;
use vigil_domain::{
    BroadcasterConfig, BufferedMessage, EventEnvelope, Result, ServerMessage, VigilError,
};

use super::replay::{AckTracker, ReplayBuffer};
use super::subscriptions::{GlobPattern, SubscriptionManager};
use crate::ports::{ClientConnection, OutboundFrame, PubSub, Subscription};
use crate::tasks::BackgroundTasks;

const DEGRADED_NOTICE: &str =
    "Realtime delivery is unavailable. The connection stays open; poll for updates until service resumes.";

struct ListenerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    /// Set once the listener has consumed a message or outlived a
    /// supervisor poll; only then does the breaker count a success
    confirmed: Arc<AtomicBool>,
}

/// Realtime delivery engine
pub struct EventBroadcaster {
    config: BroadcasterConfig,
    pubsub: Arc<dyn PubSub>,
    subscriptions: Arc<SubscriptionManager>,
    replay: ReplayBuffer,
    acks: AckTracker,
    connections: DashMap<String, Arc<dyn ClientConnection>>,
    ack_patterns: Vec<GlobPattern>,
    compressor: PayloadCompressor,
    listener_breaker: CircuitBreaker<TokioClock>,
    publish_retry: RetryExecutor,
    listener: parking_lot::Mutex<Option<ListenerHandle>>,
    /// Supervisor and heartbeat; the async lock serializes start and stop
    tasks: tokio::sync::Mutex<Option<BackgroundTasks>>,
    degraded: AtomicBool,
    recovery_attempts: AtomicU32,
    metrics: Arc<dyn MetricsCollector>,
    recorder: Arc<dyn EventRecorder>,
}

impl EventBroadcaster {
    pub fn new(
        config: BroadcasterConfig,
        pubsub: Arc<dyn PubSub>,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Result<Self> {
        let ack_patterns = config
            .ack_required_patterns
            .iter()
            .map(|p| GlobPattern::new(p))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| VigilError::Config(format!("ack_required_patterns: {}", e)))?;
        let listener_breaker =
            CircuitBreaker::with_clock(LISTENER_BREAKER_NAME, config.listener_breaker.clone(), TokioClock)
                .map_err(|e| VigilError::Config(e.to_string()))?;
        let publish_retry = RetryExecutor::new(config.publish_retry.clone())
            .map_err(|e| VigilError::Config(e.to_string()))?;

        Ok(Self {
            replay: ReplayBuffer::new(config.replay_capacity),
            compressor: PayloadCompressor::gzip(config.compression_threshold),
            config,
            pubsub,
            subscriptions,
            acks: AckTracker::new(),
            connections: DashMap::new(),
            ack_patterns,
            listener_breaker,
            publish_retry,
            listener: parking_lot::Mutex::new(None),
            tasks: tokio::sync::Mutex::new(None),
            degraded: AtomicBool::new(false),
            recovery_attempts: AtomicU32::new(0),
            metrics: Arc::new(NoOpMetricsCollector),
            recorder: Arc::new(NoOpEventRecorder),
        })
    }

    pub fn with_observability(
        self,
        metrics: Arc<dyn MetricsCollector>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            listener_breaker: self.listener_breaker.with_metrics(metrics.clone()),
            metrics,
            recorder,
            ..self
        }
    }

    //==========================================================================
    // Lifecycle
    //==========================================================================

    /// Subscribe to the channel and spawn the listener, supervisor and
    /// heartbeat tasks
    #[instrument(skip(self), fields(channel = %self.config.channel))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut tasks_slot = self.tasks.lock().await;
        if tasks_slot.is_some() {
            return Err(VigilError::Internal("Event broadcaster already running".to_string()));
        }

        self.degraded.store(false, Ordering::SeqCst);
        self.recovery_attempts.store(0, Ordering::SeqCst);
        self.spawn_listener().await?;

        let mut tasks = BackgroundTasks::new();
        let broadcaster = Arc::clone(self);
        tasks.spawn("broadcaster_supervisor", move |cancel| broadcaster.supervise(cancel));
        if let Some(interval) = self.config.heartbeat_interval {
            let broadcaster = Arc::clone(self);
            tasks.spawn("broadcaster_heartbeat", move |cancel| async move {
                broadcaster.heartbeat_loop(interval, cancel).await;
            });
        }
        *tasks_slot = Some(tasks);

        info!("Event broadcaster started");
        Ok(())
    }

    /// Cancel every task, unsubscribe and wait for shutdown; idempotent
    pub async fn stop(&self) -> Result<()> {
        let mut tasks_slot = self.tasks.lock().await;
        let Some(tasks) = tasks_slot.take() else {
            return Ok(());
        };

        // Supervisor first so it cannot restart the listener
        let supervisor_result = tasks.shutdown(self.config.shutdown_timeout).await;
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.cancel.cancel();
            match tokio::time::timeout(self.config.shutdown_timeout, listener.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Event listener ended abnormally"),
                Err(_) => {
                    return Err(VigilError::timeout("event listener shutdown", self.config.shutdown_timeout))
                }
            }
        }

        info!("Event broadcaster stopped");
        supervisor_result
    }

    /// Subscribe and spawn a listener task
    ///
    /// A successful subscribe is not a success for the listener breaker; the
    /// outcome is recorded when the listener proves itself or dies.
    async fn spawn_listener(self: &Arc<Self>) -> Result<()> {
        self.listener_breaker.allow_call()?;
        let subscription = match self.pubsub.subscribe(&self.config.channel).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.listener_breaker.record_failure();
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let confirmed = Arc::new(AtomicBool::new(false));
        let broadcaster = Arc::clone(self);
        let token = cancel.clone();
        let flag = Arc::clone(&confirmed);
        let handle = tokio::spawn(async move {
            broadcaster.listen(subscription, token, flag).await;
        });

        if let Some(previous) =
            self.listener.lock().replace(ListenerHandle { cancel, handle, confirmed })
        {
            previous.cancel.cancel();
        }
        debug!(channel = %self.config.channel, "Event listener spawned");
        Ok(())
    }

    async fn listen(
        &self,
        mut subscription: Box<dyn Subscription>,
        cancel: CancellationToken,
        confirmed: Arc<AtomicBool>,
    ) {
        info!(channel = %self.config.channel, "Event listener running");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    // Cancelled without failing; release any probe slot
                    self.confirm_listener(&confirmed);
                    break;
                }
                message = subscription.next_message() => match message {
                    Ok(Some(raw)) => {
                        self.confirm_listener(&confirmed);
                        self.handle_message(&raw).await;
                    }
                    Ok(None) => {
                        warn!(channel = %self.config.channel, "Pub/sub channel closed, listener exiting");
                        self.listener_breaker.record_failure();
                        break;
                    }
                    Err(e) => {
                        error!(channel = %self.config.channel, error = %e, "Pub/sub receive failed, listener exiting");
                        self.listener_breaker.record_failure();
                        break;
                    }
                },
            }
        }

        if let Err(e) = subscription.unsubscribe().await {
            warn!(error = %e, "Failed to unsubscribe event listener");
        }
    }

    fn confirm_listener(&self, confirmed: &AtomicBool) {
        if !confirmed.swap(true, Ordering::SeqCst) {
            self.listener_breaker.record_success();
        }
    }

    async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.supervisor_interval) => {}
            }

            if self.is_degraded() {
                break;
            }
            if self.listener_running() {
                let confirmed =
                    self.listener.lock().as_ref().map(|listener| Arc::clone(&listener.confirmed));
                if let Some(confirmed) = confirmed {
                    self.confirm_listener(&confirmed);
                }
                self.recovery_attempts.store(0, Ordering::SeqCst);
                continue;
            }

            let attempt = self.recovery_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > self.config.max_recovery_attempts {
                self.enter_degraded(attempt - 1).await;
                break;
            }

            warn!(attempt, max = self.config.max_recovery_attempts, "Event listener down, restarting");
            self.metrics.increment_counter("vigil_broadcaster_restarts_total", &[]);
            match self.spawn_listener().await {
                Ok(()) => info!(attempt, "Event listener restarted"),
                Err(e) => warn!(attempt, error = %e, "Event listener restart failed"),
            }
        }
    }

    async fn enter_degraded(&self, attempts: u32) {
        if self.degraded.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.cancel.cancel();
        }

        error!(attempts, "Event listener recovery exhausted, broadcaster degraded");
        self.metrics.record_gauge("vigil_broadcaster_degraded", 1.0, &[]);
        self.recorder.record(
            LogRecord::new("broadcaster.degraded", LogSeverity::Critical, "Realtime delivery stopped")
                .with_field("channel", &self.config.channel)
                .with_field("recovery_attempts", attempts),
        );

        let notice = ServerMessage::ServiceStatus {
            status: "degraded".to_string(),
            message: DEGRADED_NOTICE.to_string(),
        };
        match notice.to_json() {
            Ok(text) => {
                let notified = self.send_to_all(self.all_connections(), OutboundFrame::Text(text)).await;
                info!(notified, "Sent degraded notice to connected clients");
            }
            Err(e) => error!(error = %e, "Failed to encode degraded notice"),
        }
    }

    async fn heartbeat_loop(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.send_heartbeat().await;
                }
            }
        }
    }

    /// Ping every connection with the latest sequence number
    pub async fn send_heartbeat(&self) -> usize {
        let ping = ServerMessage::Ping { last_seq: self.replay.last_sequence() };
        match ping.to_json() {
            Ok(text) => self.send_to_all(self.all_connections(), OutboundFrame::Text(text)).await,
            Err(e) => {
                error!(error = %e, "Failed to encode heartbeat");
                0
            }
        }
    }

    //==========================================================================
    // Delivery
    //==========================================================================

    /// Sequence, buffer and fan out one raw pub/sub message
    ///
    /// Returns how many connections received it. Malformed messages are
    /// logged and skipped.
    pub async fn handle_message(&self, raw: &str) -> usize {
        let envelope = match EventEnvelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping malformed pub/sub message");
                self.metrics.increment_counter("vigil_events_invalid_total", &[]);
                return 0;
            }
        };

        let requires_ack = self.ack_patterns.iter().any(|p| p.matches(&envelope.event_type));
        let message = self.replay.append(envelope, requires_ack);
        self.metrics.increment_counter("vigil_events_received_total", &[("type", message.event_type.as_str())]);
        self.deliver(&message).await
    }

    async fn deliver(&self, message: &BufferedMessage) -> usize {
        let recipients = self.subscriptions.get_recipients(&message.event_type);
        let targets: Vec<Arc<dyn ClientConnection>> = recipients
            .iter()
            .filter_map(|id| self.connections.get(id).map(|entry| Arc::clone(entry.value())))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let frame = match self.encode(&message.to_wire(false)) {
            Ok(frame) => frame,
            Err(e) => {
                error!(sequence = message.sequence, error = %e, "Failed to encode event");
                return 0;
            }
        };

        let delivered = self.send_to_all(targets, frame).await;
        debug!(sequence = message.sequence, event_type = %message.event_type, delivered, "Event delivered");
        delivered
    }

    /// Text below the compression threshold, gzip binary above it
    fn encode(&self, wire: &Value) -> Result<OutboundFrame> {
        let text = wire.to_string();
        Ok(match self.compressor.encode(text.as_bytes())? {
            EncodedPayload::Plain(_) => OutboundFrame::Text(text),
            EncodedPayload::Compressed(bytes) => OutboundFrame::Binary(bytes),
        })
    }

    fn all_connections(&self) -> Vec<Arc<dyn ClientConnection>> {
        self.connections.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Send concurrently; connections whose send fails are removed
    async fn send_to_all(&self, targets: Vec<Arc<dyn ClientConnection>>, frame: OutboundFrame) -> usize {
        let timeout = self.config.send_timeout;
        let results = join_all(targets.into_iter().map(|connection| {
            let frame = frame.clone();
            async move {
                let result = match tokio::time::timeout(timeout, connection.send(frame)).await {
                    Ok(result) => result,
                    Err(_) => Err(VigilError::timeout("client send", timeout)),
                };
                (connection.id().to_string(), result)
            }
        }))
        .await;

        let mut delivered = 0;
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Send failed, removing connection");
                    self.metrics.increment_counter("vigil_connections_dropped_total", &[]);
                    self.remove_connection(&id);
                }
            }
        }
        delivered
    }

    /// Send one frame to a registered connection, removing it on failure
    pub async fn send_to(&self, connection_id: &str, frame: OutboundFrame) -> Result<()> {
        let connection = self
            .connections
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| VigilError::NotFound(format!("connection '{}'", connection_id)))?;

        if self.send_to_all(vec![connection], frame).await == 1 {
            Ok(())
        } else {
            Err(VigilError::Connection(format!("send to '{}' failed", connection_id)))
        }
    }

    /// Validate and publish an event, returning the subscriber count
    ///
    /// Retryable publish failures are retried with backoff.
    #[instrument(skip(self, payload))]
    pub async fn broadcast_event(&self, payload: &Value) -> Result<usize> {
        let envelope = EventEnvelope::validate_outbound(payload)?;
        let message = envelope.to_pubsub();
        let channel = self.config.channel.as_str();

        let outcome = self
            .publish_retry
            .execute_if(|_| self.pubsub.publish(channel, &message), |e: &VigilError| e.is_retryable())
            .await;

        match outcome.result {
            Ok(subscribers) => {
                debug!(event_type = %envelope.event_type, subscribers, attempts = outcome.attempts, "Event published");
                Ok(subscribers)
            }
            Err(e) => {
                error!(event_type = %envelope.event_type, attempts = outcome.attempts, error = %e, "Event publish failed");
                self.metrics.increment_counter("vigil_publish_failures_total", &[("type", envelope.event_type.as_str())]);
                Err(e)
            }
        }
    }

    //==========================================================================
    // Replay and acks
    //==========================================================================

    /// Wire-form messages with `sequence > last_sequence`, ascending
    pub fn get_messages_since(&self, last_sequence: u64, mark_as_replay: bool) -> Vec<Value> {
        self.replay.messages_since(last_sequence).iter().map(|m| m.to_wire(mark_as_replay)).collect()
    }

    /// Record a client ack; lower or unknown sequences are ignored
    pub fn record_ack(&self, connection_id: &str, sequence: u64) -> bool {
        if sequence > self.replay.last_sequence() {
            debug!(connection_id, sequence, "Ignoring ack beyond last sequence");
            return false;
        }
        self.acks.record(connection_id, sequence)
    }

    pub fn last_acked(&self, connection_id: &str) -> Option<u64> {
        self.acks.last_acked(connection_id)
    }

    pub fn last_sequence(&self) -> u64 {
        self.replay.last_sequence()
    }

    pub fn replay(&self) -> &ReplayBuffer {
        &self.replay
    }

    //==========================================================================
    // Connections
    //==========================================================================

    /// Accept a connection; allowed in every state, degraded included
    pub fn register_connection(&self, connection: Arc<dyn ClientConnection>) {
        let id = connection.id().to_string();
        self.subscriptions.register_connection(&id);
        self.connections.insert(id.clone(), connection);
        debug!(connection_id = %id, "Connection registered");
        self.metrics.record_gauge("vigil_connections_active", self.connections.len() as f64, &[]);
    }

    pub fn remove_connection(&self, connection_id: &str) -> bool {
        let removed = self.connections.remove(connection_id).is_some();
        self.subscriptions.remove_connection(connection_id);
        self.acks.remove(connection_id);
        if removed {
            debug!(connection_id, "Connection removed");
            self.metrics.record_gauge("vigil_connections_active", self.connections.len() as f64, &[]);
        }
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    //==========================================================================
    // Health
    //==========================================================================

    fn listener_running(&self) -> bool {
        self.listener.lock().as_ref().is_some_and(|listener| !listener.handle.is_finished())
    }

    /// Listener alive, breaker not open, and not degraded
    pub fn is_listener_healthy(&self) -> bool {
        !self.is_degraded()
            && self.listener_running()
            && self.listener_breaker.state() != CircuitState::Open
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.recovery_attempts.load(Ordering::SeqCst)
    }

    pub fn listener_breaker(&self) -> &CircuitBreaker<TokioClock> {
        &self.listener_breaker
    }
}
