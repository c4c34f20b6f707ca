//! # Vigil Core
//!
//! Resilience and realtime-delivery logic, free of concrete infrastructure.
//!
//! This crate contains:
//! - Port interfaces (traits) for the broker, job queue, dead-letter store,
//!   fallback store and client connections
//! - Retry handling with dead-letter escalation and DLQ management
//! - The degradation manager with fallback queueing
//! - Subscription filtering, replay buffering and the event broadcaster
//!
//! ## Architecture Principles
//! - Depends only on `vigil-common` and `vigil-domain`
//! - All external dependencies via traits
//! - Background tasks are owned by their component and stopped explicitly

pub mod degradation;
pub mod dlq;
pub mod ports;
pub mod realtime;
pub mod tasks;

pub use degradation::{DegradationManager, FallbackQueues, FeatureTable, QueuedVia};
pub use dlq::{DeadLetterQueue, RetryHandler, RetryResult};
pub use ports::{
    ClientConnection, DlqStore, FallbackStore, FnHealthCheck, HealthCheck, JobQueue, OutboundFrame,
    PubSub, Subscription,
};
pub use realtime::{
    AckTracker, BroadcasterHealthCheck, EventBroadcaster, GlobPattern, ProtocolHandler,
    ReplayBuffer, SubscriptionManager,
};
pub use tasks::BackgroundTasks;
