//! # Vigil Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - In-process pub/sub, job queue and dead-letter store
//! - The JSON-lines disk store behind durable fallback queues
//! - Configuration loading, tracing setup and the metrics sink
//! - [`RealtimeRuntime`], the composition root
//!
//! ## Architecture
//! - Implements traits defined in `vigil-core`
//! - Contains all "impure" code (I/O, global subscribers)

pub mod config;
pub mod dlq;
pub mod fallback;
pub mod observability;
pub mod pubsub;
pub mod queue;
pub mod runtime;

// Re-export commonly used items
pub use dlq::InMemoryDlqStore;
pub use fallback::FileFallbackStore;
pub use observability::{init_tracing, TracingSink};
pub use pubsub::InMemoryPubSub;
pub use queue::InMemoryJobQueue;
pub use runtime::RealtimeRuntime;
