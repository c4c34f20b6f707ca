//! Degradation management
//!
//! - **[`manager`]**: health checks, mode computation and queue-with-fallback
//! - **[`features`]**: mode to available-feature table
//! - **[`fallback`]**: memory ring and durable fallback queues

pub mod fallback;
pub mod features;
pub mod manager;

pub use fallback::{DrainReport, FallbackQueues, QueuedVia};
pub use features::FeatureTable;
pub use manager::DegradationManager;
