//! Realtime delivery
//!
//! - **[`subscriptions`]**: per-connection interest patterns
//! - **[`replay`]**: sequencing, the replay ring and client acks
//! - **[`broadcaster`]**: listener, supervisor, heartbeat and fan-out
//! - **[`protocol`]**: client message handling
//! - **[`health`]**: broadcaster health check for the degradation manager

pub mod broadcaster;
pub mod health;
pub mod protocol;
pub mod replay;
pub mod subscriptions;

pub use broadcaster::EventBroadcaster;
pub use health::BroadcasterHealthCheck;
pub use protocol::ProtocolHandler;
pub use replay::{AckTracker, ReplayBuffer};
pub use subscriptions::{GlobPattern, SubscriptionManager};
