//! Retry handling and dead-letter queue management
//!
//! - **[`retry_handler`]**: bounded exponential backoff around a job, with
//!   escalation to the dead-letter store on exhaustion
//! - **[`service`]**: operational surface over the dead-letter store

pub mod retry_handler;
pub mod service;

pub use retry_handler::{RetryHandler, RetryResult};
pub use service::DeadLetterQueue;
