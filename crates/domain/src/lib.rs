//! # Vigil Domain
//!
//! Domain types shared by the resilience and realtime-delivery core.
//!
//! This crate contains:
//! - Domain error type ([`VigilError`]) and `Result` alias
//! - Job, dead-letter, health, event, and client-protocol types
//! - Configuration structures with their defaults
//! - Domain constants
//!
//! ## Architecture
//! - Depends only on `vigil-common` for error classification and the
//!   serde-ready resilience configs
//! - No I/O, no background tasks

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
