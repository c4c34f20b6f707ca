//! Common utility functions
//!
//! - **[`serde`]**: serialization helpers for durations
//! - **[`text`]**: character-safe truncation for diagnostic payloads

pub mod serde;
pub mod text;

pub use self::serde::{duration_millis, option_duration_millis};
pub use self::text::truncate_chars;
