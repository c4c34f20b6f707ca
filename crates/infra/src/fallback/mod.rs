//! Durable fallback storage

pub mod file;

pub use file::FileFallbackStore;
