//! Job queue adapters

pub mod memory;

pub use memory::InMemoryJobQueue;
