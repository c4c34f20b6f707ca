//! Pub/sub adapters

pub mod memory;

pub use memory::InMemoryPubSub;
