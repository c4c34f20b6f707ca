//! Dead-letter store adapters

pub mod memory;

pub use memory::InMemoryDlqStore;
