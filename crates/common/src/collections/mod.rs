//! Specialized data structures
//!
//! - **[`ring_buffer`]**: fixed-capacity FIFO used by the replay buffer and
//!   the in-memory fallback queues

pub mod ring_buffer;

pub use ring_buffer::RingBuffer;
