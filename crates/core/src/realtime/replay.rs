//! Sequencing, replay buffering and ack tracking
//!
//! Sequence assignment and the ring append happen under the same lock, so the
//! ring is always in strictly increasing sequence order.

use std::collections::HashMap;

use parking_lot::Mutex;
use vigil_common::RingBuffer;
use vigil_domain::{BufferedMessage, ClientAck, EventEnvelope};

struct ReplayState {
    ring: RingBuffer<BufferedMessage>,
    last_sequence: u64,
}

/// Fixed-capacity ring of recently delivered messages
pub struct ReplayBuffer {
    state: Mutex<ReplayState>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { state: Mutex::new(ReplayState { ring: RingBuffer::new(capacity), last_sequence: 0 }) }
    }

    /// Assign the next sequence number and buffer the message
    ///
    /// Sequence numbers start at 1 and are never reused.
    pub fn append(&self, envelope: EventEnvelope, requires_ack: bool) -> BufferedMessage {
        let mut state = self.state.lock();
        state.last_sequence += 1;
        let message = BufferedMessage::new(state.last_sequence, envelope, requires_ack);
        state.ring.push(message.clone());
        message
    }

    /// Buffered messages with `sequence > last_sequence`, ascending
    pub fn messages_since(&self, last_sequence: u64) -> Vec<BufferedMessage> {
        self.state.lock().ring.iter().filter(|m| m.sequence > last_sequence).cloned().collect()
    }

    /// Highest sequence assigned so far, 0 before the first message
    pub fn last_sequence(&self) -> u64 {
        self.state.lock().last_sequence
    }

    /// Oldest sequence still replayable
    pub fn oldest_sequence(&self) -> Option<u64> {
        self.state.lock().ring.front().map(|m| m.sequence)
    }

    pub fn len(&self) -> usize {
        self.state.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().ring.capacity()
    }
}

/// Last acknowledged sequence per connection
#[derive(Debug, Default)]
pub struct AckTracker {
    acks: Mutex<HashMap<String, ClientAck>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ack; returns false when it does not advance the connection
    pub fn record(&self, connection_id: &str, sequence: u64) -> bool {
        let mut acks = self.acks.lock();
        let ack = acks.entry(connection_id.to_string()).or_insert(ClientAck { last_acked_sequence: 0 });
        if sequence <= ack.last_acked_sequence {
            return false;
        }
        ack.last_acked_sequence = sequence;
        true
    }

    pub fn last_acked(&self, connection_id: &str) -> Option<u64> {
        self.acks.lock().get(connection_id).map(|ack| ack.last_acked_sequence)
    }

    pub fn remove(&self, connection_id: &str) {
        self.acks.lock().remove(connection_id);
    }
}
