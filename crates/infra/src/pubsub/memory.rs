//! In-process pub/sub on tokio broadcast channels
//!
//! One broadcast channel per name, created on first use. A subscriber that
//! falls more than `capacity` messages behind skips the overflow and keeps
//! reading. [`disconnect`](InMemoryPubSub::disconnect) closes every open
//! subscription, the way a broker restart would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use vigil_core::ports::{PubSub, Subscription};
use vigil_domain::{Result, VigilError};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

pub struct InMemoryPubSub {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
    available: AtomicBool,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Per-channel buffer for slow subscribers
    pub fn with_capacity(capacity: usize) -> Self {
        Self { channels: Mutex::new(HashMap::new()), capacity: capacity.max(1), available: AtomicBool::new(true) }
    }

    /// Simulate the broker going away or coming back
    ///
    /// Going unavailable also closes every open subscription.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            self.disconnect();
        }
    }

    /// Close every open subscription
    pub fn disconnect(&self) {
        let dropped = self.channels.lock().drain().count();
        debug!(channels = dropped, "Pub/sub channels disconnected");
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.lock().get(channel).map_or(0, broadcast::Sender::receiver_count)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VigilError::Broker("pub/sub broker unavailable".to_string()))
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, channel: &str, message: &str) -> Result<usize> {
        self.ensure_available()?;
        // No receivers is not an error for a broker
        Ok(self.sender(channel).send(message.to_string()).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        self.ensure_available()?;
        let receiver = self.sender(channel).subscribe();
        debug!(channel, "Pub/sub subscription opened");
        Ok(Box::new(BroadcastSubscription { channel: channel.to_string(), receiver: Some(receiver) }))
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_available()
    }
}

struct BroadcastSubscription {
    channel: String,
    receiver: Option<broadcast::Receiver<String>>,
}

#[async_trait]
impl Subscription for BroadcastSubscription {
    async fn next_message(&mut self) -> Result<Option<String>> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Ok(None);
        };
        loop {
            match receiver.recv().await {
                Ok(message) => return Ok(Some(message)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Subscriber lagged, messages skipped");
                }
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        if self.receiver.take().is_some() {
            debug!(channel = %self.channel, "Pub/sub subscription closed");
        }
        Ok(())
    }
}
