//! Broadcaster health check

use std::sync::Arc;

use async_trait::async_trait;
use vigil_domain::{Result, VigilError};

use super::broadcaster::EventBroadcaster;
use crate::ports::HealthCheck;

/// Reports the broadcaster's listener health to the degradation manager
pub struct BroadcasterHealthCheck {
    broadcaster: Arc<EventBroadcaster>,
}

impl BroadcasterHealthCheck {
    pub fn new(broadcaster: Arc<EventBroadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl HealthCheck for BroadcasterHealthCheck {
    async fn check(&self) -> Result<()> {
        if self.broadcaster.is_listener_healthy() {
            return Ok(());
        }
        let reason = if self.broadcaster.is_degraded() {
            "event broadcaster degraded"
        } else {
            "event listener not running"
        };
        Err(VigilError::Connection(reason.to_string()))
    }
}
