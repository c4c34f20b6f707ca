//! Shared helpers for infra integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use vigil_common::testing::poll_until;
use vigil_core::ports::{ClientConnection, OutboundFrame};
use vigil_domain::{Config, JobPayload, QueuedJob, Result};

pub fn job(job_type: &str) -> QueuedJob {
    QueuedJob::new(job_type, JobPayload::Broadcast { event: serde_json::json!({ "type": job_type }) })
}

/// Defaults with the timers the tests rely on turned down or off
pub fn quiet_config() -> Config {
    let mut config = Config::default();
    config.broadcaster.heartbeat_interval = None;
    config.retry.base_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config.retry.jitter_enabled = false;
    config
}

pub async fn wait_for(condition: impl Fn() -> bool) -> bool {
    poll_until(Duration::from_secs(5), Duration::from_millis(5), || std::future::ready(condition())).await
}

/// Connection that keeps every text frame it is sent
pub struct CapturingConnection {
    id: String,
    frames: Mutex<Vec<String>>,
}

impl CapturingConnection {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self { id: id.to_string(), frames: Mutex::new(Vec::new()) })
    }

    pub fn messages(&self) -> Vec<Value> {
        self.frames.lock().iter().filter_map(|text| serde_json::from_str(text).ok()).collect()
    }
}

#[async_trait]
impl ClientConnection for CapturingConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if let OutboundFrame::Text(text) = frame {
            self.frames.lock().push(text);
        }
        Ok(())
    }
}
