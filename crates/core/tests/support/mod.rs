//! Shared test helpers for `vigil-core` integration tests.
//!
//! In-memory fakes for every port, with switches to make them fail so tests
//! can focus on behaviour instead of boilerplate.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;
use vigil_core::ports::{
    ClientConnection, DlqStore, JobQueue, OutboundFrame, PubSub, Subscription,
};
use vigil_domain::{DlqStats, JobFailure, JobPayload, QueuedJob, Result, VigilError};

/// Job with a broadcast payload
pub fn job(job_type: &str) -> QueuedJob {
    QueuedJob::new(job_type, JobPayload::Broadcast { event: serde_json::json!({"job": job_type}) })
}

/* -------------------------------------------------------------------------- */
/* Pub/sub */
/* -------------------------------------------------------------------------- */

type Feed = mpsc::UnboundedSender<Result<String>>;

/// Channel-agnostic pub/sub whose subscriptions can be broken on demand
#[derive(Default)]
pub struct FakePubSub {
    subscribers: Mutex<Vec<Feed>>,
    published: Mutex<Vec<String>>,
    subscribe_calls: AtomicUsize,
    fail_subscribe: AtomicBool,
    failing_publishes: AtomicU32,
}

impl FakePubSub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver a raw message to every live subscription
    pub fn inject(&self, raw: &str) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|feed| feed.send(Ok(raw.to_string())).is_ok());
        subscribers.len()
    }

    /// Make every live subscription return a broker error
    pub fn break_subscriptions(&self) {
        for feed in self.subscribers.lock().drain(..) {
            let _ = feed.send(Err(VigilError::Broker("connection reset".into())));
        }
    }

    /// Close every live subscription
    pub fn close_subscriptions(&self) {
        self.subscribers.lock().clear();
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` publishes
    pub fn fail_next_publishes(&self, count: u32) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().iter().filter(|feed| !feed.is_closed()).count()
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl PubSub for FakePubSub {
    async fn publish(&self, _channel: &str, message: &str) -> Result<usize> {
        let failing = self
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(VigilError::Broker("publish refused".into()));
        }
        self.published.lock().push(message.to_string());
        Ok(self.inject(message))
    }

    async fn subscribe(&self, _channel: &str) -> Result<Box<dyn Subscription>> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(VigilError::Broker("subscribe refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        Ok(Box::new(FakeSubscription { rx }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct FakeSubscription {
    rx: mpsc::UnboundedReceiver<Result<String>>,
}

#[async_trait]
impl Subscription for FakeSubscription {
    async fn next_message(&mut self) -> Result<Option<String>> {
        match self.rx.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.rx.close();
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/* Job queue */
/* -------------------------------------------------------------------------- */

/// Primary broker stand-in that can be switched off
#[derive(Default)]
pub struct FakeQueue {
    jobs: Mutex<BTreeMap<String, Vec<QueuedJob>>>,
    failing: AtomicBool,
}

impl FakeQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn jobs(&self, queue: &str) -> Vec<QueuedJob> {
        self.jobs.lock().get(queue).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl JobQueue for FakeQueue {
    async fn enqueue(&self, queue: &str, job: QueuedJob) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(VigilError::Broker("broker unavailable".into()));
        }
        self.jobs.lock().entry(queue.to_string()).or_default().push(job);
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<usize> {
        Ok(self.jobs.lock().get(queue).map_or(0, Vec::len))
    }

    async fn depths(&self) -> Result<BTreeMap<String, usize>> {
        Ok(self.jobs.lock().iter().map(|(name, jobs)| (name.clone(), jobs.len())).collect())
    }

    async fn health_check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(VigilError::Broker("broker unavailable".into()));
        }
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/* Dead-letter store */
/* -------------------------------------------------------------------------- */

#[derive(Default)]
pub struct FakeDlq {
    entries: Mutex<VecDeque<JobFailure>>,
    fail_writes: AtomicBool,
}

impl FakeDlq {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<JobFailure> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[async_trait]
impl DlqStore for FakeDlq {
    async fn push(&self, failure: JobFailure) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(VigilError::Storage("dlq write refused".into()));
        }
        self.entries.lock().push_back(failure);
        Ok(())
    }

    async fn oldest(&self) -> Result<Option<JobFailure>> {
        Ok(self.entries.lock().front().cloned())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobFailure>> {
        Ok(self.entries.lock().iter().find(|entry| entry.id == id).cloned())
    }

    async fn remove(&self, id: Uuid) -> Result<Option<JobFailure>> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|entry| entry.id == id);
        Ok(index.and_then(|i| entries.remove(i)))
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<JobFailure>> {
        Ok(self.entries.lock().iter().skip(offset).take(limit).cloned().collect())
    }

    async fn stats(&self) -> Result<DlqStats> {
        Ok(DlqStats::from_entries(self.entries.lock().iter()))
    }

    async fn clear(&self) -> Result<usize> {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}

/* -------------------------------------------------------------------------- */
/* Client connections */
/* -------------------------------------------------------------------------- */

/// Connection that records every frame it is sent
pub struct RecordingConnection {
    id: String,
    frames: Mutex<Vec<OutboundFrame>>,
    failing: AtomicBool,
}

impl RecordingConnection {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self { id: id.to_string(), frames: Mutex::new(Vec::new()), failing: AtomicBool::new(false) })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.frames.lock().clone()
    }

    /// Text frames parsed as JSON
    pub fn messages(&self) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .filter_map(|frame| match frame {
                OutboundFrame::Text(text) => serde_json::from_str(text).ok(),
                OutboundFrame::Binary(_) => None,
            })
            .collect()
    }

    /// Parsed messages of one `type`
    pub fn messages_of(&self, kind: &str) -> Vec<Value> {
        self.messages().into_iter().filter(|m| m["type"] == kind).collect()
    }
}

#[async_trait]
impl ClientConnection for RecordingConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(VigilError::Connection(format!("{} is gone", self.id)));
        }
        self.frames.lock().push(frame);
        Ok(())
    }
}
