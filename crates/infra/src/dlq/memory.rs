//! In-process dead-letter store
//!
//! A single deque behind one lock, so every trait method is atomic with
//! respect to concurrent writers and management calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;
use vigil_core::ports::DlqStore;
use vigil_domain::{DlqStats, JobFailure, Result, VigilError};

pub struct InMemoryDlqStore {
    entries: Mutex<VecDeque<JobFailure>>,
    writable: AtomicBool,
}

impl InMemoryDlqStore {
    pub fn new() -> Self {
        Self { entries: Mutex::new(VecDeque::new()), writable: AtomicBool::new(true) }
    }

    /// Make writes fail with a storage error, as a full or offline store would
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VigilError::Storage("dead-letter store is not writable".to_string()))
        }
    }
}

impl Default for InMemoryDlqStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DlqStore for InMemoryDlqStore {
    async fn push(&self, failure: JobFailure) -> Result<()> {
        self.ensure_writable()?;
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
        Ok(entries.iter().position(|entry| entry.id == id).and_then(|index| entries.remove(index)))
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<JobFailure>> {
        Ok(self.entries.lock().iter().skip(offset).take(limit).cloned().collect())
    }

    async fn stats(&self) -> Result<DlqStats> {
        Ok(DlqStats::from_entries(self.entries.lock().iter()))
    }

    async fn clear(&self) -> Result<usize> {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        Ok(dropped)
    }
}
