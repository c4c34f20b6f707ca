//! Disk-backed fallback queues
//!
//! One JSON-lines file per queue under the configured directory. Appends go
//! straight to the end of the file; anything that removes or reorders entries
//! rewrites the file through a temporary sibling and an atomic rename.
//! Records older than the TTL and lines that fail to parse are dropped on
//! read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vigil_core::ports::FallbackStore;
use vigil_domain::{QueuedJob, Result, VigilError};

const FILE_EXTENSION: &str = "jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct FallbackRecord {
    stored_at: DateTime<Utc>,
    job: QueuedJob,
}

pub struct FileFallbackStore {
    dir: PathBuf,
    ttl: Duration,
    /// Serializes every read-modify-write on the directory
    lock: Mutex<()>,
}

impl FileFallbackStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), ttl_secs = ttl.as_secs(), "Fallback store opened");
        Ok(Self { dir, ttl, lock: Mutex::new(()) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn queue_path(&self, queue: &str) -> Result<PathBuf> {
        let valid = !queue.is_empty()
            && queue.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(VigilError::Validation(format!("invalid fallback queue name '{}'", queue)));
        }
        Ok(self.dir.join(format!("{}.{}", queue, FILE_EXTENSION)))
    }

    fn is_live(&self, record: &FallbackRecord, now: DateTime<Utc>) -> bool {
        (now - record.stored_at).to_std().map_or(true, |age| age <= self.ttl)
    }

    async fn read_live(&self, path: &Path) -> Result<Vec<FallbackRecord>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let mut records = Vec::new();
        let mut expired = 0usize;
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FallbackRecord>(line) {
                Ok(record) if self.is_live(&record, now) => records.push(record),
                Ok(_) => expired += 1,
                Err(e) => {
                    warn!(path = %path.display(), line = line_no + 1, error = %e, "Skipping corrupt fallback record");
                }
            }
        }
        if expired > 0 {
            debug!(path = %path.display(), expired, "Discarded expired fallback records");
        }
        Ok(records)
    }

    async fn rewrite(&self, path: &Path, records: &[FallbackRecord]) -> Result<()> {
        if records.is_empty() {
            return match fs::remove_file(path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }

        let mut data = Vec::new();
        for record in records {
            serde_json::to_writer(&mut data, record)?;
            data.push(b'\n');
        }

        let temp_path = path.with_extension("tmp");
        let mut file =
            fs::OpenOptions::new().write(true).create(true).truncate(true).open(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl FallbackStore for FileFallbackStore {
    async fn push(&self, queue: &str, job: &QueuedJob) -> Result<()> {
        let path = self.queue_path(queue)?;
        let mut line = serde_json::to_vec(&FallbackRecord { stored_at: Utc::now(), job: job.clone() })?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn take(&self, queue: &str, limit: usize) -> Result<Vec<QueuedJob>> {
        let path = self.queue_path(queue)?;
        let _guard = self.lock.lock().await;

        let mut records = self.read_live(&path).await?;
        let remainder = records.split_off(limit.min(records.len()));
        self.rewrite(&path, &remainder).await?;
        Ok(records.into_iter().map(|record| record.job).collect())
    }

    async fn restore(&self, queue: &str, jobs: Vec<QueuedJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        let path = self.queue_path(queue)?;
        let _guard = self.lock.lock().await;

        let now = Utc::now();
        let mut records: Vec<FallbackRecord> =
            jobs.into_iter().map(|job| FallbackRecord { stored_at: now, job }).collect();
        records.extend(self.read_live(&path).await?);
        self.rewrite(&path, &records).await
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        let path = self.queue_path(queue)?;
        let _guard = self.lock.lock().await;
        Ok(self.read_live(&path).await?.len())
    }

    async fn queues(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if !self.read_live(&path).await?.is_empty() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
