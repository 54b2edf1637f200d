use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use async_trait::async_trait;
use slotgate_model::{FailureRecord, JobKey, JobState, QueueTier, RetryMetadata};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{JobQueue, QueueCounts, QueueError, QueueResult};
use crate::runner::{JobRunner, RunnerError};

const RETRY_DIR: &str = "retry";
const QUEUE_DIR: &str = "queue";
const ACTIVE_DIR: &str = "active";
const DONE_DIR: &str = "done";
const FAILED_DIR: &str = "failed";
const TEMP_DIR: &str = "temp";
const META_DIR: &str = ".meta";
const FAILURES_FILE: &str = "failures.jsonl";

/// Directory-tree queue.
///
/// ```text
/// <root>/retry/<key>     priority tier
/// <root>/queue/<key>     standard tier
/// <root>/active/<key>    admitted
/// <root>/done/<key>      succeeded
/// <root>/failed/<key>    dead-lettered
/// <root>/temp/<key>/     scratch data
/// <root>/.meta/<key>.json  retry metadata
/// <root>/failures.jsonl  pending failure records
/// ```
///
/// Moves are single `rename` calls, so a job is always in exactly one state directory.
/// Queued jobs are ordered by modification time; requeueing refreshes it.
#[derive(Debug, Clone)]
pub struct FsJobQueue {
    root: PathBuf,
}

impl FsJobQueue {
    /// Open a queue rooted at `root`, creating the state directories.
    pub async fn open(root: impl Into<PathBuf>) -> QueueResult<Self> {
        let root = root.into();
        for dir in [RETRY_DIR, QUEUE_DIR, ACTIVE_DIR, DONE_DIR, FAILED_DIR, TEMP_DIR, META_DIR] {
            let path = root.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| QueueError::io(&path, e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tier_dir(tier: QueueTier) -> &'static str {
        match tier {
            QueueTier::Priority => RETRY_DIR,
            QueueTier::Standard => QUEUE_DIR,
        }
    }

    fn path_in(&self, dir: &str, key: &JobKey) -> PathBuf {
        let mut path = self.root.join(dir);
        path.extend(key.segments());
        path
    }

    fn meta_path(&self, key: &JobKey) -> PathBuf {
        let mut path = self.path_in(META_DIR, key);
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".json");
        path.set_file_name(name);
        path
    }

    /// Current location of a job, checked in lifecycle order.
    async fn locate(&self, key: &JobKey) -> QueueResult<Option<(JobState, PathBuf)>> {
        let candidates = [
            (JobState::Queued(QueueTier::Priority), RETRY_DIR),
            (JobState::Queued(QueueTier::Standard), QUEUE_DIR),
            (JobState::Active, ACTIVE_DIR),
            (JobState::DeadLettered, FAILED_DIR),
            (JobState::Succeeded, DONE_DIR),
        ];
        for (state, dir) in candidates {
            let path = self.path_in(dir, key);
            match tokio::fs::try_exists(&path).await {
                Ok(true) => return Ok(Some((state, path))),
                Ok(false) => {}
                Err(e) => return Err(QueueError::io(&path, e)),
            }
        }
        Ok(None)
    }

    async fn move_to(&self, key: &JobKey, dir: &str) -> QueueResult<PathBuf> {
        let (_, from) = self
            .locate(key)
            .await?
            .ok_or_else(|| QueueError::NotFound(key.clone()))?;
        let to = self.path_in(dir, key);
        if from == to {
            return Ok(to);
        }
        rename(&from, &to).await?;
        debug!(job = %key, from = %from.display(), to = %to.display(), "job moved");
        Ok(to)
    }

    async fn write_meta(&self, key: &JobKey, meta: &RetryMetadata) -> QueueResult<()> {
        let path = self.meta_path(key);
        let body = serde_json::to_vec_pretty(meta).map_err(|e| QueueError::corrupt(&path, e))?;
        ensure_parent(&path).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| QueueError::io(&tmp, e))?;
        rename(&tmp, &path).await
    }

    async fn read_failures(&self, path: &Path) -> QueueResult<Vec<FailureRecord>> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(QueueError::io(path, e)),
        };
        let mut records = Vec::new();
        for (n, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FailureRecord>(line) {
                Ok(rec) => records.push(rec),
                Err(e) => warn!(path = %path.display(), line = n + 1, error = %e, "skipping malformed failure record"),
            }
        }
        Ok(records)
    }

    /// Files under `dir`, as job keys with their modification time.
    async fn list(&self, dir: &str) -> QueueResult<Vec<(SystemTime, JobKey)>> {
        let base = self.root.join(dir);
        let mut out = Vec::new();
        let mut stack = vec![base.clone()];

        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(QueueError::io(&current, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| QueueError::io(&current, e))?
            {
                let path = entry.path();
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| QueueError::io(&path, e))?;
                if meta.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Some(key) = key_from_path(&base, &path) else {
                    warn!(path = %path.display(), "ignoring file with unusable name");
                    continue;
                };
                let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                out.push((mtime, key));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl JobQueue for FsJobQueue {
    async fn enqueue(&self, key: &JobKey, tier: QueueTier) -> QueueResult<()> {
        if self.locate(key).await?.is_some() {
            return Ok(());
        }
        let path = self.path_in(Self::tier_dir(tier), key);
        ensure_parent(&path).await?;
        tokio::fs::write(&path, b"")
            .await
            .map_err(|e| QueueError::io(&path, e))
    }

    async fn queued(&self, tier: QueueTier) -> QueueResult<Vec<JobKey>> {
        let mut jobs = self.list(Self::tier_dir(tier)).await?;
        jobs.sort();
        Ok(jobs.into_iter().map(|(_, k)| k).collect())
    }

    async fn state(&self, key: &JobKey) -> QueueResult<Option<JobState>> {
        Ok(self.locate(key).await?.map(|(state, _)| state))
    }

    async fn retry_metadata(&self, key: &JobKey) -> QueueResult<RetryMetadata> {
        let path = self.meta_path(key);
        match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| QueueError::corrupt(&path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RetryMetadata::default()),
            Err(e) => Err(QueueError::io(&path, e)),
        }
    }

    async fn admit(&self, key: &JobKey) -> QueueResult<bool> {
        for tier in QueueTier::DRAIN_ORDER {
            let from = self.path_in(Self::tier_dir(tier), key);
            let to = self.path_in(ACTIVE_DIR, key);
            ensure_parent(&to).await?;
            match tokio::fs::rename(&from, &to).await {
                Ok(()) => {
                    debug!(job = %key, tier = %tier, "job admitted");
                    return Ok(true);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(QueueError::io(&from, e)),
            }
        }
        Ok(false)
    }

    async fn requeue(&self, key: &JobKey, tier: QueueTier, meta: RetryMetadata) -> QueueResult<()> {
        self.write_meta(key, &meta).await?;
        let path = self.move_to(key, Self::tier_dir(tier)).await?;
        touch(&path).await
    }

    async fn dead_letter(&self, key: &JobKey, meta: RetryMetadata) -> QueueResult<()> {
        self.write_meta(key, &meta).await?;
        self.move_to(key, FAILED_DIR).await.map(|_| ())
    }

    async fn complete(&self, key: &JobKey) -> QueueResult<()> {
        self.move_to(key, DONE_DIR).await.map(|_| ())
    }

    async fn purge_scratch(&self, key: &JobKey) -> QueueResult<()> {
        let path = self.path_in(TEMP_DIR, key);
        let result = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!(job = %key, "scratch data purged");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QueueError::io(&path, e)),
        }
    }

    async fn record_failure(&self, record: &FailureRecord) -> QueueResult<()> {
        let path = self.root.join(FAILURES_FILE);
        let mut line = serde_json::to_vec(record).map_err(|e| QueueError::corrupt(&path, e))?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| QueueError::io(&path, e))?;
        file.write_all(&line)
            .await
            .map_err(|e| QueueError::io(&path, e))?;
        file.flush().await.map_err(|e| QueueError::io(&path, e))
    }

    async fn failures(&self) -> QueueResult<Vec<FailureRecord>> {
        self.read_failures(&self.root.join(FAILURES_FILE)).await
    }

    async fn drain_failures(&self) -> QueueResult<Vec<FailureRecord>> {
        let path = self.root.join(FAILURES_FILE);
        let draining = self.root.join(format!("{FAILURES_FILE}.draining"));
        match tokio::fs::rename(&path, &draining).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(QueueError::io(&path, e)),
        }
        let records = self.read_failures(&draining).await?;
        match tokio::fs::remove_file(&draining).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(QueueError::io(&draining, e)),
        }
        Ok(records)
    }

    async fn counts(&self) -> QueueResult<QueueCounts> {
        Ok(QueueCounts {
            priority: self.list(RETRY_DIR).await?.len() as u64,
            standard: self.list(QUEUE_DIR).await?.len() as u64,
            active: self.list(ACTIVE_DIR).await?.len() as u64,
            succeeded: self.list(DONE_DIR).await?.len() as u64,
            dead_lettered: self.list(FAILED_DIR).await?.len() as u64,
        })
    }
}

#[async_trait]
impl JobRunner for FsJobQueue {
    async fn running_jobs(&self) -> Result<u64, RunnerError> {
        self.list(ACTIVE_DIR)
            .await
            .map(|jobs| jobs.len() as u64)
            .map_err(|e| RunnerError::Query(e.to_string()))
    }
}

fn key_from_path(base: &Path, path: &Path) -> Option<JobKey> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    JobKey::new(parts?.join("/")).ok()
}

async fn ensure_parent(path: &Path) -> QueueResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| QueueError::io(parent, e))?;
    }
    Ok(())
}

async fn rename(from: &Path, to: &Path) -> QueueResult<()> {
    ensure_parent(to).await?;
    tokio::fs::rename(from, to)
        .await
        .map_err(|e| QueueError::io(from, e))
}

/// Refresh modification time so the job sorts as newest in its tier.
async fn touch(path: &Path) -> QueueResult<()> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new()
            .write(true)
            .open(&owned)
            .and_then(|f| f.set_modified(SystemTime::now()))
    })
    .await
    .map_err(|e| QueueError::Backend(e.to_string()))?
    .map_err(|e| QueueError::io(path, e))
}
