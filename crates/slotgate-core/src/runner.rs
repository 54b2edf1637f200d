//! Ground truth on how many jobs are actually executing.
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("runner query failed: {0}")]
    Query(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RunnerError {
    fn from(e: std::io::Error) -> Self {
        RunnerError::Io(e.to_string())
    }
}

/// Source of the number of jobs currently executing.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn running_jobs(&self) -> Result<u64, RunnerError>;
}

pub type RunnerHandle = Arc<dyn JobRunner>;

/// Runner whose count is set by hand; used by embedders and tests.
#[derive(Debug, Default)]
pub struct StaticRunner {
    running: AtomicU64,
    failing: AtomicBool,
}

impl StaticRunner {
    pub fn new(running: u64) -> Self {
        Self {
            running: AtomicU64::new(running),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_running(&self, running: u64) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Make subsequent queries fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobRunner for StaticRunner {
    async fn running_jobs(&self) -> Result<u64, RunnerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RunnerError::Query("runner unavailable".into()));
        }
        Ok(self.running.load(Ordering::SeqCst))
    }
}
