use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{now_rfc3339, PushJob, PushQueue};
use crate::error::QueueError;

/// In-process queue used when no Redis URL is configured, and by tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryPushQueue {
    /// Front is newest, mirroring LPUSH.
    jobs: Arc<Mutex<VecDeque<PushJob>>>,
}

impl MemoryPushQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PushQueue for MemoryPushQueue {
    async fn enqueue(&self, mut job: PushJob) -> Result<PushJob, QueueError> {
        job.created_at = Some(now_rfc3339());
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".to_string()))?;
        jobs.push_front(job.clone());
        Ok(job)
    }

    async fn peek_pending(&self, n: usize) -> Result<Vec<PushJob>, QueueError> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".to_string()))?;
        Ok(jobs.iter().take(n).cloned().collect())
    }
}
