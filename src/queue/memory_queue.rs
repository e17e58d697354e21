use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::queue::{ExecutionJob, JobQueue, JobResult, JobStatus};

/// In-process queue, for tests and single-binary embedding
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Mutex<InMemoryQueueInner>>,
    notify: Arc<Notify>,
}

struct InMemoryQueueInner {
    queue: VecDeque<Uuid>,
    jobs: HashMap<Uuid, ExecutionJob>,
}

impl InMemoryQueueInner {
    /// Claim the next pending job; jobs cancelled while queued are dropped
    fn claim_next(&mut self) -> Option<ExecutionJob> {
        while let Some(job_id) = self.queue.pop_front() {
            if let Some(job) = self.jobs.get_mut(&job_id) {
                if job.status != JobStatus::Pending {
                    continue;
                }
                job.status = JobStatus::Running;
                job.started_at = Some(OffsetDateTime::now_utc());
                return Some(job.clone());
            }
        }
        None
    }

    fn job_mut(&mut self, job_id: Uuid) -> AppResult<&mut ExecutionJob> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound("Job".to_string()))
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryQueueInner {
                queue: VecDeque::new(),
                jobs: HashMap::new(),
            })),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, job: ExecutionJob) -> AppResult<Uuid> {
        let job_id = job.id;
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job_id) {
            return Err(AppError::Conflict("Job".to_string()));
        }
        inner.jobs.insert(job_id, job);
        inner.queue.push_back(job_id);
        drop(inner);
        self.notify.notify_one();
        Ok(job_id)
    }

    async fn dequeue(&self, timeout_seconds: u64) -> AppResult<Option<ExecutionJob>> {
        let timeout = std::time::Duration::from_secs(timeout_seconds);

        if let Some(job) = self.inner.lock().await.claim_next() {
            return Ok(Some(job));
        }

        tokio::select! {
            _ = tokio::time::sleep(timeout) => Ok(None),
            _ = self.notify.notified() => Ok(self.inner.lock().await.claim_next()),
        }
    }

    async fn get_job(&self, job_id: Uuid) -> AppResult<Option<ExecutionJob>> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn complete_job(&self, job_id: Uuid, result: JobResult) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(job_id)?;
        // A stop request keeps its cancelled status
        if job.status != JobStatus::Cancelled {
            job.status = JobStatus::Completed;
        }
        job.completed_at = Some(OffsetDateTime::now_utc());
        job.result = Some(result);
        Ok(())
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        error: String,
        retryable: bool,
    ) -> AppResult<JobStatus> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(job_id)?;

        job.error_message = Some(error);

        let status = if retryable && job.retry_count < job.max_retries {
            job.retry_count += 1;
            job.started_at = None;
            JobStatus::Pending
        } else {
            job.completed_at = Some(OffsetDateTime::now_utc());
            JobStatus::Dead
        };
        job.status = status;

        if status == JobStatus::Pending {
            inner.queue.push_back(job_id);
            drop(inner);
            self.notify.notify_one();
        }
        Ok(status)
    }

    async fn queue_length(&self) -> AppResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.queue.len() as u64)
    }

    async fn cancel_job(&self, job_id: Uuid) -> AppResult<JobStatus> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(job_id)?;

        if job.status.is_terminal() {
            return Err(AppError::Validation(
                "Cannot cancel a finished job".to_string(),
            ));
        }

        let previous = job.status;
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(OffsetDateTime::now_utc());
        Ok(previous)
    }
}
