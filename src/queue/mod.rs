pub mod job;
pub mod memory_queue;
pub mod redis_queue;

pub use job::{ExecutionJob, JobResult, JobStatus};
pub use memory_queue::InMemoryQueue;
pub use redis_queue::RedisQueue;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;

/// Job queue trait for abstracting queue backends
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Push a job onto the queue
    async fn enqueue(&self, job: ExecutionJob) -> AppResult<Uuid>;

    /// Claim the next pending job, waiting up to `timeout_seconds`
    async fn dequeue(&self, timeout_seconds: u64) -> AppResult<Option<ExecutionJob>>;

    /// Get job by ID
    async fn get_job(&self, job_id: Uuid) -> AppResult<Option<ExecutionJob>>;

    /// Record the execution outcome on the job
    async fn complete_job(&self, job_id: Uuid, result: JobResult) -> AppResult<()>;

    /// Record a worker failure. A retryable failure with retries left puts
    /// the job back on the queue as pending; anything else marks it dead.
    /// Returns the job's new status.
    async fn fail_job(&self, job_id: Uuid, error: String, retryable: bool)
        -> AppResult<JobStatus>;

    /// Get queue length
    async fn queue_length(&self) -> AppResult<u64>;

    /// Cancel a pending or running job, returning the status it had
    async fn cancel_job(&self, job_id: Uuid) -> AppResult<JobStatus>;
}
