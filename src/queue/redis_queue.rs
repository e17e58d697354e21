use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnectionManager;
use redis::{AsyncCommands, Script};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::queue::{ExecutionJob, JobQueue, JobResult, JobStatus};

/// Redis keys structure:
/// - serval:exec:queue             - List of pending job ids (FIFO)
/// - serval:exec:job:{id}          - String with the job as JSON
const QUEUE_KEY: &str = "serval:exec:queue";
const JOB_PREFIX: &str = "serval:exec:job:";

/// Swap the job JSON only if nobody wrote it since it was read
const COMPARE_AND_SET: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// Attempts before a contended job update gives up
const MAX_UPDATE_ATTEMPTS: usize = 16;

fn queue_error(e: redis::RedisError) -> AppError {
    AppError::Queue(format!("Redis error: {}", e))
}

/// What an update closure decided for the job it was shown
enum Update<T> {
    Write(T),
    Skip(T),
}

/// Redis-backed job queue shared by API processes and workers
#[derive(Clone)]
pub struct RedisQueue {
    conn: RedisConnectionManager,
}

impl RedisQueue {
    pub fn new(conn: RedisConnectionManager) -> Self {
        Self { conn }
    }

    fn job_key(id: Uuid) -> String {
        format!("{}{}", JOB_PREFIX, id)
    }

    async fn get_raw(&self, job_id: Uuid) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(Self::job_key(job_id)).await.map_err(queue_error)
    }

    async fn compare_and_set(
        &self,
        job_id: Uuid,
        current: &str,
        next: &ExecutionJob,
    ) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let swapped: i32 = Script::new(COMPARE_AND_SET)
            .key(Self::job_key(job_id))
            .arg(current)
            .arg(serde_json::to_string(next)?)
            .invoke_async(&mut conn)
            .await
            .map_err(queue_error)?;
        Ok(swapped == 1)
    }

    /// Read-modify-write of one job. A concurrent writer makes the swap
    /// fail, and `change` is applied again to the fresh copy.
    async fn update_job<T, F>(&self, job_id: Uuid, mut change: F) -> AppResult<T>
    where
        F: FnMut(&mut ExecutionJob) -> AppResult<Update<T>> + Send,
        T: Send,
    {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let raw = self
                .get_raw(job_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Job".to_string()))?;
            let mut job: ExecutionJob = serde_json::from_str(&raw)?;

            match change(&mut job)? {
                Update::Skip(value) => return Ok(value),
                Update::Write(value) => {
                    if self.compare_and_set(job_id, &raw, &job).await? {
                        return Ok(value);
                    }
                    tracing::debug!(job_id = %job_id, "Job changed concurrently, retrying update");
                }
            }
        }

        Err(AppError::Queue(format!(
            "Job {} is contended, update abandoned",
            job_id
        )))
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job: ExecutionJob) -> AppResult<Uuid> {
        let mut conn = self.conn.clone();
        let job_id = job.id;

        let created: bool = conn
            .set_nx(Self::job_key(job_id), serde_json::to_string(&job)?)
            .await
            .map_err(queue_error)?;
        if !created {
            return Err(AppError::Conflict("Job".to_string()));
        }

        let _: () = conn
            .rpush(QUEUE_KEY, job_id.to_string())
            .await
            .map_err(queue_error)?;

        tracing::info!(job_id = %job_id, "Job enqueued");

        Ok(job_id)
    }

    async fn dequeue(&self, timeout_seconds: u64) -> AppResult<Option<ExecutionJob>> {
        let mut conn = self.conn.clone();

        let result: Option<(String, String)> = conn
            .blpop(QUEUE_KEY, timeout_seconds as f64)
            .await
            .map_err(queue_error)?;

        let Some((_, job_id_str)) = result else {
            return Ok(None);
        };
        let job_id = Uuid::parse_str(&job_id_str)
            .map_err(|e| AppError::Queue(format!("Invalid job id in queue: {}", e)))?;

        // Claim only if still pending; a cancel racing this claim wins or loses whole
        let claimed = self
            .update_job(job_id, |job| {
                if job.status != JobStatus::Pending {
                    tracing::debug!(job_id = %job_id, status = job.status.as_str(), "Skipping job that is no longer pending");
                    return Ok(Update::Skip(None));
                }
                job.status = JobStatus::Running;
                job.started_at = Some(OffsetDateTime::now_utc());
                Ok(Update::Write(Some(job.clone())))
            })
            .await;

        match claimed {
            Ok(Some(job)) => {
                tracing::info!(job_id = %job_id, "Job dequeued and started");
                Ok(Some(job))
            }
            Ok(None) | Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_job(&self, job_id: Uuid) -> AppResult<Option<ExecutionJob>> {
        match self.get_raw(job_id).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn complete_job(&self, job_id: Uuid, result: JobResult) -> AppResult<()> {
        tracing::info!(
            job_id = %job_id,
            execution_status = result.status.as_str(),
            passed = result.summary.passed,
            failed = result.summary.failed,
            errored = result.summary.errored,
            skipped = result.summary.skipped,
            "Job completed"
        );

        self.update_job(job_id, |job| {
            // A stop request keeps its cancelled status
            if job.status != JobStatus::Cancelled {
                job.status = JobStatus::Completed;
            }
            job.completed_at = Some(OffsetDateTime::now_utc());
            job.result = Some(result.clone());
            Ok(Update::Write(()))
        })
        .await
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        error: String,
        retryable: bool,
    ) -> AppResult<JobStatus> {
        let (status, retry_count) = self
            .update_job(job_id, |job| {
                job.error_message = Some(error.clone());
                job.status = if retryable && job.retry_count < job.max_retries {
                    job.retry_count += 1;
                    job.started_at = None;
                    JobStatus::Pending
                } else {
                    job.completed_at = Some(OffsetDateTime::now_utc());
                    JobStatus::Dead
                };
                Ok(Update::Write((job.status, job.retry_count)))
            })
            .await?;

        if status == JobStatus::Pending {
            let mut conn = self.conn.clone();
            let _: () = conn
                .rpush(QUEUE_KEY, job_id.to_string())
                .await
                .map_err(queue_error)?;
        }

        tracing::warn!(
            job_id = %job_id,
            status = status.as_str(),
            retry_count,
            error = %error,
            "Job failed"
        );

        Ok(status)
    }

    async fn queue_length(&self) -> AppResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(QUEUE_KEY).await.map_err(queue_error)?;
        Ok(len)
    }

    async fn cancel_job(&self, job_id: Uuid) -> AppResult<JobStatus> {
        let previous = self
            .update_job(job_id, |job| {
                if job.status.is_terminal() {
                    return Err(AppError::Validation(
                        "Cannot cancel a finished job".to_string(),
                    ));
                }
                let previous = job.status;
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(OffsetDateTime::now_utc());
                Ok(Update::Write(previous))
            })
            .await?;

        tracing::info!(job_id = %job_id, previous = previous.as_str(), "Job cancelled");

        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            RedisQueue::job_key(id),
            "serval:exec:job:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_compare_and_set_script_guards_on_current_value() {
        assert!(COMPARE_AND_SET.contains("redis.call('GET', KEYS[1]) == ARGV[1]"));
        assert!(COMPARE_AND_SET.contains("redis.call('SET', KEYS[1], ARGV[2])"));
    }
}
