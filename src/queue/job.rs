use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{Execution, ExecutionStatus, ExecutionSummary};

/// Lifecycle of a queued execution job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in queue
    Pending,
    /// Claimed by a worker
    Running,
    /// Execution reached a terminal status
    Completed,
    /// Failed permanently (not retryable, or max retries exceeded)
    Dead,
    /// Stop requested by an operator
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Dead => "dead",
            Self::Cancelled => "cancelled",
        }
    }
}

/// An execution waiting for, or claimed by, a worker.
///
/// The job id is the execution id, so a stop request for an execution
/// addresses its job directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub id: Uuid,

    /// Snapshot of the execution as submitted
    pub execution: Execution,

    /// Executor who submitted the execution
    pub user_id: Uuid,

    pub status: JobStatus,

    /// Retry information
    pub retry_count: u32,
    pub max_retries: u32,

    /// Timestamps
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,

    /// Error message if failed
    pub error_message: Option<String>,

    /// Set once the execution finished
    pub result: Option<JobResult>,
}

impl ExecutionJob {
    pub fn new(execution: Execution) -> Self {
        Self {
            id: execution.id,
            user_id: execution.executor_id,
            execution,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
            error_message: None,
            result: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Outcome recorded on a completed job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub status: ExecutionStatus,
    pub summary: ExecutionSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaseTarget, ExecutionType};

    fn execution() -> Execution {
        Execution::new(
            ExecutionType::Batch,
            vec![CaseTarget::new(Uuid::new_v4())],
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
        )
    }

    #[test]
    fn test_job_status_is_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Dead.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_create_job() {
        let execution = execution();
        let job = ExecutionJob::new(execution.clone());

        assert_eq!(job.id, execution.id);
        assert_eq!(job.user_id, execution.executor_id);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.started_at.is_none());
        assert!(job.result.is_none());
    }

    #[test]
    fn test_job_serialization() {
        let job = ExecutionJob::new(execution()).with_max_retries(1);

        let json = serde_json::to_string(&job).unwrap();
        let deserialized: ExecutionJob = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id, job.id);
        assert_eq!(deserialized.max_retries, 1);
        assert_eq!(deserialized.execution.execution_type, ExecutionType::Batch);
        assert_eq!(deserialized.execution.targets, job.execution.targets);
    }
}
