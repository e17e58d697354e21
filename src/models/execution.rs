use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// How the targets of an execution are run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    /// Exactly one case
    Single,
    /// Ordered steps, run sequentially, chained through temporary variables
    Scenario,
    /// Independent cases, run concurrently
    Batch,
}

impl ExecutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Scenario => "scenario",
            Self::Batch => "batch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "single" => Some(Self::Single),
            "scenario" => Some(Self::Scenario),
            "batch" => Some(Self::Batch),
            _ => None,
        }
    }
}

/// Execution status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, waiting to be claimed
    Pending,
    /// Claimed by an orchestrator
    Running,
    /// Every case passed
    Success,
    /// No case passed
    Failed,
    /// Some cases passed, some did not
    Partial,
    /// Cancelled by an operator mid-run
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Partial | Self::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Partial => "partial",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "partial" => Some(Self::Partial),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

/// Per-execution knobs; unset values fall back to the engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Cap on concurrently running cases (batch only)
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Skip cases that have not started once any case fails or errors
    #[serde(default)]
    pub stop_on_failure: bool,
    /// Deadline for each HTTP attempt
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub backoff_ms: Option<u64>,
}

/// Copies a value out of a step's response into a temporary variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub json_path: String,
    pub variable: String,
}

/// One case to run, in execution order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseTarget {
    pub case_id: Uuid,
    #[serde(default)]
    pub extract: Vec<Extraction>,
}

impl CaseTarget {
    pub fn new(case_id: Uuid) -> Self {
        Self {
            case_id,
            extract: Vec::new(),
        }
    }

    pub fn extract(mut self, json_path: impl Into<String>, variable: impl Into<String>) -> Self {
        self.extract.push(Extraction {
            json_path: json_path.into(),
            variable: variable.into(),
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub execution_type: ExecutionType,
    pub targets: Vec<CaseTarget>,
    pub executor_id: Uuid,
    pub environment_id: Option<Uuid>,
    pub status: ExecutionStatus,
    /// Seeded as execution-level temporary variables before the first case
    #[serde(default)]
    pub override_variables: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub config: ExecutionConfig,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}

impl Execution {
    pub fn new(
        execution_type: ExecutionType,
        targets: Vec<CaseTarget>,
        executor_id: Uuid,
        environment_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_type,
            targets,
            executor_id,
            environment_id,
            status: ExecutionStatus::Pending,
            override_variables: BTreeMap::new(),
            config: ExecutionConfig::default(),
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_override(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.override_variables.insert(name.into(), value);
        self
    }

    /// Shape checks done before an execution is claimed
    pub fn validate(&self) -> AppResult<()> {
        if self.targets.is_empty() {
            return Err(AppError::Validation(
                "Execution has no target cases".to_string(),
            ));
        }
        if self.execution_type == ExecutionType::Single && self.targets.len() != 1 {
            return Err(AppError::Validation(format!(
                "Single execution expects exactly one case, got {}",
                self.targets.len()
            )));
        }
        if self.config.max_concurrency == Some(0) {
            return Err(AppError::Validation(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Input accepted from the API layer when submitting an execution
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRequest {
    pub execution_type: ExecutionType,
    /// Plain case ids; ignored when `targets` is non-empty
    #[serde(default)]
    pub target_ids: Vec<Uuid>,
    /// Case ids with per-step extraction rules
    #[serde(default)]
    pub targets: Vec<CaseTarget>,
    pub executor_id: Uuid,
    pub environment_id: Option<Uuid>,
    #[serde(default)]
    pub override_variables: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub config: ExecutionConfig,
}

impl ExecutionRequest {
    pub fn into_execution(self) -> AppResult<Execution> {
        let targets = if self.targets.is_empty() {
            self.target_ids.into_iter().map(CaseTarget::new).collect()
        } else {
            self.targets
        };

        let mut execution = Execution::new(
            self.execution_type,
            targets,
            self.executor_id,
            self.environment_id,
        );
        execution.override_variables = self.override_variables;
        execution.config = self.config;
        execution.validate()?;

        Ok(execution)
    }
}
