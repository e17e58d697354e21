use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{AssertionRule, HttpResponse, ResolvedRequest};

/// Outcome of one case within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResultStatus {
    Pass,
    Fail,
    Error,
    Skip,
}

impl TestResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
            Self::Skip => "skip",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            "error" => Some(Self::Error),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }

    /// Statuses that trip `stop_on_failure`
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }
}

/// Verdict for one assertion rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub rule: AssertionRule,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<serde_json::Value>,
    pub detail: String,
    /// The rule itself is invalid (unknown type, bad operator, bad pattern)
    #[serde(default)]
    pub malformed: bool,
}

/// Immutable record of one case run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub case_id: Uuid,
    /// Index of the target within the execution
    pub position: i32,
    pub status: TestResultStatus,
    pub request_data: Option<ResolvedRequest>,
    pub response_data: Option<HttpResponse>,
    #[serde(default)]
    pub assertion_results: Vec<AssertionResult>,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl TestResult {
    pub fn new(execution_id: Uuid, case_id: Uuid, position: i32, status: TestResultStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            case_id,
            position,
            status,
            request_data: None,
            response_data: None,
            assertion_results: Vec::new(),
            duration_ms: 0,
            error_message: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn skipped(execution_id: Uuid, case_id: Uuid, position: i32, reason: &str) -> Self {
        let mut result = Self::new(execution_id, case_id, position, TestResultStatus::Skip);
        result.error_message = Some(reason.to_string());
        result
    }
}

/// Counts derived from the results of one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub pass_rate: f64,
    pub total_duration_ms: i64,
}

impl ExecutionSummary {
    pub fn from_results(results: &[TestResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };

        for result in results {
            match result.status {
                TestResultStatus::Pass => summary.passed += 1,
                TestResultStatus::Fail => summary.failed += 1,
                TestResultStatus::Error => summary.errored += 1,
                TestResultStatus::Skip => summary.skipped += 1,
            }
            summary.total_duration_ms += result.duration_ms;
        }

        summary.pass_rate = if summary.total > 0 {
            (summary.passed as f64 / summary.total as f64) * 100.0
        } else {
            0.0
        };

        summary
    }

    /// Number of cases that actually ran
    pub fn executed(&self) -> usize {
        self.total - self.skipped
    }
}
