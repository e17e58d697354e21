use mongodb::Database;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::TestResult;

const EXECUTION_LOGS: &str = "execution_logs";

/// Full request/response trace of one case run, kept for later inspection
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub execution_id: String,
    pub case_id: String,
    pub position: i32,
    pub status: String,
    pub request: Option<serde_json::Value>,
    pub response_status: Option<i32>,
    pub response_data: Option<serde_json::Value>,
    pub assertions: serde_json::Value,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub created_at: bson::DateTime,
}

impl ExecutionLog {
    pub fn from_result(result: &TestResult) -> AppResult<Self> {
        Ok(Self {
            execution_id: result.execution_id.to_string(),
            case_id: result.case_id.to_string(),
            position: result.position,
            status: result.status.as_str().to_string(),
            request: result
                .request_data
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
            response_status: result.response_data.as_ref().map(|r| i32::from(r.status)),
            response_data: result.response_data.as_ref().map(|r| r.body.clone()),
            assertions: serde_json::to_value(&result.assertion_results)?,
            error_message: result.error_message.clone(),
            duration_ms: result.duration_ms,
            created_at: bson::DateTime::now(),
        })
    }
}

/// MongoDB repository for execution traces
pub struct MongoRepository;

impl MongoRepository {
    /// Save the trace of one test result
    pub async fn save_execution_log(db: &Database, result: &TestResult) -> AppResult<()> {
        let collection = db.collection::<ExecutionLog>(EXECUTION_LOGS);

        collection
            .insert_one(ExecutionLog::from_result(result)?)
            .await
            .map_err(|e| AppError::Database(format!("MongoDB insert error: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HttpResponse, TestResultStatus};
    use serde_json::json;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[test]
    fn test_execution_log_from_result() {
        let mut result = TestResult::new(Uuid::new_v4(), Uuid::new_v4(), 2, TestResultStatus::Fail);
        result.response_data = Some(HttpResponse {
            status: 404,
            headers: BTreeMap::new(),
            body: json!({"error": "missing"}),
            text: r#"{"error":"missing"}"#.to_string(),
            elapsed_ms: 12,
        });
        result.duration_ms = 12;

        let log = ExecutionLog::from_result(&result).unwrap();
        assert_eq!(log.position, 2);
        assert_eq!(log.status, "fail");
        assert_eq!(log.response_status, Some(404));
        assert_eq!(log.response_data, Some(json!({"error": "missing"})));
        assert_eq!(log.assertions, json!([]));
        assert!(log.request.is_none());
    }
}
