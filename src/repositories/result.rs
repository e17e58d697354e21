use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entity::execution::{self, Entity as ExecutionEntity};
use crate::entity::test_result::{self, Column as ResultColumn, Entity as TestResultEntity};
use crate::error::{AppError, AppResult};
use crate::models::{
    Execution, ExecutionStatus, ExecutionType, TestResult, TestResultStatus,
};
use crate::repositories::mongo::MongoRepository;
use crate::repositories::ResultSink;

/// Executions and results in PostgreSQL, with an optional MongoDB trace mirror
#[derive(Clone)]
pub struct DbResultSink {
    db: DatabaseConnection,
    mongo: Option<mongodb::Database>,
}

impl DbResultSink {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db, mongo: None }
    }

    /// Also write each result's trace to MongoDB; mirror failures are only logged
    pub fn with_mongo(mut self, mongo: mongodb::Database) -> Self {
        self.mongo = Some(mongo);
        self
    }
}

#[async_trait]
impl ResultSink for DbResultSink {
    async fn create_execution(&self, e: &Execution) -> AppResult<()> {
        let model = execution::ActiveModel {
            id: Set(e.id),
            execution_type: Set(e.execution_type.as_str().to_string()),
            targets: Set(serde_json::to_value(&e.targets)?),
            executor_id: Set(e.executor_id),
            environment_id: Set(e.environment_id),
            status: Set(e.status.as_str().to_string()),
            override_variables: Set(serde_json::to_value(&e.override_variables)?),
            config: Set(serde_json::to_value(&e.config)?),
            created_at: Set(e.created_at),
            started_at: Set(e.started_at),
            finished_at: Set(e.finished_at),
        };

        model.insert(&self.db).await?;
        Ok(())
    }

    async fn append_result(&self, r: &TestResult) -> AppResult<()> {
        let model = test_result::ActiveModel {
            id: Set(r.id),
            execution_id: Set(r.execution_id),
            case_id: Set(r.case_id),
            position: Set(r.position),
            status: Set(r.status.as_str().to_string()),
            request_data: Set(r.request_data.as_ref().map(serde_json::to_value).transpose()?),
            response_data: Set(r.response_data.as_ref().map(serde_json::to_value).transpose()?),
            assertion_results: Set(serde_json::to_value(&r.assertion_results)?),
            duration_ms: Set(r.duration_ms),
            error_message: Set(r.error_message.clone()),
            created_at: Set(r.created_at),
        };

        model.insert(&self.db).await?;

        if let Some(mongo) = &self.mongo {
            if let Err(e) = MongoRepository::save_execution_log(mongo, r).await {
                tracing::warn!(
                    execution_id = %r.execution_id,
                    case_id = %r.case_id,
                    error = %e,
                    "Failed to mirror execution log"
                );
            }
        }

        Ok(())
    }

    async fn update_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        started_at: Option<OffsetDateTime>,
        finished_at: Option<OffsetDateTime>,
    ) -> AppResult<()> {
        let model = ExecutionEntity::find_by_id(execution_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Execution".to_string()))?;

        let mut active: execution::ActiveModel = model.into();
        active.status = Set(status.as_str().to_string());
        if started_at.is_some() {
            active.started_at = Set(started_at);
        }
        if finished_at.is_some() {
            active.finished_at = Set(finished_at);
        }

        active.update(&self.db).await?;

        tracing::debug!(
            execution_id = %execution_id,
            status = status.as_str(),
            "Execution status updated"
        );

        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> AppResult<Execution> {
        let model = ExecutionEntity::find_by_id(execution_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Execution".to_string()))?;

        model.try_into()
    }

    async fn list_results(&self, execution_id: Uuid) -> AppResult<Vec<TestResult>> {
        let models = TestResultEntity::find()
            .filter(ResultColumn::ExecutionId.eq(execution_id))
            .order_by_asc(ResultColumn::Position)
            .all(&self.db)
            .await?;

        models.into_iter().map(TestResult::try_from).collect()
    }
}

impl TryFrom<execution::Model> for Execution {
    type Error = AppError;

    fn try_from(m: execution::Model) -> AppResult<Self> {
        Ok(Self {
            id: m.id,
            execution_type: ExecutionType::parse(&m.execution_type).ok_or_else(|| {
                AppError::Internal(format!("Unknown execution type: {}", m.execution_type))
            })?,
            targets: serde_json::from_value(m.targets)?,
            executor_id: m.executor_id,
            environment_id: m.environment_id,
            status: ExecutionStatus::parse(&m.status).ok_or_else(|| {
                AppError::Internal(format!("Unknown execution status: {}", m.status))
            })?,
            override_variables: serde_json::from_value(m.override_variables)?,
            config: serde_json::from_value(m.config)?,
            created_at: m.created_at,
            started_at: m.started_at,
            finished_at: m.finished_at,
        })
    }
}

impl TryFrom<test_result::Model> for TestResult {
    type Error = AppError;

    fn try_from(m: test_result::Model) -> AppResult<Self> {
        Ok(Self {
            id: m.id,
            execution_id: m.execution_id,
            case_id: m.case_id,
            position: m.position,
            status: TestResultStatus::parse(&m.status).ok_or_else(|| {
                AppError::Internal(format!("Unknown result status: {}", m.status))
            })?,
            request_data: m.request_data.map(serde_json::from_value).transpose()?,
            response_data: m.response_data.map(serde_json::from_value).transpose()?,
            assertion_results: serde_json::from_value(m.assertion_results)?,
            duration_ms: m.duration_ms,
            error_message: m.error_message,
            created_at: m.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CaseTarget;
    use serde_json::json;

    #[test]
    fn test_execution_model_conversion() {
        let case_id = Uuid::new_v4();
        let model = execution::Model {
            id: Uuid::new_v4(),
            execution_type: "scenario".to_string(),
            targets: json!([{"case_id": case_id, "extract": [{"json_path": "$.token", "variable": "token"}]}]),
            executor_id: Uuid::new_v4(),
            environment_id: None,
            status: "running".to_string(),
            override_variables: json!({"id": 7}),
            config: json!({"stop_on_failure": true}),
            created_at: OffsetDateTime::now_utc(),
            started_at: Some(OffsetDateTime::now_utc()),
            finished_at: None,
        };

        let execution = Execution::try_from(model).unwrap();
        assert_eq!(execution.execution_type, ExecutionType::Scenario);
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(
            execution.targets,
            vec![CaseTarget::new(case_id).extract("$.token", "token")]
        );
        assert!(execution.config.stop_on_failure);
        assert_eq!(execution.override_variables["id"], json!(7));
    }

    #[test]
    fn test_result_model_rejects_unknown_status() {
        let model = test_result::Model {
            id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            position: 0,
            status: "flaky".to_string(),
            request_data: None,
            response_data: None,
            assertion_results: json!([]),
            duration_ms: 0,
            error_message: None,
            created_at: OffsetDateTime::now_utc(),
        };

        assert!(matches!(
            TestResult::try_from(model),
            Err(AppError::Internal(_))
        ));
    }
}
