use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};
use uuid::Uuid;

use crate::entity::api_definition::{self, Entity as ApiDefinitionEntity};
use crate::entity::environment::{self, Entity as EnvironmentEntity};
use crate::entity::test_case::{self, Entity as TestCaseEntity};
use crate::error::{AppError, AppResult};
use crate::models::{ApiDefinition, Environment, HttpMethod, TestCase};
use crate::repositories::CaseRepository;

/// Read-only access to cases, API definitions and environments in PostgreSQL
#[derive(Clone)]
pub struct DbCaseRepository {
    db: DatabaseConnection,
}

impl DbCaseRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CaseRepository for DbCaseRepository {
    async fn get_case(&self, id: Uuid) -> AppResult<TestCase> {
        let model = TestCaseEntity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Test case".to_string()))?;

        model.try_into()
    }

    async fn get_api_definition(&self, id: Uuid) -> AppResult<ApiDefinition> {
        let model = ApiDefinitionEntity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("API definition".to_string()))?;

        model.try_into()
    }

    async fn get_environment(&self, id: Uuid) -> AppResult<Environment> {
        let model = EnvironmentEntity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Environment".to_string()))?;

        model.try_into()
    }
}

// JSON columns are decoded on the way out, so conversions can fail
impl TryFrom<test_case::Model> for TestCase {
    type Error = AppError;

    fn try_from(m: test_case::Model) -> AppResult<Self> {
        Ok(Self {
            id: m.id,
            api_id: m.api_id,
            name: m.name,
            description: m.description,
            request_data: serde_json::from_value(m.request_data)?,
            expected_response: m.expected_response,
            assertions: serde_json::from_value(m.assertions)?,
            created_at: m.created_at,
            updated_at: m.updated_at,
        })
    }
}

impl TryFrom<api_definition::Model> for ApiDefinition {
    type Error = AppError;

    fn try_from(m: api_definition::Model) -> AppResult<Self> {
        Ok(Self {
            id: m.id,
            name: m.name,
            method: HttpMethod::parse(&m.http_method)?,
            url: m.url,
            headers: serde_json::from_value(m.headers)?,
            query_params: serde_json::from_value(m.query_params)?,
            body: m.body,
            description: m.description,
            created_at: m.created_at,
            updated_at: m.updated_at,
        })
    }
}

impl TryFrom<environment::Model> for Environment {
    type Error = AppError;

    fn try_from(m: environment::Model) -> AppResult<Self> {
        Ok(Self {
            id: m.id,
            name: m.name,
            base_url: m.base_url,
            headers: serde_json::from_value(m.headers)?,
            created_at: m.created_at,
            updated_at: m.updated_at,
        })
    }
}
