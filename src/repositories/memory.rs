use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    ApiDefinition, Environment, Execution, ExecutionStatus, TestCase, TestResult, TypedValue,
    Variable, VariableScope,
};
use crate::repositories::{CaseRepository, OwnerKey, ResultSink, VariableStore};

/// In-memory implementation of every store trait, for tests and embedding
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<InMemoryStoreInner>>,
    fail_result_writes: Arc<AtomicBool>,
}

#[derive(Default)]
struct InMemoryStoreInner {
    variables: HashMap<(OwnerKey, String), Variable>,
    cases: HashMap<Uuid, TestCase>,
    apis: HashMap<Uuid, ApiDefinition>,
    environments: HashMap<Uuid, Environment>,
    executions: HashMap<Uuid, Execution>,
    results: HashMap<Uuid, Vec<TestResult>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a durable variable; the name is unique per namespace
    pub async fn put_variable(&self, variable: Variable) -> AppResult<()> {
        let key = match variable.scope {
            VariableScope::Global => OwnerKey::Global,
            VariableScope::Personal => OwnerKey::User(variable.owner_id.ok_or_else(|| {
                AppError::Validation("Personal variable requires an owner".to_string())
            })?),
            VariableScope::Environment => {
                OwnerKey::Environment(variable.environment_id.ok_or_else(|| {
                    AppError::Validation("Environment variable requires an environment".to_string())
                })?)
            }
            VariableScope::Temporary => {
                return Err(AppError::Validation(
                    "Temporary variables are written through set_temporary".to_string(),
                ))
            }
        };

        let mut inner = self.inner.write().await;
        inner.variables.insert((key, variable.name.clone()), variable);
        Ok(())
    }

    pub async fn put_api(&self, api: ApiDefinition) {
        self.inner.write().await.apis.insert(api.id, api);
    }

    pub async fn put_case(&self, case: TestCase) {
        self.inner.write().await.cases.insert(case.id, case);
    }

    pub async fn put_environment(&self, environment: Environment) {
        self.inner
            .write()
            .await
            .environments
            .insert(environment.id, environment);
    }

    /// Number of temporary bindings still held for an execution
    pub async fn temporary_count(&self, execution_id: Uuid) -> usize {
        let inner = self.inner.read().await;
        inner
            .variables
            .keys()
            .filter(|(key, _)| {
                matches!(key, OwnerKey::Execution { execution_id: id, .. } if *id == execution_id)
            })
            .count()
    }

    /// Make every subsequent `append_result` fail, to exercise fatal store errors
    pub fn fail_result_writes(&self, fail: bool) {
        self.fail_result_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl VariableStore for InMemoryStore {
    async fn get(&self, key: OwnerKey, name: &str) -> AppResult<Option<Variable>> {
        let inner = self.inner.read().await;
        Ok(inner.variables.get(&(key, name.to_string())).cloned())
    }

    async fn set_temporary(
        &self,
        execution_id: Uuid,
        case_id: Option<Uuid>,
        name: &str,
        value: TypedValue,
    ) -> AppResult<()> {
        let key = OwnerKey::Execution {
            execution_id,
            case_id,
        };
        let variable = Variable::new(VariableScope::Temporary, name, value.raw, value.kind);

        let mut inner = self.inner.write().await;
        inner.variables.insert((key, name.to_string()), variable);
        Ok(())
    }

    async fn delete_all_temporary(&self, execution_id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.variables.retain(|(key, _), _| {
            !matches!(key, OwnerKey::Execution { execution_id: id, .. } if *id == execution_id)
        });
        Ok(())
    }
}

#[async_trait]
impl CaseRepository for InMemoryStore {
    async fn get_case(&self, id: Uuid) -> AppResult<TestCase> {
        let inner = self.inner.read().await;
        inner
            .cases
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("TestCase".to_string()))
    }

    async fn get_api_definition(&self, id: Uuid) -> AppResult<ApiDefinition> {
        let inner = self.inner.read().await;
        inner
            .apis
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("ApiDefinition".to_string()))
    }

    async fn get_environment(&self, id: Uuid) -> AppResult<Environment> {
        let inner = self.inner.read().await;
        inner
            .environments
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Environment".to_string()))
    }
}

#[async_trait]
impl ResultSink for InMemoryStore {
    async fn create_execution(&self, execution: &Execution) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if inner.executions.contains_key(&execution.id) {
            return Err(AppError::Conflict("Execution".to_string()));
        }
        inner.executions.insert(execution.id, execution.clone());
        inner.results.entry(execution.id).or_default();
        Ok(())
    }

    async fn append_result(&self, result: &TestResult) -> AppResult<()> {
        if self.fail_result_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database("result store unavailable".to_string()));
        }

        let mut inner = self.inner.write().await;
        inner
            .results
            .entry(result.execution_id)
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn update_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        started_at: Option<OffsetDateTime>,
        finished_at: Option<OffsetDateTime>,
    ) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let execution = inner
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| AppError::NotFound("Execution".to_string()))?;

        execution.status = status;
        if started_at.is_some() {
            execution.started_at = started_at;
        }
        if finished_at.is_some() {
            execution.finished_at = finished_at;
        }
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> AppResult<Execution> {
        let inner = self.inner.read().await;
        inner
            .executions
            .get(&execution_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Execution".to_string()))
    }

    async fn list_results(&self, execution_id: Uuid) -> AppResult<Vec<TestResult>> {
        let inner = self.inner.read().await;
        let mut results = inner.results.get(&execution_id).cloned().unwrap_or_default();
        results.sort_by_key(|r| r.position);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionType, TestResultStatus, VariableType};

    #[tokio::test]
    async fn test_variable_namespaces() {
        let store = InMemoryStore::new();
        let env_id = Uuid::new_v4();

        store.put_variable(Variable::global("host", "global")).await.unwrap();
        store
            .put_variable(Variable::environment(env_id, "host", "env"))
            .await
            .unwrap();

        let global = store.get(OwnerKey::Global, "host").await.unwrap().unwrap();
        assert_eq!(global.value, "global");

        let env = store
            .get(OwnerKey::Environment(env_id), "host")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.value, "env");

        let other_env = store
            .get(OwnerKey::Environment(Uuid::new_v4()), "host")
            .await
            .unwrap();
        assert!(other_env.is_none());
    }

    #[tokio::test]
    async fn test_put_variable_replaces_same_name() {
        let store = InMemoryStore::new();
        store.put_variable(Variable::global("a", "1")).await.unwrap();
        store.put_variable(Variable::global("a", "2")).await.unwrap();

        let var = store.get(OwnerKey::Global, "a").await.unwrap().unwrap();
        assert_eq!(var.value, "2");
    }

    #[tokio::test]
    async fn test_personal_variable_requires_owner() {
        let store = InMemoryStore::new();
        let var = Variable::new(VariableScope::Personal, "a", "1", VariableType::String);
        assert!(matches!(
            store.put_variable(var).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_temporary_lifecycle() {
        let store = InMemoryStore::new();
        let execution_id = Uuid::new_v4();
        let case_id = Uuid::new_v4();

        store
            .set_temporary(execution_id, None, "token", TypedValue::text("abc"))
            .await
            .unwrap();
        store
            .set_temporary(execution_id, Some(case_id), "token", TypedValue::text("xyz"))
            .await
            .unwrap();
        assert_eq!(store.temporary_count(execution_id).await, 2);

        let shared = store
            .get(
                OwnerKey::Execution {
                    execution_id,
                    case_id: None,
                },
                "token",
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shared.value, "abc");

        store.delete_all_temporary(execution_id).await.unwrap();
        assert_eq!(store.temporary_count(execution_id).await, 0);
    }

    #[tokio::test]
    async fn test_results_listed_by_position() {
        let store = InMemoryStore::new();
        let execution = Execution::new(ExecutionType::Batch, vec![], Uuid::new_v4(), None);
        store.create_execution(&execution).await.unwrap();

        for position in [2, 0, 1] {
            let result = TestResult::new(
                execution.id,
                Uuid::new_v4(),
                position,
                TestResultStatus::Pass,
            );
            store.append_result(&result).await.unwrap();
        }

        let positions: Vec<i32> = store
            .list_results(execution.id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.position)
            .collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failing_result_writes() {
        let store = InMemoryStore::new();
        store.fail_result_writes(true);

        let result = TestResult::new(Uuid::new_v4(), Uuid::new_v4(), 0, TestResultStatus::Pass);
        assert!(matches!(
            store.append_result(&result).await,
            Err(AppError::Database(_))
        ));
    }
}
