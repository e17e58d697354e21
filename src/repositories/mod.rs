pub mod case;
pub mod memory;
pub mod mongo;
pub mod result;
pub mod variable;

pub use case::DbCaseRepository;
pub use memory::InMemoryStore;
pub use result::DbResultSink;
pub use variable::DbVariableStore;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    ApiDefinition, Environment, Execution, ExecutionStatus, TestCase, TestResult, TypedValue,
    Variable, VariableScope,
};

/// Key that selects one namespace of a scope.
///
/// Global has a single namespace; personal is keyed by user, environment by
/// environment, temporary by execution and optionally by case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKey {
    Global,
    User(Uuid),
    Environment(Uuid),
    Execution {
        execution_id: Uuid,
        case_id: Option<Uuid>,
    },
}

impl OwnerKey {
    pub fn scope(&self) -> VariableScope {
        match self {
            Self::Global => VariableScope::Global,
            Self::User(_) => VariableScope::Personal,
            Self::Environment(_) => VariableScope::Environment,
            Self::Execution { .. } => VariableScope::Temporary,
        }
    }
}

/// Backing store for all four variable scopes
#[async_trait]
pub trait VariableStore: Send + Sync {
    /// Fetch one binding; `Ok(None)` when the name is unbound in that namespace
    async fn get(&self, key: OwnerKey, name: &str) -> AppResult<Option<Variable>>;

    /// Bind a temporary variable for one execution (and optionally one case)
    async fn set_temporary(
        &self,
        execution_id: Uuid,
        case_id: Option<Uuid>,
        name: &str,
        value: TypedValue,
    ) -> AppResult<()>;

    /// Drop every temporary variable belonging to an execution
    async fn delete_all_temporary(&self, execution_id: Uuid) -> AppResult<()>;
}

/// Read access to stored cases and their definitions
#[async_trait]
pub trait CaseRepository: Send + Sync {
    async fn get_case(&self, id: Uuid) -> AppResult<TestCase>;

    async fn get_api_definition(&self, id: Uuid) -> AppResult<ApiDefinition>;

    async fn get_environment(&self, id: Uuid) -> AppResult<Environment>;
}

/// Durable sink for execution records and their append-only results
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn create_execution(&self, execution: &Execution) -> AppResult<()>;

    async fn append_result(&self, result: &TestResult) -> AppResult<()>;

    async fn update_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        started_at: Option<OffsetDateTime>,
        finished_at: Option<OffsetDateTime>,
    ) -> AppResult<()>;

    async fn get_execution(&self, execution_id: Uuid) -> AppResult<Execution>;

    /// Results recorded so far, ordered by position
    async fn list_results(&self, execution_id: Uuid) -> AppResult<Vec<TestResult>>;
}
