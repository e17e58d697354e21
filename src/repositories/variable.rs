use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnectionManager;
use redis::AsyncCommands;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Select};
use uuid::Uuid;

use crate::entity::variable::{self, Column, Entity as VariableEntity};
use crate::error::{AppError, AppResult};
use crate::models::{TypedValue, Variable, VariableScope, VariableType};
use crate::repositories::{OwnerKey, VariableStore};

/// Redis keys structure:
/// - serval:temp:{execution_id}    - Hash of temporary bindings, field `{case_id|*}:{name}`
const TEMP_PREFIX: &str = "serval:temp:";
const EXECUTION_WIDE: &str = "*";

/// Durable scopes live in PostgreSQL; temporary bindings in a Redis hash
/// per execution that expires even if cleanup never runs
#[derive(Clone)]
pub struct DbVariableStore {
    db: DatabaseConnection,
    redis: RedisConnectionManager,
    temp_ttl_seconds: u64,
}

impl DbVariableStore {
    pub fn new(db: DatabaseConnection, redis: RedisConnectionManager, temp_ttl_seconds: u64) -> Self {
        Self {
            db,
            redis,
            temp_ttl_seconds,
        }
    }

    fn temp_key(execution_id: Uuid) -> String {
        format!("{}{}", TEMP_PREFIX, execution_id)
    }

    fn temp_field(case_id: Option<Uuid>, name: &str) -> String {
        match case_id {
            Some(case_id) => format!("{}:{}", case_id, name),
            None => format!("{}:{}", EXECUTION_WIDE, name),
        }
    }

    fn durable_query(key: OwnerKey, name: &str) -> Option<Select<VariableEntity>> {
        let query = VariableEntity::find().filter(Column::Name.eq(name));
        let query = match key {
            OwnerKey::Global => query.filter(Column::Scope.eq(VariableScope::Global.as_str())),
            OwnerKey::User(user_id) => query
                .filter(Column::Scope.eq(VariableScope::Personal.as_str()))
                .filter(Column::OwnerId.eq(user_id)),
            OwnerKey::Environment(environment_id) => query
                .filter(Column::Scope.eq(VariableScope::Environment.as_str()))
                .filter(Column::EnvironmentId.eq(environment_id)),
            OwnerKey::Execution { .. } => return None,
        };
        Some(query)
    }

    async fn get_temporary(
        &self,
        execution_id: Uuid,
        case_id: Option<Uuid>,
        name: &str,
    ) -> AppResult<Option<Variable>> {
        let mut conn = self.redis.clone();
        let stored: Option<String> = conn
            .hget(Self::temp_key(execution_id), Self::temp_field(case_id, name))
            .await?;

        match stored {
            Some(json) => {
                let value: TypedValue = serde_json::from_str(&json)?;
                Ok(Some(Variable::new(
                    VariableScope::Temporary,
                    name,
                    value.raw,
                    value.kind,
                )))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl VariableStore for DbVariableStore {
    async fn get(&self, key: OwnerKey, name: &str) -> AppResult<Option<Variable>> {
        if let OwnerKey::Execution {
            execution_id,
            case_id,
        } = key
        {
            return self.get_temporary(execution_id, case_id, name).await;
        }

        let Some(query) = Self::durable_query(key, name) else {
            return Ok(None);
        };

        match query.one(&self.db).await? {
            Some(model) => Ok(Some(model.try_into()?)),
            None => Ok(None),
        }
    }

    async fn set_temporary(
        &self,
        execution_id: Uuid,
        case_id: Option<Uuid>,
        name: &str,
        value: TypedValue,
    ) -> AppResult<()> {
        let mut conn = self.redis.clone();
        let key = Self::temp_key(execution_id);

        let _: () = conn
            .hset(&key, Self::temp_field(case_id, name), serde_json::to_string(&value)?)
            .await?;
        let _: () = conn.expire(&key, self.temp_ttl_seconds as i64).await?;

        tracing::debug!(
            execution_id = %execution_id,
            case_id = ?case_id,
            name = %name,
            "Temporary variable set"
        );

        Ok(())
    }

    async fn delete_all_temporary(&self, execution_id: Uuid) -> AppResult<()> {
        let mut conn = self.redis.clone();
        let _: () = conn.del(Self::temp_key(execution_id)).await?;

        tracing::debug!(execution_id = %execution_id, "Temporary variables cleared");
        Ok(())
    }
}

impl TryFrom<variable::Model> for Variable {
    type Error = AppError;

    fn try_from(m: variable::Model) -> AppResult<Self> {
        let scope = VariableScope::parse(&m.scope).ok_or_else(|| {
            AppError::Internal(format!("Unknown variable scope: {}", m.scope))
        })?;
        let var_type = VariableType::parse(&m.var_type).ok_or_else(|| {
            AppError::Internal(format!("Unknown variable type: {}", m.var_type))
        })?;

        Ok(Self {
            id: m.id,
            name: m.name,
            value: m.value,
            var_type,
            scope,
            owner_id: m.owner_id,
            environment_id: m.environment_id,
            description: m.description,
            is_sensitive: m.is_sensitive,
            created_at: m.created_at,
            updated_at: m.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn test_temp_key_layout() {
        let execution_id = Uuid::nil();
        assert_eq!(
            DbVariableStore::temp_key(execution_id),
            "serval:temp:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(DbVariableStore::temp_field(None, "token"), "*:token");
        assert_eq!(
            DbVariableStore::temp_field(Some(Uuid::nil()), "token"),
            "00000000-0000-0000-0000-000000000000:token"
        );
    }

    #[test]
    fn test_execution_key_has_no_durable_query() {
        let key = OwnerKey::Execution {
            execution_id: Uuid::new_v4(),
            case_id: None,
        };
        assert!(DbVariableStore::durable_query(key, "x").is_none());
        assert!(DbVariableStore::durable_query(OwnerKey::Global, "x").is_some());
    }

    #[test]
    fn test_variable_model_conversion() {
        let now = OffsetDateTime::now_utc();
        let owner = Uuid::new_v4();
        let model = variable::Model {
            id: Uuid::new_v4(),
            name: "retries".to_string(),
            value: "3".to_string(),
            var_type: "number".to_string(),
            scope: "personal".to_string(),
            owner_id: Some(owner),
            environment_id: None,
            description: None,
            is_sensitive: false,
            created_at: now,
            updated_at: now,
        };

        let var = Variable::try_from(model).unwrap();
        assert_eq!(var.scope, VariableScope::Personal);
        assert_eq!(var.var_type, VariableType::Number);
        assert_eq!(var.owner_id, Some(owner));
    }

    #[test]
    fn test_variable_model_rejects_unknown_scope() {
        let now = OffsetDateTime::now_utc();
        let model = variable::Model {
            id: Uuid::new_v4(),
            name: "x".to_string(),
            value: "1".to_string(),
            var_type: "string".to_string(),
            scope: "session".to_string(),
            owner_id: None,
            environment_id: None,
            description: None,
            is_sensitive: false,
            created_at: now,
            updated_at: now,
        };

        assert!(matches!(
            Variable::try_from(model),
            Err(AppError::Internal(_))
        ));
    }
}
