use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "executions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub execution_type: String,
    /// Ordered case targets with their extractions
    #[sea_orm(column_type = "Json")]
    pub targets: Json,
    pub executor_id: Uuid,
    pub environment_id: Option<Uuid>,
    pub status: String,
    #[sea_orm(column_type = "Json")]
    pub override_variables: Json,
    #[sea_orm(column_type = "Json")]
    pub config: Json,
    pub created_at: TimeDateTimeWithTimeZone,
    pub started_at: Option<TimeDateTimeWithTimeZone>,
    pub finished_at: Option<TimeDateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::test_result::Entity")]
    TestResults,
}

impl Related<super::test_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TestResults.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
