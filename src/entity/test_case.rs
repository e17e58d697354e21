use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "test_cases")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub api_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub request_data: Json,
    #[sea_orm(column_type = "Json")]
    pub expected_response: Json,
    #[sea_orm(column_type = "Json")]
    pub assertions: Json,
    pub created_at: TimeDateTimeWithTimeZone,
    pub updated_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::api_definition::Entity",
        from = "Column::ApiId",
        to = "super::api_definition::Column::Id"
    )]
    ApiDefinition,
}

impl Related<super::api_definition::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApiDefinition.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
