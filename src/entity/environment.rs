use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "environments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub base_url: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub headers: Json,
    pub created_at: TimeDateTimeWithTimeZone,
    pub updated_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::variable::Entity")]
    Variables,
}

impl Related<super::variable::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Variables.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
