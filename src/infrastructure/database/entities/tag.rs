//! Tag entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tags")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,
    pub tag_type: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::reference_tag::Entity")]
    ReferenceTags,
}

impl Related<super::reference_tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReferenceTags.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
