//! ReferenceMeta entity: typed projection of user metadata
//!
//! One row per `(reference_id, key, ordinal)`. Exactly one of the four value
//! columns is set; all four null encodes an explicit JSON null.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reference_meta")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub reference_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub ordinal: i32,
    pub val_str: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((38, 10)))")]
    pub val_num: Option<Decimal>,
    pub val_bool: Option<bool>,
    pub val_json: Option<Json>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::asset_reference::Entity",
        from = "Column::ReferenceId",
        to = "super::asset_reference::Column::Id"
    )]
    AssetReference,
}

impl Related<super::asset_reference::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AssetReference.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
