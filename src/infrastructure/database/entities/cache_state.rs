//! CacheState entity: binds an asset to an absolute filesystem path

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cache_states")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub asset_id: Uuid,
    /// Globally unique across all rows, active or missing. The unique index
    /// on this column is the serialization point for concurrent ingest.
    #[sea_orm(unique)]
    pub file_path: String,
    pub mtime_ns: Option<i64>,
    pub needs_verify: bool,
    /// Soft delete: set when the file vanishes or falls outside every
    /// configured root, cleared when the path reappears.
    pub is_missing: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::asset::Entity",
        from = "Column::AssetId",
        to = "super::asset::Column::Id"
    )]
    Asset,
}

impl Related<super::asset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Asset.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
