//! AssetReference entity: a named, owned, taggable handle to an asset

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "asset_references")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub asset_id: Uuid,
    /// Empty string marks a public reference visible to everyone.
    pub owner_id: String,
    pub name: String,
    pub preview_id: Option<Uuid>,
    pub user_metadata: Option<Json>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub last_access_time: DateTimeUtc,
    /// 0 = stub, 1 = metadata extracted, 2 = fully hashed.
    pub enrichment_level: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::asset::Entity",
        from = "Column::AssetId",
        to = "super::asset::Column::Id"
    )]
    Asset,
    #[sea_orm(has_many = "super::reference_tag::Entity")]
    ReferenceTags,
    #[sea_orm(has_many = "super::reference_meta::Entity")]
    ReferenceMeta,
}

impl Related<super::asset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Asset.def()
    }
}

impl Related<super::reference_tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReferenceTags.def()
    }
}

impl Related<super::reference_meta::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReferenceMeta.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Visibility rule: public references belong to everyone, otherwise only
    /// the owner may see or mutate the reference.
    pub fn visible_to(&self, owner_id: &str) -> bool {
        self.owner_id.is_empty() || self.owner_id == owner_id
    }
}
