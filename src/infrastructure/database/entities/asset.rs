//! Asset entity: one content identity per distinct byte sequence

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Canonical form `blake3:<64-hex>`. None marks a stub whose bytes are
    /// known to exist on disk but have not been hashed yet.
    #[sea_orm(unique)]
    pub hash: Option<String>,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::asset_reference::Entity")]
    AssetReferences,
    #[sea_orm(has_many = "super::cache_state::Entity")]
    CacheStates,
}

impl Related<super::asset_reference::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AssetReferences.def()
    }
}

impl Related<super::cache_state::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CacheStates.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Stub assets carry no hash yet.
    pub fn is_stub(&self) -> bool {
        self.hash.is_none()
    }
}
