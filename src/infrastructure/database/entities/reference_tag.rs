//! ReferenceTag entity: many-to-many link between references and tags

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How a tag ended up on a reference.
pub const ORIGIN_MANUAL: &str = "manual";
pub const ORIGIN_AUTOMATIC: &str = "automatic";

/// Tag name the reconciler toggles on references whose files disappeared.
pub const MISSING_TAG: &str = "missing";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reference_tags")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub reference_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub tag_name: String,
    pub origin: String,
    pub added_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::asset_reference::Entity",
        from = "Column::ReferenceId",
        to = "super::asset_reference::Column::Id"
    )]
    AssetReference,
    #[sea_orm(
        belongs_to = "super::tag::Entity",
        from = "Column::TagName",
        to = "super::tag::Column::Name"
    )]
    Tag,
}

impl Related<super::asset_reference::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AssetReference.def()
    }
}

impl Related<super::tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tag.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
