//! SeaORM entities for the asset registry schema

pub mod asset;
pub mod asset_reference;
pub mod cache_state;
pub mod reference_meta;
pub mod reference_tag;
pub mod tag;
