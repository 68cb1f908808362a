//! Database migrations (forward-only)

use sea_orm_migration::prelude::*;

mod m20250101_000001_create_asset_tables;
mod m20250205_000001_add_is_missing_to_cache_states;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_asset_tables::Migration),
            Box::new(m20250205_000001_add_is_missing_to_cache_states::Migration),
        ]
    }
}
