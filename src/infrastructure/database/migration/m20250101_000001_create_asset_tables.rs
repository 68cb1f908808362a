//! Initial migration creating the asset registry tables

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create assets table
        manager
            .create_table(
                Table::create()
                    .table(Assets::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Assets::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Assets::Hash).string())
                    .col(
                        ColumnDef::new(Assets::SizeBytes)
                            .big_integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(Assets::SizeBytes).gte(0)),
                    )
                    .col(ColumnDef::new(Assets::MimeType).string())
                    .col(
                        ColumnDef::new(Assets::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_assets_hash")
                    .table(Assets::Table)
                    .col(Assets::Hash)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create asset_references table
        manager
            .create_table(
                Table::create()
                    .table(AssetReferences::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AssetReferences::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AssetReferences::AssetId).uuid().not_null())
                    .col(
                        ColumnDef::new(AssetReferences::OwnerId)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(AssetReferences::Name).string().not_null())
                    .col(ColumnDef::new(AssetReferences::PreviewId).uuid())
                    .col(ColumnDef::new(AssetReferences::UserMetadata).json())
                    .col(
                        ColumnDef::new(AssetReferences::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AssetReferences::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AssetReferences::LastAccessTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AssetReferences::EnrichmentLevel)
                            .integer()
                            .not_null()
                            .default(0)
                            .check(
                                Expr::col(AssetReferences::EnrichmentLevel)
                                    .gte(0)
                                    .and(Expr::col(AssetReferences::EnrichmentLevel).lte(2)),
                            ),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(AssetReferences::Table, AssetReferences::AssetId)
                            .to(Assets::Table, Assets::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(AssetReferences::Table, AssetReferences::PreviewId)
                            .to(Assets::Table, Assets::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_asset_references_asset_owner_name")
                    .table(AssetReferences::Table)
                    .col(AssetReferences::AssetId)
                    .col(AssetReferences::OwnerId)
                    .col(AssetReferences::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        for (name, column) in [
            ("ix_asset_references_owner_id", AssetReferences::OwnerId),
            ("ix_asset_references_name", AssetReferences::Name),
            ("ix_asset_references_created_at", AssetReferences::CreatedAt),
            (
                "ix_asset_references_last_access_time",
                AssetReferences::LastAccessTime,
            ),
            (
                "ix_asset_references_enrichment_level",
                AssetReferences::EnrichmentLevel,
            ),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(AssetReferences::Table)
                        .col(column)
                        .to_owned(),
                )
                .await?;
        }

        // Create cache_states table
        manager
            .create_table(
                Table::create()
                    .table(CacheStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CacheStates::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CacheStates::AssetId).uuid().not_null())
                    .col(ColumnDef::new(CacheStates::FilePath).text().not_null())
                    .col(ColumnDef::new(CacheStates::MtimeNs).big_integer())
                    .col(
                        ColumnDef::new(CacheStates::NeedsVerify)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(CacheStates::Table, CacheStates::AssetId)
                            .to(Assets::Table, Assets::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_cache_states_file_path")
                    .table(CacheStates::Table)
                    .col(CacheStates::FilePath)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("ix_cache_states_asset_id")
                    .table(CacheStates::Table)
                    .col(CacheStates::AssetId)
                    .to_owned(),
            )
            .await?;

        // Create tags table
        manager
            .create_table(
                Table::create()
                    .table(Tags::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tags::Name).string().not_null().primary_key())
                    .col(ColumnDef::new(Tags::TagType).string().not_null())
                    .to_owned(),
            )
            .await?;

        // Create reference_tags junction table
        manager
            .create_table(
                Table::create()
                    .table(ReferenceTags::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ReferenceTags::ReferenceId).uuid().not_null())
                    .col(ColumnDef::new(ReferenceTags::TagName).string().not_null())
                    .col(
                        ColumnDef::new(ReferenceTags::Origin)
                            .string()
                            .not_null()
                            .default("manual"),
                    )
                    .col(
                        ColumnDef::new(ReferenceTags::AddedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(ReferenceTags::ReferenceId)
                            .col(ReferenceTags::TagName),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(ReferenceTags::Table, ReferenceTags::ReferenceId)
                            .to(AssetReferences::Table, AssetReferences::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(ReferenceTags::Table, ReferenceTags::TagName)
                            .to(Tags::Table, Tags::Name)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("ix_reference_tags_tag_name")
                    .table(ReferenceTags::Table)
                    .col(ReferenceTags::TagName)
                    .to_owned(),
            )
            .await?;

        // Create reference_meta projection table
        manager
            .create_table(
                Table::create()
                    .table(ReferenceMeta::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ReferenceMeta::ReferenceId).uuid().not_null())
                    .col(ColumnDef::new(ReferenceMeta::Key).string().not_null())
                    .col(
                        ColumnDef::new(ReferenceMeta::Ordinal)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ReferenceMeta::ValStr).string())
                    .col(ColumnDef::new(ReferenceMeta::ValNum).decimal_len(16, 10))
                    .col(ColumnDef::new(ReferenceMeta::ValBool).boolean())
                    .col(ColumnDef::new(ReferenceMeta::ValJson).json())
                    .primary_key(
                        Index::create()
                            .col(ReferenceMeta::ReferenceId)
                            .col(ReferenceMeta::Key)
                            .col(ReferenceMeta::Ordinal),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(ReferenceMeta::Table, ReferenceMeta::ReferenceId)
                            .to(AssetReferences::Table, AssetReferences::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("ix_reference_meta_key")
                    .table(ReferenceMeta::Table)
                    .col(ReferenceMeta::Key)
                    .to_owned(),
            )
            .await?;

        for (name, value_col) in [
            ("ix_reference_meta_key_val_str", ReferenceMeta::ValStr),
            ("ix_reference_meta_key_val_num", ReferenceMeta::ValNum),
            ("ix_reference_meta_key_val_bool", ReferenceMeta::ValBool),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(ReferenceMeta::Table)
                        .col(ReferenceMeta::Key)
                        .col(value_col)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReferenceMeta::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ReferenceTags::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tags::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CacheStates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AssetReferences::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Assets::Table).to_owned())
            .await?;

        Ok(())
    }
}

// Table identifiers

#[derive(Iden)]
enum Assets {
    Table,
    Id,
    Hash,
    SizeBytes,
    MimeType,
    CreatedAt,
}

#[derive(Iden)]
enum AssetReferences {
    Table,
    Id,
    AssetId,
    OwnerId,
    Name,
    PreviewId,
    UserMetadata,
    CreatedAt,
    UpdatedAt,
    LastAccessTime,
    EnrichmentLevel,
}

#[derive(Iden)]
enum CacheStates {
    Table,
    Id,
    AssetId,
    FilePath,
    MtimeNs,
    NeedsVerify,
}

#[derive(Iden)]
enum Tags {
    Table,
    Name,
    TagType,
}

#[derive(Iden)]
enum ReferenceTags {
    Table,
    ReferenceId,
    TagName,
    Origin,
    AddedAt,
}

#[derive(Iden)]
enum ReferenceMeta {
    Table,
    ReferenceId,
    Key,
    Ordinal,
    ValStr,
    ValNum,
    ValBool,
    ValJson,
}
