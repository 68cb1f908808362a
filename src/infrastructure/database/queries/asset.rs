//! Asset table queries

use crate::error::RegistryResult;
use crate::infrastructure::database::entities::{
    asset, asset_reference, cache_state, reference_meta, reference_tag,
};
use crate::infrastructure::database::queries::{chunk_rows, MAX_BIND_PARAMS};
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict, Query};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect,
};
use uuid::Uuid;

/// Insert an asset for `hash` or update the stored size/mime when they
/// drifted. Returns `(model, created, updated)`.
pub async fn upsert_asset<C: ConnectionTrait>(
    conn: &C,
    hash: &str,
    size_bytes: i64,
    mime_type: Option<String>,
) -> RegistryResult<(asset::Model, bool, bool)> {
    if let Some(existing) = get_asset_by_hash(conn, hash).await? {
        let needs_update =
            existing.size_bytes != size_bytes || existing.mime_type != mime_type;
        if !needs_update {
            return Ok((existing, false, false));
        }
        let mut active: asset::ActiveModel = existing.into();
        active.size_bytes = Set(size_bytes);
        active.mime_type = Set(mime_type);
        let updated = active.update(conn).await?;
        return Ok((updated, false, true));
    }

    let model = asset::ActiveModel {
        id: Set(Uuid::new_v4()),
        hash: Set(Some(hash.to_string())),
        size_bytes: Set(size_bytes),
        mime_type: Set(mime_type),
        created_at: Set(Utc::now()),
    };
    let inserted = model.insert(conn).await?;
    Ok((inserted, true, false))
}

pub async fn get_asset_by_hash<C: ConnectionTrait>(
    conn: &C,
    hash: &str,
) -> RegistryResult<Option<asset::Model>> {
    Ok(asset::Entity::find()
        .filter(asset::Column::Hash.eq(hash))
        .one(conn)
        .await?)
}

pub async fn get_asset_by_id<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> RegistryResult<Option<asset::Model>> {
    Ok(asset::Entity::find_by_id(id).one(conn).await?)
}

pub async fn asset_exists_by_hash<C: ConnectionTrait>(
    conn: &C,
    hash: &str,
) -> RegistryResult<bool> {
    Ok(asset::Entity::find()
        .filter(asset::Column::Hash.eq(hash))
        .select_only()
        .column(asset::Column::Id)
        .into_tuple::<Uuid>()
        .one(conn)
        .await?
        .is_some())
}

/// Promote a stub to a hashed asset.
pub async fn set_asset_hash<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    hash: &str,
    mime_type: Option<String>,
) -> RegistryResult<()> {
    let update = asset::Entity::update_many()
        .col_expr(asset::Column::Hash, Expr::value(hash))
        .filter(asset::Column::Id.eq(id));
    let update = match mime_type {
        Some(mime) => update.col_expr(asset::Column::MimeType, Expr::value(mime)),
        None => update,
    };
    update.exec(conn).await?;
    Ok(())
}

/// Bulk insert fully formed asset rows (stub or hashed).
pub async fn bulk_insert_assets<C: ConnectionTrait>(
    conn: &C,
    rows: Vec<asset::ActiveModel>,
) -> RegistryResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for chunk in rows.chunks(super::rows_per_statement(5)) {
        asset::Entity::insert_many(chunk.to_vec())
            .exec_without_returning(conn)
            .await?;
    }
    Ok(())
}

/// Delete assets and everything hanging off them. Returns how many asset
/// rows went away. Dependent rows are deleted explicitly so the result does
/// not depend on foreign-key enforcement.
pub async fn delete_assets_by_ids<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
) -> RegistryResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut deleted = 0u64;
    for chunk in ids.chunks(MAX_BIND_PARAMS) {
        let reference_ids = Query::select()
            .column(asset_reference::Column::Id)
            .from(asset_reference::Entity)
            .and_where(asset_reference::Column::AssetId.is_in(chunk.iter().copied()))
            .to_owned();

        reference_tag::Entity::delete_many()
            .filter(reference_tag::Column::ReferenceId.in_subquery(reference_ids.clone()))
            .exec(conn)
            .await?;
        reference_meta::Entity::delete_many()
            .filter(reference_meta::Column::ReferenceId.in_subquery(reference_ids))
            .exec(conn)
            .await?;
        asset_reference::Entity::delete_many()
            .filter(asset_reference::Column::AssetId.is_in(chunk.iter().copied()))
            .exec(conn)
            .await?;
        cache_state::Entity::delete_many()
            .filter(cache_state::Column::AssetId.is_in(chunk.iter().copied()))
            .exec(conn)
            .await?;
        let result = asset::Entity::delete_many()
            .filter(asset::Column::Id.is_in(chunk.iter().copied()))
            .exec(conn)
            .await?;
        deleted += result.rows_affected;
    }
    Ok(deleted)
}

/// Build stub (or pre-hashed) asset rows for the bulk ingest path.
pub fn new_asset_row(
    id: Uuid,
    hash: Option<String>,
    size_bytes: i64,
    created_at: chrono::DateTime<Utc>,
) -> asset::ActiveModel {
    asset::ActiveModel {
        id: Set(id),
        hash: Set(hash),
        size_bytes: Set(size_bytes),
        mime_type: Set(None),
        created_at: Set(created_at),
    }
}

/// No-op-on-conflict variant used when pre-hashed specs may collide on the
/// unique hash index.
pub async fn bulk_insert_assets_ignore_hash_conflicts<C: ConnectionTrait>(
    conn: &C,
    rows: Vec<asset::ActiveModel>,
) -> RegistryResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for chunk in chunk_rows(&rows, 5) {
        asset::Entity::insert_many(chunk.to_vec())
            .on_conflict(
                OnConflict::column(asset::Column::Hash)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }
    Ok(())
}
