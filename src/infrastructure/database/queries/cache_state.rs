//! CacheState table queries

use crate::domain::path_rules::{like_prefix_pattern, LIKE_ESCAPE};
use crate::error::RegistryResult;
use crate::infrastructure::database::entities::{asset, cache_state};
use crate::infrastructure::database::queries::{chunk_rows, rows_per_statement, MAX_BIND_PARAMS};
use sea_orm::sea_query::{Expr, LikeExpr, OnConflict, Query};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, FromQueryResult, JoinType, Order,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait,
};
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

/// One cache state joined with its asset's identity, as consumed by the
/// reconciler. Missing rows are included so reappeared files can be
/// restored.
#[derive(Debug, Clone, FromQueryResult)]
pub struct CacheStateRow {
    pub state_id: i32,
    pub file_path: String,
    pub mtime_ns: Option<i64>,
    pub needs_verify: bool,
    pub is_missing: bool,
    pub asset_id: Uuid,
    pub asset_hash: Option<String>,
    pub size_bytes: i64,
}

pub async fn list_cache_states_by_asset_id<C: ConnectionTrait>(
    conn: &C,
    asset_id: Uuid,
) -> RegistryResult<Vec<cache_state::Model>> {
    Ok(cache_state::Entity::find()
        .filter(cache_state::Column::AssetId.eq(asset_id))
        .order_by(cache_state::Column::Id, Order::Asc)
        .all(conn)
        .await?)
}

/// Claim or refresh the binding of `file_path`. Returns `(created, updated)`.
///
/// Creation goes through an `ON CONFLICT DO NOTHING` insert so the unique
/// path index arbitrates races. When the row already exists it is updated
/// (and its `is_missing` flag cleared) only if something actually changed,
/// so a repeated call with identical arguments is a no-op.
pub async fn upsert_cache_state<C: ConnectionTrait>(
    conn: &C,
    asset_id: Uuid,
    file_path: &str,
    mtime_ns: i64,
) -> RegistryResult<(bool, bool)> {
    let inserted = cache_state::Entity::insert(cache_state::ActiveModel {
        asset_id: Set(asset_id),
        file_path: Set(file_path.to_string()),
        mtime_ns: Set(Some(mtime_ns)),
        needs_verify: Set(false),
        is_missing: Set(false),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::column(cache_state::Column::FilePath)
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await?;

    if inserted > 0 {
        return Ok((true, false));
    }

    let stale = Condition::any()
        .add(cache_state::Column::AssetId.ne(asset_id))
        .add(cache_state::Column::MtimeNs.is_null())
        .add(cache_state::Column::MtimeNs.ne(mtime_ns))
        .add(cache_state::Column::IsMissing.eq(true));
    let result = cache_state::Entity::update_many()
        .col_expr(cache_state::Column::AssetId, Expr::value(asset_id))
        .col_expr(cache_state::Column::MtimeNs, Expr::value(mtime_ns))
        .col_expr(cache_state::Column::IsMissing, Expr::value(false))
        .filter(cache_state::Column::FilePath.eq(file_path))
        .filter(stale)
        .exec(conn)
        .await?;

    Ok((false, result.rows_affected > 0))
}

/// Bulk claim of paths; conflicts on the unique path index are skipped.
pub async fn bulk_insert_cache_states_ignore_conflicts<C: ConnectionTrait>(
    conn: &C,
    rows: Vec<cache_state::ActiveModel>,
) -> RegistryResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for chunk in chunk_rows(&rows, 5) {
        cache_state::Entity::insert_many(chunk.to_vec())
            .on_conflict(
                OnConflict::column(cache_state::Column::FilePath)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }
    Ok(())
}

/// After a bulk claim, the winners are the paths whose row carries one of
/// *our* asset ids. Everything else in the batch lost its race.
pub async fn get_winning_paths<C: ConnectionTrait>(
    conn: &C,
    path_to_asset: &[(String, Uuid)],
) -> RegistryResult<HashSet<String>> {
    let mut winners = HashSet::new();
    // Each pair consumes two bind parameters (one path, one id).
    for chunk in path_to_asset.chunks(rows_per_statement(2)) {
        let paths = chunk.iter().map(|(p, _)| p.clone());
        let ids = chunk.iter().map(|(_, a)| *a);
        let rows: Vec<String> = cache_state::Entity::find()
            .filter(cache_state::Column::FilePath.is_in(paths))
            .filter(cache_state::Column::AssetId.is_in(ids))
            .select_only()
            .column(cache_state::Column::FilePath)
            .into_tuple()
            .all(conn)
            .await?;
        winners.extend(rows);
    }
    Ok(winners)
}

/// Clear `is_missing` on the given paths. Returns how many rows flipped.
pub async fn restore_cache_states_by_paths<C: ConnectionTrait, S: AsRef<str>>(
    conn: &C,
    paths: &[S],
) -> RegistryResult<u64> {
    if paths.is_empty() {
        return Ok(0);
    }
    let mut restored = 0u64;
    for chunk in paths.chunks(MAX_BIND_PARAMS) {
        let result = cache_state::Entity::update_many()
            .col_expr(cache_state::Column::IsMissing, Expr::value(false))
            .filter(cache_state::Column::FilePath.is_in(chunk.iter().map(|p| p.as_ref())))
            .filter(cache_state::Column::IsMissing.eq(true))
            .exec(conn)
            .await?;
        restored += result.rows_affected;
    }
    Ok(restored)
}

/// Soft-delete every active state whose path falls outside all listed
/// prefixes. Empty prefixes mark nothing (a misconfigured caller must not
/// wipe the whole table). Returns how many rows were marked.
pub async fn mark_cache_states_missing_outside_prefixes<C: ConnectionTrait>(
    conn: &C,
    prefixes: &[impl AsRef<Path>],
) -> RegistryResult<u64> {
    if prefixes.is_empty() {
        return Ok(0);
    }
    let mut inside_any = Condition::any();
    for prefix in prefixes {
        inside_any = inside_any.add(
            Expr::col(cache_state::Column::FilePath)
                .like(LikeExpr::new(like_prefix_pattern(prefix.as_ref())).escape(LIKE_ESCAPE)),
        );
    }
    let result = cache_state::Entity::update_many()
        .col_expr(cache_state::Column::IsMissing, Expr::value(true))
        .filter(cache_state::Column::IsMissing.eq(false))
        .filter(inside_any.not())
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// States under the given prefixes (missing rows included), joined with
/// their asset's hash and recorded size, ordered by asset then state id.
pub async fn get_cache_states_for_prefixes<C: ConnectionTrait>(
    conn: &C,
    prefixes: &[impl AsRef<Path>],
) -> RegistryResult<Vec<CacheStateRow>> {
    if prefixes.is_empty() {
        return Ok(Vec::new());
    }
    let mut inside_any = Condition::any();
    for prefix in prefixes {
        inside_any = inside_any.add(
            Expr::col((cache_state::Entity, cache_state::Column::FilePath))
                .like(LikeExpr::new(like_prefix_pattern(prefix.as_ref())).escape(LIKE_ESCAPE)),
        );
    }
    Ok(cache_state::Entity::find()
        .join(JoinType::InnerJoin, cache_state::Relation::Asset.def())
        .filter(inside_any)
        .select_only()
        .column_as(cache_state::Column::Id, "state_id")
        .column(cache_state::Column::FilePath)
        .column(cache_state::Column::MtimeNs)
        .column(cache_state::Column::NeedsVerify)
        .column(cache_state::Column::IsMissing)
        .column(cache_state::Column::AssetId)
        .column_as(asset::Column::Hash, "asset_hash")
        .column_as(asset::Column::SizeBytes, "size_bytes")
        .order_by(cache_state::Column::AssetId, Order::Asc)
        .order_by(cache_state::Column::Id, Order::Asc)
        .into_model::<CacheStateRow>()
        .all(conn)
        .await?)
}

pub async fn bulk_set_needs_verify<C: ConnectionTrait>(
    conn: &C,
    state_ids: &[i32],
    value: bool,
) -> RegistryResult<u64> {
    if state_ids.is_empty() {
        return Ok(0);
    }
    let mut updated = 0u64;
    for chunk in state_ids.chunks(MAX_BIND_PARAMS) {
        let result = cache_state::Entity::update_many()
            .col_expr(cache_state::Column::NeedsVerify, Expr::value(value))
            .filter(cache_state::Column::Id.is_in(chunk.iter().copied()))
            .exec(conn)
            .await?;
        updated += result.rows_affected;
    }
    Ok(updated)
}

pub async fn delete_cache_states_by_ids<C: ConnectionTrait>(
    conn: &C,
    state_ids: &[i32],
) -> RegistryResult<u64> {
    if state_ids.is_empty() {
        return Ok(0);
    }
    let mut deleted = 0u64;
    for chunk in state_ids.chunks(MAX_BIND_PARAMS) {
        let result = cache_state::Entity::delete_many()
            .filter(cache_state::Column::Id.is_in(chunk.iter().copied()))
            .exec(conn)
            .await?;
        deleted += result.rows_affected;
    }
    Ok(deleted)
}

/// Stub assets with no active cache state left: candidates for cleanup.
pub async fn get_unreferenced_unhashed_asset_ids<C: ConnectionTrait>(
    conn: &C,
) -> RegistryResult<Vec<Uuid>> {
    let active_states = Query::select()
        .expr(Expr::val(1))
        .from(cache_state::Entity)
        .and_where(
            Expr::col((cache_state::Entity, cache_state::Column::AssetId))
                .equals((asset::Entity, asset::Column::Id)),
        )
        .and_where(Expr::col((cache_state::Entity, cache_state::Column::IsMissing)).eq(false))
        .to_owned();

    Ok(asset::Entity::find()
        .filter(asset::Column::Hash.is_null())
        .filter(Expr::exists(active_states).not())
        .select_only()
        .column(asset::Column::Id)
        .into_tuple()
        .all(conn)
        .await?)
}
