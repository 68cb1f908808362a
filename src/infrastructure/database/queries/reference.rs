//! AssetReference table queries, including the listing filter builder

use crate::domain::metadata::{self, MetaRow, MetaValue};
use crate::domain::path_rules::{escape_like, LIKE_ESCAPE};
use crate::domain::{ListAssetsQuery, SortField, SortOrder};
use crate::error::{RegistryError, RegistryResult};
use crate::infrastructure::database::entities::{
    asset, asset_reference, reference_meta, reference_tag,
};
use crate::infrastructure::database::queries::{chunk_rows, MAX_BIND_PARAMS};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, LikeExpr, OnConflict, Query, SimpleExpr};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde_json::{Map, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Visibility predicate: public rows belong to everyone, owned rows only to
/// their owner.
pub fn visible_owner_condition(owner_id: &str) -> Condition {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        Condition::all().add(asset_reference::Column::OwnerId.eq(""))
    } else {
        Condition::all().add(asset_reference::Column::OwnerId.is_in(["", owner_id]))
    }
}

/// Insert a reference, or return None when `(asset_id, owner_id, name)` is
/// already taken.
pub async fn insert_reference<C: ConnectionTrait>(
    conn: &C,
    asset_id: Uuid,
    owner_id: &str,
    name: &str,
    preview_id: Option<Uuid>,
) -> RegistryResult<Option<asset_reference::Model>> {
    let now = Utc::now();
    let id = Uuid::new_v4();
    let model = asset_reference::ActiveModel {
        id: Set(id),
        asset_id: Set(asset_id),
        owner_id: Set(owner_id.to_string()),
        name: Set(name.to_string()),
        preview_id: Set(preview_id),
        user_metadata: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        last_access_time: Set(now),
        enrichment_level: Set(0),
    };
    let inserted = asset_reference::Entity::insert(model)
        .on_conflict(
            OnConflict::columns([
                asset_reference::Column::AssetId,
                asset_reference::Column::OwnerId,
                asset_reference::Column::Name,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;
    if inserted == 0 {
        return Ok(None);
    }
    Ok(asset_reference::Entity::find_by_id(id).one(conn).await?)
}

/// Get the reference for `(asset_id, owner_id, name)`, creating it when
/// absent. Returns `(model, created)`.
pub async fn get_or_create_reference<C: ConnectionTrait>(
    conn: &C,
    asset_id: Uuid,
    owner_id: &str,
    name: &str,
    preview_id: Option<Uuid>,
) -> RegistryResult<(asset_reference::Model, bool)> {
    if let Some(created) = insert_reference(conn, asset_id, owner_id, name, preview_id).await? {
        return Ok((created, true));
    }
    let existing = asset_reference::Entity::find()
        .filter(asset_reference::Column::AssetId.eq(asset_id))
        .filter(asset_reference::Column::OwnerId.eq(owner_id))
        .filter(asset_reference::Column::Name.eq(name))
        .one(conn)
        .await?
        .ok_or_else(|| {
            RegistryError::Internal("reference vanished after insert conflict".into())
        })?;
    Ok((existing, false))
}

pub async fn get_reference_by_id<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> RegistryResult<Option<asset_reference::Model>> {
    Ok(asset_reference::Entity::find_by_id(id).one(conn).await?)
}

/// Reference plus its asset, restricted to rows visible to `owner_id`.
pub async fn fetch_reference_and_asset<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    owner_id: &str,
) -> RegistryResult<Option<(asset_reference::Model, asset::Model)>> {
    let found = asset_reference::Entity::find_by_id(id)
        .filter(visible_owner_condition(owner_id))
        .find_also_related(asset::Entity)
        .one(conn)
        .await?;
    match found {
        Some((reference, Some(asset))) => Ok(Some((reference, asset))),
        Some((reference, None)) => Err(RegistryError::Internal(format!(
            "reference {} has no asset row",
            reference.id
        ))),
        None => Ok(None),
    }
}

/// Bump `updated_at` and `last_access_time` (only forward) and optionally
/// swap the preview, mirroring a re-registration of an existing reference.
pub async fn update_reference_timestamps<C: ConnectionTrait>(
    conn: &C,
    reference: &asset_reference::Model,
    preview_id: Option<Uuid>,
) -> RegistryResult<()> {
    let now = Utc::now();
    let mut active: asset_reference::ActiveModel = reference.clone().into();
    if let Some(preview) = preview_id {
        if reference.preview_id != Some(preview) {
            active.preview_id = Set(Some(preview));
        }
    }
    active.updated_at = Set(now);
    if reference.last_access_time < now {
        active.last_access_time = Set(now);
    }
    active.update(conn).await?;
    Ok(())
}

/// Update `last_access_time`, but never move it backwards.
pub async fn touch_reference_access_time<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    ts: DateTime<Utc>,
) -> RegistryResult<()> {
    asset_reference::Entity::update_many()
        .col_expr(asset_reference::Column::LastAccessTime, Expr::value(ts))
        .filter(asset_reference::Column::Id.eq(id))
        .filter(asset_reference::Column::LastAccessTime.lt(ts))
        .exec(conn)
        .await?;
    Ok(())
}

pub async fn update_reference_name<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    name: &str,
) -> RegistryResult<()> {
    asset_reference::Entity::update_many()
        .col_expr(asset_reference::Column::Name, Expr::value(name))
        .col_expr(asset_reference::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(asset_reference::Column::Id.eq(id))
        .exec(conn)
        .await?;
    Ok(())
}

pub async fn bump_reference_updated_at<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> RegistryResult<()> {
    asset_reference::Entity::update_many()
        .col_expr(asset_reference::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(asset_reference::Column::Id.eq(id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Replace the reference's metadata JSON and rewrite its typed projection
/// rows in the same session. The projection is always an exact rewrite of
/// the stored object.
pub async fn set_reference_metadata<C: ConnectionTrait>(
    conn: &C,
    reference_id: Uuid,
    user_metadata: &Map<String, JsonValue>,
) -> RegistryResult<()> {
    let reference = get_reference_by_id(conn, reference_id)
        .await?
        .ok_or_else(|| RegistryError::NotFound(format!("reference {reference_id}")))?;

    let mut active: asset_reference::ActiveModel = reference.into();
    active.user_metadata = Set(Some(JsonValue::Object(user_metadata.clone())));
    active.updated_at = Set(Utc::now());
    active.update(conn).await?;

    reference_meta::Entity::delete_many()
        .filter(reference_meta::Column::ReferenceId.eq(reference_id))
        .exec(conn)
        .await?;

    let rows: Vec<reference_meta::ActiveModel> = metadata::project_metadata(user_metadata)
        .into_iter()
        .map(|row| meta_row_to_active(reference_id, row))
        .collect();
    if rows.is_empty() {
        return Ok(());
    }
    for chunk in chunk_rows(&rows, 7) {
        reference_meta::Entity::insert_many(chunk.to_vec())
            .exec_without_returning(conn)
            .await?;
    }
    Ok(())
}

pub fn meta_row_to_active(reference_id: Uuid, row: MetaRow) -> reference_meta::ActiveModel {
    let mut active = reference_meta::ActiveModel {
        reference_id: Set(reference_id),
        key: Set(row.key),
        ordinal: Set(row.ordinal),
        val_str: Set(None),
        val_num: Set(None),
        val_bool: Set(None),
        val_json: Set(None),
    };
    match row.value {
        MetaValue::Null => {}
        MetaValue::Bool(b) => active.val_bool = Set(Some(b)),
        MetaValue::Num(d) => active.val_num = Set(Some(d)),
        MetaValue::Str(s) => active.val_str = Set(Some(s)),
        MetaValue::Json(v) => active.val_json = Set(Some(v)),
    }
    active
}

/// Set or clear the preview asset. The preview must exist when given.
pub async fn set_reference_preview<C: ConnectionTrait>(
    conn: &C,
    reference_id: Uuid,
    preview_asset_id: Option<Uuid>,
) -> RegistryResult<()> {
    if let Some(preview) = preview_asset_id {
        if asset::Entity::find_by_id(preview).one(conn).await?.is_none() {
            return Err(RegistryError::NotFound(format!("preview asset {preview}")));
        }
    }
    let result = asset_reference::Entity::update_many()
        .col_expr(
            asset_reference::Column::PreviewId,
            Expr::value(preview_asset_id),
        )
        .col_expr(asset_reference::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(asset_reference::Column::Id.eq(reference_id))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(RegistryError::NotFound(format!("reference {reference_id}")));
    }
    Ok(())
}

/// Delete a reference the caller is allowed to see. Returns true when a row
/// was removed. Tag and metadata rows go first so the result does not lean
/// on foreign-key enforcement.
pub async fn delete_reference_by_id<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    owner_id: &str,
) -> RegistryResult<bool> {
    let visible = asset_reference::Entity::find_by_id(id)
        .filter(visible_owner_condition(owner_id))
        .one(conn)
        .await?;
    if visible.is_none() {
        return Ok(false);
    }
    reference_tag::Entity::delete_many()
        .filter(reference_tag::Column::ReferenceId.eq(id))
        .exec(conn)
        .await?;
    reference_meta::Entity::delete_many()
        .filter(reference_meta::Column::ReferenceId.eq(id))
        .exec(conn)
        .await?;
    let result = asset_reference::Entity::delete_many()
        .filter(asset_reference::Column::Id.eq(id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

pub async fn reference_exists_for_asset<C: ConnectionTrait>(
    conn: &C,
    asset_id: Uuid,
) -> RegistryResult<bool> {
    Ok(asset_reference::Entity::find()
        .filter(asset_reference::Column::AssetId.eq(asset_id))
        .select_only()
        .column(asset_reference::Column::Id)
        .into_tuple::<Uuid>()
        .one(conn)
        .await?
        .is_some())
}

/// Bulk insert pre-built reference rows; name collisions are skipped.
pub async fn bulk_insert_references_ignore_conflicts<C: ConnectionTrait>(
    conn: &C,
    rows: Vec<asset_reference::ActiveModel>,
) -> RegistryResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for chunk in chunk_rows(&rows, 10) {
        asset_reference::Entity::insert_many(chunk.to_vec())
            .on_conflict(
                OnConflict::columns([
                    asset_reference::Column::AssetId,
                    asset_reference::Column::OwnerId,
                    asset_reference::Column::Name,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }
    Ok(())
}

/// Which of the candidate reference ids actually landed in the table.
pub async fn get_reference_ids_present<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
) -> RegistryResult<HashSet<Uuid>> {
    let mut present = HashSet::new();
    for chunk in ids.chunks(MAX_BIND_PARAMS) {
        let rows: Vec<Uuid> = asset_reference::Entity::find()
            .filter(asset_reference::Column::Id.is_in(chunk.iter().copied()))
            .select_only()
            .column(asset_reference::Column::Id)
            .into_tuple()
            .all(conn)
            .await?;
        present.extend(rows);
    }
    Ok(present)
}

/// References still below the requested enrichment level, with their assets.
/// `after` is an id cursor so callers can page past references that cannot
/// be enriched right now.
pub async fn list_references_below_enrichment<C: ConnectionTrait>(
    conn: &C,
    target_level: i32,
    after: Option<Uuid>,
    limit: u64,
) -> RegistryResult<Vec<(asset_reference::Model, asset::Model)>> {
    let mut select = asset_reference::Entity::find()
        .filter(asset_reference::Column::EnrichmentLevel.lt(target_level));
    if let Some(after) = after {
        select = select.filter(asset_reference::Column::Id.gt(after));
    }
    let rows = select
        .find_also_related(asset::Entity)
        .order_by(asset_reference::Column::Id, Order::Asc)
        .limit(limit)
        .all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .filter_map(|(reference, asset)| asset.map(|a| (reference, a)))
        .collect())
}

pub async fn count_references_below_enrichment<C: ConnectionTrait>(
    conn: &C,
    target_level: i32,
) -> RegistryResult<u64> {
    Ok(asset_reference::Entity::find()
        .filter(asset_reference::Column::EnrichmentLevel.lt(target_level))
        .count(conn)
        .await?)
}

pub async fn set_reference_enrichment_level<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
    level: i32,
) -> RegistryResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    for chunk in ids.chunks(MAX_BIND_PARAMS) {
        asset_reference::Entity::update_many()
            .col_expr(asset_reference::Column::EnrichmentLevel, Expr::value(level))
            .filter(asset_reference::Column::Id.is_in(chunk.iter().copied()))
            .exec(conn)
            .await?;
    }
    Ok(())
}

/// Re-point a stub's cache states at an existing asset, used when enrichment
/// discovers that the bytes are already registered.
pub async fn repoint_cache_states<C: ConnectionTrait>(
    conn: &C,
    from_asset: Uuid,
    to_asset: Uuid,
) -> RegistryResult<()> {
    use crate::infrastructure::database::entities::cache_state;
    cache_state::Entity::update_many()
        .col_expr(cache_state::Column::AssetId, Expr::value(to_asset))
        .filter(cache_state::Column::AssetId.eq(from_asset))
        .exec(conn)
        .await?;
    Ok(())
}

pub async fn list_references_for_asset<C: ConnectionTrait>(
    conn: &C,
    asset_id: Uuid,
) -> RegistryResult<Vec<asset_reference::Model>> {
    Ok(asset_reference::Entity::find()
        .filter(asset_reference::Column::AssetId.eq(asset_id))
        .order_by(asset_reference::Column::Id, Order::Asc)
        .all(conn)
        .await?)
}

/// Move a reference onto another asset. When the target already has a
/// reference with the same `(owner_id, name)`, the moved reference is
/// deleted instead and the id of the pre-existing one is returned.
pub async fn reassign_reference_asset<C: ConnectionTrait>(
    conn: &C,
    reference: &asset_reference::Model,
    new_asset: Uuid,
) -> RegistryResult<Uuid> {
    let taken = asset_reference::Entity::find()
        .filter(asset_reference::Column::AssetId.eq(new_asset))
        .filter(asset_reference::Column::OwnerId.eq(reference.owner_id.clone()))
        .filter(asset_reference::Column::Name.eq(reference.name.clone()))
        .one(conn)
        .await?;
    if let Some(existing) = taken {
        reference_tag::Entity::delete_many()
            .filter(reference_tag::Column::ReferenceId.eq(reference.id))
            .exec(conn)
            .await?;
        reference_meta::Entity::delete_many()
            .filter(reference_meta::Column::ReferenceId.eq(reference.id))
            .exec(conn)
            .await?;
        asset_reference::Entity::delete_many()
            .filter(asset_reference::Column::Id.eq(reference.id))
            .exec(conn)
            .await?;
        return Ok(existing.id);
    }
    asset_reference::Entity::update_many()
        .col_expr(asset_reference::Column::AssetId, Expr::value(new_asset))
        .filter(asset_reference::Column::Id.eq(reference.id))
        .exec(conn)
        .await?;
    Ok(reference.id)
}

// --- listing -------------------------------------------------------------

fn meta_exists(key: &str, preds: Vec<SimpleExpr>) -> SimpleExpr {
    let mut query = Query::select();
    query
        .expr(Expr::val(1))
        .from(reference_meta::Entity)
        .and_where(
            Expr::col((reference_meta::Entity, reference_meta::Column::ReferenceId))
                .equals((asset_reference::Entity, asset_reference::Column::Id)),
        )
        .and_where(Expr::col((reference_meta::Entity, reference_meta::Column::Key)).eq(key));
    for pred in preds {
        query.and_where(pred);
    }
    Expr::exists(query.to_owned())
}

fn meta_clause_for_value(key: &str, value: &JsonValue) -> SimpleExpr {
    match metadata::filter_value(value) {
        MetaValue::Null => {
            let no_row = meta_exists(key, Vec::new()).not();
            let null_row = meta_exists(
                key,
                vec![
                    Expr::col((reference_meta::Entity, reference_meta::Column::ValStr)).is_null(),
                    Expr::col((reference_meta::Entity, reference_meta::Column::ValNum)).is_null(),
                    Expr::col((reference_meta::Entity, reference_meta::Column::ValBool)).is_null(),
                    Expr::col((reference_meta::Entity, reference_meta::Column::ValJson)).is_null(),
                ],
            );
            no_row.or(null_row)
        }
        MetaValue::Bool(b) => meta_exists(
            key,
            vec![Expr::col((reference_meta::Entity, reference_meta::Column::ValBool)).eq(b)],
        ),
        MetaValue::Num(d) => meta_exists(
            key,
            vec![Expr::col((reference_meta::Entity, reference_meta::Column::ValNum)).eq(d)],
        ),
        MetaValue::Str(s) => meta_exists(
            key,
            vec![Expr::col((reference_meta::Entity, reference_meta::Column::ValStr)).eq(s)],
        ),
        MetaValue::Json(v) => meta_exists(
            key,
            vec![Expr::col((reference_meta::Entity, reference_meta::Column::ValJson)).eq(v)],
        ),
    }
}

fn tag_exists(tag_name: &str) -> SimpleExpr {
    Expr::exists(
        Query::select()
            .expr(Expr::val(1))
            .from(reference_tag::Entity)
            .and_where(
                Expr::col((reference_tag::Entity, reference_tag::Column::ReferenceId))
                    .equals((asset_reference::Entity, asset_reference::Column::Id)),
            )
            .and_where(Expr::col((reference_tag::Entity, reference_tag::Column::TagName)).eq(tag_name))
            .to_owned(),
    )
}

fn any_tag_exists(tag_names: &[String]) -> SimpleExpr {
    Expr::exists(
        Query::select()
            .expr(Expr::val(1))
            .from(reference_tag::Entity)
            .and_where(
                Expr::col((reference_tag::Entity, reference_tag::Column::ReferenceId))
                    .equals((asset_reference::Entity, asset_reference::Column::Id)),
            )
            .and_where(
                Expr::col((reference_tag::Entity, reference_tag::Column::TagName))
                    .is_in(tag_names.iter().cloned()),
            )
            .to_owned(),
    )
}

fn listing_condition(query: &ListAssetsQuery, owner_id: &str) -> Condition {
    let mut cond = visible_owner_condition(owner_id);

    if let Some(term) = query.name_contains.as_deref().filter(|t| !t.is_empty()) {
        let pattern = format!("%{}%", escape_like(term));
        cond = cond.add(
            Expr::col((asset_reference::Entity, asset_reference::Column::Name))
                .like(LikeExpr::new(pattern).escape(LIKE_ESCAPE)),
        );
    }

    for tag in &query.include_tags {
        cond = cond.add(tag_exists(tag));
    }
    if !query.exclude_tags.is_empty() {
        cond = cond.add(any_tag_exists(&query.exclude_tags).not());
    }

    if let Some(filter) = &query.metadata_filter {
        for (key, value) in filter {
            match value {
                JsonValue::Array(elems) => {
                    let mut any = Condition::any();
                    for elem in elems {
                        any = any.add(meta_clause_for_value(key, elem));
                    }
                    if !elems.is_empty() {
                        cond = cond.add(any);
                    }
                }
                scalar => cond = cond.add(meta_clause_for_value(key, scalar)),
            }
        }
    }

    cond
}

/// One page of references with their assets and tag names, plus the total
/// row count under the same predicate. Ordering is total: the requested
/// sort key with `id` as the tiebreak.
pub async fn list_references_page<C: ConnectionTrait>(
    conn: &C,
    query: &ListAssetsQuery,
    owner_id: &str,
) -> RegistryResult<(
    Vec<(asset_reference::Model, asset::Model)>,
    HashMap<Uuid, Vec<String>>,
    u64,
)> {
    let cond = listing_condition(query, owner_id);

    let total = asset_reference::Entity::find()
        .filter(cond.clone())
        .count(conn)
        .await?;

    let order = match query.order {
        SortOrder::Asc => Order::Asc,
        SortOrder::Desc => Order::Desc,
    };
    let mut select = asset_reference::Entity::find()
        .find_also_related(asset::Entity)
        .filter(cond);
    select = match query.sort {
        SortField::Name => select.order_by(asset_reference::Column::Name, order),
        SortField::CreatedAt => select.order_by(asset_reference::Column::CreatedAt, order),
        SortField::UpdatedAt => select.order_by(asset_reference::Column::UpdatedAt, order),
        SortField::LastAccessTime => {
            select.order_by(asset_reference::Column::LastAccessTime, order)
        }
        SortField::Size => select.order_by(asset::Column::SizeBytes, order),
    };
    let rows = select
        .order_by(asset_reference::Column::Id, Order::Asc)
        .limit(query.limit)
        .offset(query.offset)
        .all(conn)
        .await?;

    let items: Vec<(asset_reference::Model, asset::Model)> = rows
        .into_iter()
        .filter_map(|(reference, asset)| asset.map(|a| (reference, a)))
        .collect();

    let ids: Vec<Uuid> = items.iter().map(|(r, _)| r.id).collect();
    let mut tag_map: HashMap<Uuid, Vec<String>> = HashMap::new();
    if !ids.is_empty() {
        let tag_rows: Vec<(Uuid, String)> = reference_tag::Entity::find()
            .filter(reference_tag::Column::ReferenceId.is_in(ids.iter().copied()))
            .order_by(reference_tag::Column::AddedAt, Order::Asc)
            .order_by(reference_tag::Column::TagName, Order::Asc)
            .select_only()
            .column(reference_tag::Column::ReferenceId)
            .column(reference_tag::Column::TagName)
            .into_tuple()
            .all(conn)
            .await?;
        for (reference_id, tag_name) in tag_rows {
            tag_map.entry(reference_id).or_default().push(tag_name);
        }
    }

    Ok((items, tag_map, total))
}

/// Detail lookup: reference, asset, and tag names ordered alphabetically.
pub async fn fetch_reference_asset_tags<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    owner_id: &str,
) -> RegistryResult<Option<(asset_reference::Model, asset::Model, Vec<String>)>> {
    let Some((reference, asset)) = fetch_reference_and_asset(conn, id, owner_id).await? else {
        return Ok(None);
    };
    let tags: Vec<String> = reference_tag::Entity::find()
        .filter(reference_tag::Column::ReferenceId.eq(id))
        .order_by(reference_tag::Column::TagName, Order::Asc)
        .select_only()
        .column(reference_tag::Column::TagName)
        .into_tuple()
        .all(conn)
        .await?;
    Ok(Some((reference, asset, tags)))
}

/// Row builder for the bulk ingest path.
pub fn new_reference_row(
    id: Uuid,
    asset_id: Uuid,
    owner_id: &str,
    name: &str,
    user_metadata: Option<JsonValue>,
    now: DateTime<Utc>,
) -> asset_reference::ActiveModel {
    asset_reference::ActiveModel {
        id: Set(id),
        asset_id: Set(asset_id),
        owner_id: Set(owner_id.to_string()),
        name: Set(name.to_string()),
        preview_id: Set(None),
        user_metadata: Set(user_metadata),
        created_at: Set(now),
        updated_at: Set(now),
        last_access_time: Set(now),
        enrichment_level: Set(0),
    }
}

