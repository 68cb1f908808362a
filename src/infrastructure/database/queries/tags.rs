//! Tag table queries

use crate::domain::path_rules::normalize_tags;
use crate::domain::{AddTagsOutcome, RemoveTagsOutcome, TagUsage};
use crate::error::RegistryResult;
use crate::infrastructure::database::entities::{
    asset_reference, reference_meta, reference_tag, tag,
    reference_tag::{MISSING_TAG, ORIGIN_AUTOMATIC},
};
use crate::infrastructure::database::queries::chunk_rows;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, JoinType, Order, QueryFilter, QueryOrder,
    QuerySelect, RelationTrait,
};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

pub const TAG_TYPE_USER: &str = "user";
pub const TAG_TYPE_SYSTEM: &str = "system";

/// Ordering choices for the tag listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagOrder {
    #[default]
    CountDesc,
    NameAsc,
}

impl TagOrder {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("name_asc") => Self::NameAsc,
            _ => Self::CountDesc,
        }
    }
}

/// Insert any tags that do not exist yet.
pub async fn ensure_tags_exist<C: ConnectionTrait, S: AsRef<str>>(
    conn: &C,
    names: &[S],
    tag_type: &str,
) -> RegistryResult<()> {
    let wanted = normalize_tags(names.iter().map(|s| s.as_ref()));
    if wanted.is_empty() {
        return Ok(());
    }
    let rows: Vec<tag::ActiveModel> = wanted
        .into_iter()
        .map(|name| tag::ActiveModel {
            name: Set(name),
            tag_type: Set(tag_type.to_string()),
        })
        .collect();
    for chunk in chunk_rows(&rows, 2) {
        tag::Entity::insert_many(chunk.to_vec())
            .on_conflict(OnConflict::column(tag::Column::Name).do_nothing().to_owned())
            .exec_without_returning(conn)
            .await?;
    }
    Ok(())
}

/// Tag names on a reference, in insertion order.
pub async fn get_reference_tags<C: ConnectionTrait>(
    conn: &C,
    reference_id: Uuid,
) -> RegistryResult<Vec<String>> {
    Ok(reference_tag::Entity::find()
        .filter(reference_tag::Column::ReferenceId.eq(reference_id))
        .order_by(reference_tag::Column::AddedAt, Order::Asc)
        .order_by(reference_tag::Column::TagName, Order::Asc)
        .select_only()
        .column(reference_tag::Column::TagName)
        .into_tuple()
        .all(conn)
        .await?)
}

/// Add tags, creating unknown tag rows on the way. Reports which names were
/// new and which were already present.
pub async fn add_tags_to_reference<C: ConnectionTrait, S: AsRef<str>>(
    conn: &C,
    reference_id: Uuid,
    tags: &[S],
    origin: &str,
) -> RegistryResult<AddTagsOutcome> {
    let want: Vec<String> = normalize_tags(tags.iter().map(|s| s.as_ref()));
    let current: BTreeSet<String> = get_reference_tags(conn, reference_id)
        .await?
        .into_iter()
        .collect();
    if want.is_empty() {
        return Ok(AddTagsOutcome {
            added: Vec::new(),
            already_present: Vec::new(),
            total_tags: current.into_iter().collect(),
        });
    }

    ensure_tags_exist(conn, &want, TAG_TYPE_USER).await?;

    let to_add: Vec<String> = want.iter().filter(|t| !current.contains(*t)).cloned().collect();
    if !to_add.is_empty() {
        let now = Utc::now();
        let rows: Vec<reference_tag::ActiveModel> = to_add
            .iter()
            .map(|name| reference_tag::ActiveModel {
                reference_id: Set(reference_id),
                tag_name: Set(name.clone()),
                origin: Set(origin.to_string()),
                added_at: Set(now),
            })
            .collect();
        for chunk in chunk_rows(&rows, 4) {
            reference_tag::Entity::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::columns([
                        reference_tag::Column::ReferenceId,
                        reference_tag::Column::TagName,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(conn)
                .await?;
        }
    }

    let after: BTreeSet<String> = get_reference_tags(conn, reference_id)
        .await?
        .into_iter()
        .collect();
    let want_set: BTreeSet<String> = want.iter().cloned().collect();
    Ok(AddTagsOutcome {
        added: after
            .difference(&current)
            .filter(|t| want_set.contains(*t))
            .cloned()
            .collect(),
        already_present: want_set.intersection(&current).cloned().collect(),
        total_tags: after.into_iter().collect(),
    })
}

/// Remove tags; unknown names are reported back as `not_present`.
pub async fn remove_tags_from_reference<C: ConnectionTrait, S: AsRef<str>>(
    conn: &C,
    reference_id: Uuid,
    tags: &[S],
) -> RegistryResult<RemoveTagsOutcome> {
    let want = normalize_tags(tags.iter().map(|s| s.as_ref()));
    let existing: BTreeSet<String> = get_reference_tags(conn, reference_id)
        .await?
        .into_iter()
        .collect();

    let to_remove: Vec<String> = want.iter().filter(|t| existing.contains(*t)).cloned().collect();
    let not_present: Vec<String> = want.iter().filter(|t| !existing.contains(*t)).cloned().collect();

    if !to_remove.is_empty() {
        reference_tag::Entity::delete_many()
            .filter(reference_tag::Column::ReferenceId.eq(reference_id))
            .filter(reference_tag::Column::TagName.is_in(to_remove.iter().cloned()))
            .exec(conn)
            .await?;
    }

    let total = get_reference_tags(conn, reference_id).await?;
    let mut removed = to_remove;
    removed.sort();
    let mut not_present = not_present;
    not_present.sort();
    let mut total_sorted = total;
    total_sorted.sort();
    Ok(RemoveTagsOutcome {
        removed,
        not_present,
        total_tags: total_sorted,
    })
}

/// Replace a reference's tags with the desired set.
pub async fn set_reference_tags<C: ConnectionTrait, S: AsRef<str>>(
    conn: &C,
    reference_id: Uuid,
    tags: &[S],
    origin: &str,
) -> RegistryResult<()> {
    let desired = normalize_tags(tags.iter().map(|s| s.as_ref()));
    let current: BTreeSet<String> = get_reference_tags(conn, reference_id)
        .await?
        .into_iter()
        .collect();
    let desired_set: BTreeSet<String> = desired.iter().cloned().collect();

    let to_add: Vec<String> = desired
        .iter()
        .filter(|t| !current.contains(*t))
        .cloned()
        .collect();
    let to_remove: Vec<String> = current.difference(&desired_set).cloned().collect();

    if !to_add.is_empty() {
        add_tags_to_reference(conn, reference_id, &to_add, origin).await?;
    }
    if !to_remove.is_empty() {
        reference_tag::Entity::delete_many()
            .filter(reference_tag::Column::ReferenceId.eq(reference_id))
            .filter(reference_tag::Column::TagName.is_in(to_remove))
            .exec(conn)
            .await?;
    }
    Ok(())
}

/// Attach the `missing` tag to every reference of an asset.
pub async fn add_missing_tag_for_asset<C: ConnectionTrait>(
    conn: &C,
    asset_id: Uuid,
) -> RegistryResult<()> {
    ensure_tags_exist(conn, &[MISSING_TAG], TAG_TYPE_SYSTEM).await?;
    let reference_ids: Vec<Uuid> = asset_reference::Entity::find()
        .filter(asset_reference::Column::AssetId.eq(asset_id))
        .select_only()
        .column(asset_reference::Column::Id)
        .into_tuple()
        .all(conn)
        .await?;
    if reference_ids.is_empty() {
        return Ok(());
    }
    let now = Utc::now();
    let rows: Vec<reference_tag::ActiveModel> = reference_ids
        .into_iter()
        .map(|reference_id| reference_tag::ActiveModel {
            reference_id: Set(reference_id),
            tag_name: Set(MISSING_TAG.to_string()),
            origin: Set(ORIGIN_AUTOMATIC.to_string()),
            added_at: Set(now),
        })
        .collect();
    for chunk in chunk_rows(&rows, 4) {
        reference_tag::Entity::insert_many(chunk.to_vec())
            .on_conflict(
                OnConflict::columns([
                    reference_tag::Column::ReferenceId,
                    reference_tag::Column::TagName,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }
    Ok(())
}

/// Strip the `missing` tag from every reference of an asset.
pub async fn remove_missing_tag_for_asset<C: ConnectionTrait>(
    conn: &C,
    asset_id: Uuid,
) -> RegistryResult<()> {
    let reference_ids: Vec<Uuid> = asset_reference::Entity::find()
        .filter(asset_reference::Column::AssetId.eq(asset_id))
        .select_only()
        .column(asset_reference::Column::Id)
        .into_tuple()
        .all(conn)
        .await?;
    if reference_ids.is_empty() {
        return Ok(());
    }
    reference_tag::Entity::delete_many()
        .filter(reference_tag::Column::ReferenceId.is_in(reference_ids))
        .filter(reference_tag::Column::TagName.eq(MISSING_TAG))
        .exec(conn)
        .await?;
    Ok(())
}

/// Tags with their usage counts over references visible to `owner_id`.
/// The whole tag table is small, so filtering, ordering and pagination run
/// on the fetched set.
pub async fn list_tags_with_usage<C: ConnectionTrait>(
    conn: &C,
    owner_id: &str,
    prefix: Option<&str>,
    include_zero: bool,
    order: TagOrder,
    limit: u64,
    offset: u64,
) -> RegistryResult<(Vec<TagUsage>, u64)> {
    let counted: Vec<(String, i64)> = reference_tag::Entity::find()
        .join(
            JoinType::InnerJoin,
            reference_tag::Relation::AssetReference.def(),
        )
        .filter(super::reference::visible_owner_condition(owner_id))
        .select_only()
        .column(reference_tag::Column::TagName)
        .column_as(reference_tag::Column::ReferenceId.count(), "count")
        .group_by(reference_tag::Column::TagName)
        .into_tuple()
        .all(conn)
        .await?;
    let counts: HashMap<String, u64> = counted
        .into_iter()
        .map(|(name, count)| (name, count as u64))
        .collect();

    let prefix_lower = prefix.map(|p| p.trim().to_lowercase()).filter(|p| !p.is_empty());
    let mut rows: Vec<TagUsage> = tag::Entity::find()
        .all(conn)
        .await?
        .into_iter()
        .filter(|t| {
            prefix_lower
                .as_deref()
                .map_or(true, |p| t.name.starts_with(p))
        })
        .map(|t| TagUsage {
            count: counts.get(&t.name).copied().unwrap_or(0),
            name: t.name,
            tag_type: t.tag_type,
        })
        .filter(|usage| include_zero || usage.count > 0)
        .collect();

    match order {
        TagOrder::CountDesc => {
            rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)))
        }
        TagOrder::NameAsc => rows.sort_by(|a, b| a.name.cmp(&b.name)),
    }

    let total = rows.len() as u64;
    let page = rows
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();
    Ok((page, total))
}

/// Bulk insert of tag links and metadata projection rows, conflicts skipped.
pub async fn bulk_insert_tags_and_meta<C: ConnectionTrait>(
    conn: &C,
    tag_rows: Vec<reference_tag::ActiveModel>,
    meta_rows: Vec<reference_meta::ActiveModel>,
) -> RegistryResult<()> {
    if !tag_rows.is_empty() {
        for chunk in chunk_rows(&tag_rows, 4) {
            reference_tag::Entity::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::columns([
                        reference_tag::Column::ReferenceId,
                        reference_tag::Column::TagName,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(conn)
                .await?;
        }
    }
    if !meta_rows.is_empty() {
        for chunk in chunk_rows(&meta_rows, 7) {
            reference_meta::Entity::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::columns([
                        reference_meta::Column::ReferenceId,
                        reference_meta::Column::Key,
                        reference_meta::Column::Ordinal,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(conn)
                .await?;
        }
    }
    Ok(())
}
