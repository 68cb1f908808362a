//! Read, update, delete and download-resolve operations

use crate::config::RegistryConfig;
use crate::domain::{DetailResult, DownloadResolution, ListAssetsQuery, ListPage};
use crate::error::{RegistryError, RegistryResult};
use crate::hash;
use crate::infrastructure::database::entities::reference_tag::ORIGIN_MANUAL;
use crate::infrastructure::database::queries::{asset, cache_state, reference, tags};
use crate::infrastructure::database::Database;
use crate::operations::{asset_data, ingest, reference_data, select_best_live_path};
use chrono::Utc;
use sea_orm::TransactionTrait;
use serde_json::{Map, Value as JsonValue};
use std::path::PathBuf;
use uuid::Uuid;

/// True when content with this canonical hash is registered.
pub async fn asset_exists(db: &Database, hash_str: &str) -> RegistryResult<bool> {
    let canonical = hash::parse_canonical_hash(hash_str)?;
    asset::asset_exists_by_hash(db.conn(), &canonical).await
}

/// Full detail for one visible reference, or None.
pub async fn get_asset_detail(
    db: &Database,
    reference_id: Uuid,
    owner_id: &str,
) -> RegistryResult<Option<DetailResult>> {
    let Some((reference_model, asset_model, tag_list)) =
        reference::fetch_reference_asset_tags(db.conn(), reference_id, owner_id).await?
    else {
        return Ok(None);
    };
    Ok(Some(DetailResult {
        reference: reference_data(reference_model),
        asset: asset_data(asset_model),
        tags: tag_list,
    }))
}

/// One page of visible references under the query predicate.
pub async fn list_assets_page(
    db: &Database,
    query: &ListAssetsQuery,
    owner_id: &str,
) -> RegistryResult<ListPage> {
    let (items, mut tag_map, total) =
        reference::list_references_page(db.conn(), query, owner_id).await?;
    let items = items
        .into_iter()
        .map(|(reference_model, asset_model)| {
            let tag_list = tag_map.remove(&reference_model.id).unwrap_or_default();
            DetailResult {
                reference: reference_data(reference_model),
                asset: asset_data(asset_model),
                tags: tag_list,
            }
        })
        .collect();
    Ok(ListPage { items, total })
}

/// Partial update of name, tags and user metadata, with ownership checks.
#[allow(clippy::too_many_arguments)]
pub async fn update_asset_metadata(
    db: &Database,
    config: &RegistryConfig,
    reference_id: Uuid,
    name: Option<&str>,
    tag_names: Option<&[String]>,
    user_metadata: Option<&Map<String, JsonValue>>,
    owner_id: &str,
) -> RegistryResult<DetailResult> {
    let txn = db.conn().begin().await?;

    let reference_model = reference::get_reference_by_id(&txn, reference_id)
        .await?
        .ok_or_else(|| RegistryError::NotFound(format!("reference {reference_id}")))?;
    if !reference_model.visible_to(owner_id) {
        return Err(RegistryError::NotFound(format!("reference {reference_id}")));
    }

    let mut touched = false;
    if let Some(new_name) = name {
        if new_name != reference_model.name {
            reference::update_reference_name(&txn, reference_id, new_name).await?;
            touched = true;
        }
    }

    let computed_filename =
        ingest::compute_filename_for_asset(&txn, config, reference_model.asset_id).await?;

    // An explicit metadata update replaces the object outright; otherwise the
    // stored object is only rewritten when the computed filename drifted.
    let current_map = match &reference_model.user_metadata {
        Some(JsonValue::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    let mut new_meta: Option<Map<String, JsonValue>> = match user_metadata {
        Some(metadata) => Some(metadata.clone()),
        None => match &computed_filename {
            Some(filename)
                if current_map.get("filename").and_then(JsonValue::as_str)
                    != Some(filename.as_str()) =>
            {
                Some(current_map.clone())
            }
            _ => None,
        },
    };
    if let Some(map) = new_meta.as_mut() {
        if let Some(filename) = &computed_filename {
            map.insert("filename".into(), JsonValue::String(filename.clone()));
        }
        reference::set_reference_metadata(&txn, reference_id, map).await?;
        touched = true;
    }

    if let Some(tag_names) = tag_names {
        tags::set_reference_tags(&txn, reference_id, tag_names, ORIGIN_MANUAL).await?;
        touched = true;
    }

    if touched && user_metadata.is_none() && new_meta.is_none() {
        reference::bump_reference_updated_at(&txn, reference_id).await?;
    }

    let (reference_model, asset_model, tag_list) =
        reference::fetch_reference_asset_tags(&txn, reference_id, owner_id)
            .await?
            .ok_or_else(|| RegistryError::Internal("reference vanished during update".into()))?;

    let detail = DetailResult {
        reference: reference_data(reference_model),
        asset: asset_data(asset_model),
        tags: tag_list,
    };
    txn.commit().await?;
    Ok(detail)
}

/// Set or clear a reference's preview asset.
pub async fn set_asset_preview(
    db: &Database,
    reference_id: Uuid,
    preview_asset_id: Option<Uuid>,
    owner_id: &str,
) -> RegistryResult<DetailResult> {
    let txn = db.conn().begin().await?;

    let reference_model = reference::get_reference_by_id(&txn, reference_id)
        .await?
        .ok_or_else(|| RegistryError::NotFound(format!("reference {reference_id}")))?;
    if !reference_model.visible_to(owner_id) {
        return Err(RegistryError::NotFound(format!("reference {reference_id}")));
    }

    reference::set_reference_preview(&txn, reference_id, preview_asset_id).await?;

    let (reference_model, asset_model, tag_list) =
        reference::fetch_reference_asset_tags(&txn, reference_id, owner_id)
            .await?
            .ok_or_else(|| RegistryError::Internal("reference vanished during update".into()))?;

    let detail = DetailResult {
        reference: reference_data(reference_model),
        asset: asset_data(asset_model),
        tags: tag_list,
    };
    txn.commit().await?;
    Ok(detail)
}

/// Delete a reference. With `delete_content_if_orphan`, content left without
/// references is removed too, including a best-effort unlink of its files
/// after commit. Returns false when nothing visible was deleted.
pub async fn delete_asset_reference(
    db: &Database,
    reference_id: Uuid,
    owner_id: &str,
    delete_content_if_orphan: bool,
) -> RegistryResult<bool> {
    let txn = db.conn().begin().await?;

    let asset_id = reference::get_reference_by_id(&txn, reference_id)
        .await?
        .map(|r| r.asset_id);

    let deleted = reference::delete_reference_by_id(&txn, reference_id, owner_id).await?;
    if !deleted {
        txn.commit().await?;
        return Ok(false);
    }

    let Some(asset_id) = asset_id else {
        txn.commit().await?;
        return Ok(true);
    };
    if !delete_content_if_orphan
        || reference::reference_exists_for_asset(&txn, asset_id).await?
    {
        txn.commit().await?;
        return Ok(true);
    }

    let states = cache_state::list_cache_states_by_asset_id(&txn, asset_id).await?;
    let file_paths: Vec<PathBuf> = states.iter().map(|s| PathBuf::from(&s.file_path)).collect();
    asset::delete_assets_by_ids(&txn, &[asset_id]).await?;
    txn.commit().await?;

    // Filesystem failures are swallowed; the rows are already gone.
    ingest::remove_files_best_effort(&file_paths).await;
    Ok(true)
}

/// Resolve the best live path for a download and touch the access time.
pub async fn resolve_asset_for_download(
    db: &Database,
    reference_id: Uuid,
    owner_id: &str,
) -> RegistryResult<DownloadResolution> {
    let txn = db.conn().begin().await?;

    let (reference_model, asset_model) =
        reference::fetch_reference_and_asset(&txn, reference_id, owner_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("reference {reference_id}")))?;

    let states = cache_state::list_cache_states_by_asset_id(&txn, asset_model.id).await?;
    let abs_path = select_best_live_path(&states).ok_or_else(|| {
        RegistryError::FileNotFound(format!(
            "no live path for reference {reference_id} (asset {})",
            asset_model.id
        ))
    })?;

    reference::touch_reference_access_time(&txn, reference_id, Utc::now()).await?;
    txn.commit().await?;

    let content_type = asset_model
        .mime_type
        .clone()
        .or_else(|| {
            mime_guess::from_path(&reference_model.name)
                .first()
                .map(|m| m.essence_str().to_string())
        })
        .or_else(|| {
            mime_guess::from_path(&abs_path)
                .first()
                .map(|m| m.essence_str().to_string())
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let download_name = if reference_model.name.is_empty() {
        abs_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "download".to_string())
    } else {
        reference_model.name.clone()
    };

    Ok(DownloadResolution {
        abs_path,
        content_type,
        download_name,
    })
}
