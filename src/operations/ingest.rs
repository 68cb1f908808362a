//! Upload and registration write paths

use crate::config::{validate_within_base, RegistryConfig};
use crate::domain::path_rules::{capped_extension, normalize_tags, relative_filename, sanitize_name};
use crate::domain::{DetailResult, UploadOutcome};
use crate::error::{RegistryError, RegistryResult};
use crate::hash;
use crate::infrastructure::database::queries::{asset, cache_state, reference, tags};
use crate::infrastructure::database::Database;
use crate::operations::{asset_data, reference_data, select_best_live_path};
use crate::infrastructure::database::entities::reference_tag::ORIGIN_MANUAL;
use sea_orm::{ConnectionTrait, TransactionTrait};
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Counts reported by a single-file ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub asset_created: bool,
    pub asset_updated: bool,
    pub state_created: bool,
    pub state_updated: bool,
    pub reference_id: Option<Uuid>,
}

/// Result of register-by-hash: `created` is reference-level.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterOutcome {
    pub detail: DetailResult,
    pub created: bool,
}

/// Bind one hashed file at `abs_path` to the registry: upsert the asset and
/// cache state, and (when a name is given) create or refresh the reference
/// with its tags and metadata. One transaction.
#[allow(clippy::too_many_arguments)]
pub async fn ingest_file_from_path(
    db: &Database,
    config: &RegistryConfig,
    abs_path: &Path,
    asset_hash: &str,
    size_bytes: i64,
    mtime_ns: i64,
    mime_type: Option<String>,
    name: Option<&str>,
    owner_id: &str,
    user_metadata: Option<&Map<String, JsonValue>>,
    tag_names: &[String],
    tag_origin: &str,
) -> RegistryResult<IngestOutcome> {
    let txn = db.conn().begin().await?;

    let (asset_model, asset_created, asset_updated) =
        asset::upsert_asset(&txn, asset_hash, size_bytes, mime_type).await?;

    let path_str = abs_path.to_string_lossy();
    let (state_created, state_updated) =
        cache_state::upsert_cache_state(&txn, asset_model.id, &path_str, mtime_ns).await?;

    let mut reference_id = None;
    if let Some(name) = name {
        let (reference_model, created) =
            reference::get_or_create_reference(&txn, asset_model.id, owner_id, name, None).await?;
        if !created {
            reference::update_reference_timestamps(&txn, &reference_model, None).await?;
        }
        reference_id = Some(reference_model.id);

        let normalized = normalize_tags(tag_names);
        if !normalized.is_empty() {
            tags::add_tags_to_reference(&txn, reference_model.id, &normalized, tag_origin).await?;
        }

        merge_metadata_with_filename(
            &txn,
            config,
            reference_model.id,
            asset_model.id,
            reference_model.user_metadata.as_ref(),
            user_metadata,
        )
        .await?;
    }

    if let Err(e) = tags::remove_missing_tag_for_asset(&txn, asset_model.id).await {
        warn!("Failed to clear missing tag for asset {}: {e}", asset_model.id);
    }

    txn.commit().await?;

    Ok(IngestOutcome {
        asset_created,
        asset_updated,
        state_created,
        state_updated,
        reference_id,
    })
}

/// Create (or fetch) a reference for content that already exists.
#[allow(clippy::too_many_arguments)]
pub async fn register_existing_asset(
    db: &Database,
    config: &RegistryConfig,
    asset_hash: &str,
    name: &str,
    user_metadata: Option<&Map<String, JsonValue>>,
    tag_names: Option<&[String]>,
    tag_origin: &str,
    owner_id: &str,
) -> RegistryResult<RegisterOutcome> {
    let txn = db.conn().begin().await?;

    let asset_model = asset::get_asset_by_hash(&txn, asset_hash)
        .await?
        .ok_or_else(|| RegistryError::NotFound(format!("no asset with hash {asset_hash}")))?;

    let (reference_model, created) =
        reference::get_or_create_reference(&txn, asset_model.id, owner_id, name, None).await?;

    if !created {
        let tag_list = tags::get_reference_tags(&txn, reference_model.id).await?;
        let outcome = RegisterOutcome {
            detail: DetailResult {
                reference: reference_data(reference_model),
                asset: asset_data(asset_model),
                tags: tag_list,
            },
            created: false,
        };
        txn.commit().await?;
        return Ok(outcome);
    }

    let mut new_meta = user_metadata.cloned().unwrap_or_default();
    if let Some(filename) = compute_filename_for_asset(&txn, config, asset_model.id).await? {
        new_meta.insert("filename".into(), JsonValue::String(filename));
    }
    if !new_meta.is_empty() {
        reference::set_reference_metadata(&txn, reference_model.id, &new_meta).await?;
    }

    if let Some(tag_names) = tag_names {
        tags::set_reference_tags(&txn, reference_model.id, tag_names, tag_origin).await?;
    }

    let (reference_model, asset_model, tag_list) =
        reference::fetch_reference_asset_tags(&txn, reference_model.id, owner_id)
            .await?
            .ok_or_else(|| RegistryError::Internal("reference vanished during register".into()))?;

    let outcome = RegisterOutcome {
        detail: DetailResult {
            reference: reference_data(reference_model),
            asset: asset_data(asset_model),
            tags: tag_list,
        },
        created: true,
    };
    txn.commit().await?;
    Ok(outcome)
}

/// Register a reference to known content. Returns None when the hash is not
/// in the registry.
pub async fn create_from_hash(
    db: &Database,
    config: &RegistryConfig,
    hash_str: &str,
    name: &str,
    tag_names: Option<&[String]>,
    user_metadata: Option<&Map<String, JsonValue>>,
    owner_id: &str,
) -> RegistryResult<Option<RegisterOutcome>> {
    let canonical = hash::parse_canonical_hash(hash_str)?;

    if asset::get_asset_by_hash(db.conn(), &canonical).await?.is_none() {
        return Ok(None);
    }

    let digest = canonical.split(':').nth(1).unwrap_or(&canonical);
    let display_name = sanitize_name(Some(name), digest);
    let outcome = register_existing_asset(
        db,
        config,
        &canonical,
        &display_name,
        user_metadata,
        tag_names,
        ORIGIN_MANUAL,
        owner_id,
    )
    .await?;
    Ok(Some(outcome))
}

/// Ingest uploaded bytes sitting at `temp_path`.
///
/// Known bytes take the dedup path: the temp file is discarded and the hash
/// is registered under the requested name. New bytes move into the
/// destination resolved from the leading tags as `<digest><ext>`.
#[allow(clippy::too_many_arguments)]
pub async fn upload_from_temp_path(
    db: &Database,
    config: &RegistryConfig,
    temp_path: &Path,
    name: Option<&str>,
    tag_names: &[String],
    user_metadata: Option<&Map<String, JsonValue>>,
    client_filename: Option<&str>,
    owner_id: &str,
    expected_hash: Option<&str>,
) -> RegistryResult<UploadOutcome> {
    let digest = hash::hash_file_async(temp_path).await?;
    let canonical = hash::to_canonical(&digest);

    if let Some(expected) = expected_hash {
        let expected = hash::parse_canonical_hash(expected)?;
        if expected != canonical {
            remove_file_best_effort(temp_path).await;
            return Err(RegistryError::HashMismatch);
        }
    }

    let display_name = sanitize_name(name.or(client_filename), &digest);
    let normalized_tags = normalize_tags(tag_names);

    if asset::get_asset_by_hash(db.conn(), &canonical).await?.is_some() {
        remove_file_best_effort(temp_path).await;
        let registered = register_existing_asset(
            db,
            config,
            &canonical,
            &display_name,
            user_metadata,
            Some(&normalized_tags),
            ORIGIN_MANUAL,
            owner_id,
        )
        .await?;
        return Ok(UploadOutcome {
            detail: registered.detail,
            created_new: false,
        });
    }

    let (base, subdirs) = config.destination_for_tags(&normalized_tags)?;
    let mut dest_dir = base.clone();
    for subdir in &subdirs {
        dest_dir.push(subdir);
    }
    tokio::fs::create_dir_all(&dest_dir).await?;

    let ext = capped_extension(client_filename.or(name).unwrap_or_default());
    let dest_abs = dest_dir.join(format!("{digest}{ext}"));
    validate_within_base(&dest_abs, &base)?;

    let content_type = client_filename
        .and_then(|f| mime_guess::from_path(f).first())
        .or_else(|| mime_guess::from_path(&dest_abs).first())
        .map(|m| m.essence_str().to_string());

    move_file(temp_path, &dest_abs).await?;

    let metadata = tokio::fs::metadata(&dest_abs).await?;
    let size_bytes = metadata.len() as i64;
    let mtime_ns = crate::scanner::mtime_ns(&metadata);

    let ingest = ingest_file_from_path(
        db,
        config,
        &dest_abs,
        &canonical,
        size_bytes,
        mtime_ns,
        content_type,
        Some(&display_name),
        owner_id,
        user_metadata,
        &normalized_tags,
        ORIGIN_MANUAL,
    )
    .await?;

    let reference_id = ingest
        .reference_id
        .ok_or_else(|| RegistryError::Internal("upload produced no reference".into()))?;

    let (reference_model, asset_model, tag_list) =
        reference::fetch_reference_asset_tags(db.conn(), reference_id, owner_id)
            .await?
            .ok_or_else(|| RegistryError::Internal("inconsistent state after ingest".into()))?;

    Ok(UploadOutcome {
        detail: DetailResult {
            reference: reference_data(reference_model),
            asset: asset_data(asset_model),
            tags: tag_list,
        },
        created_new: ingest.asset_created,
    })
}

/// Filename metadata for an asset: its best live path relative to the
/// configured base directories.
pub async fn compute_filename_for_asset<C: ConnectionTrait>(
    conn: &C,
    config: &RegistryConfig,
    asset_id: Uuid,
) -> RegistryResult<Option<String>> {
    let states = cache_state::list_cache_states_by_asset_id(conn, asset_id).await?;
    let Some(path) = select_best_live_path(&states) else {
        return Ok(None);
    };
    Ok(relative_filename(&path, &config.all_known_prefixes()))
}

async fn merge_metadata_with_filename<C: ConnectionTrait>(
    conn: &C,
    config: &RegistryConfig,
    reference_id: Uuid,
    asset_id: Uuid,
    current: Option<&JsonValue>,
    incoming: Option<&Map<String, JsonValue>>,
) -> RegistryResult<()> {
    let current_map = match current {
        Some(JsonValue::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    let mut merged = current_map.clone();
    if let Some(incoming) = incoming {
        for (key, value) in incoming {
            merged.insert(key.clone(), value.clone());
        }
    }
    if let Some(filename) = compute_filename_for_asset(conn, config, asset_id).await? {
        merged.insert("filename".into(), JsonValue::String(filename));
    }
    if merged != current_map {
        reference::set_reference_metadata(conn, reference_id, &merged).await?;
    }
    Ok(())
}

/// Move the spooled upload into place; falls back to copy + remove when the
/// rename crosses filesystems.
async fn move_file(from: &Path, to: &Path) -> RegistryResult<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            remove_file_best_effort(from).await;
            Ok(())
        }
    }
}

async fn remove_file_best_effort(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {e}", path.display());
        }
    }
}

/// Best-effort removal of cache-state files after a delete commits.
pub async fn remove_files_best_effort(paths: &[PathBuf]) {
    for path in paths {
        if path.is_file() {
            remove_file_best_effort(path).await;
        }
    }
}
