//! Race-safe bulk ingest of discovered files
//!
//! The unique index on `cache_states.file_path` is the only arbiter of
//! contention: every batch inserts candidate rows with conflict-ignore and
//! then reads back which paths its own asset ids actually won. Losers are
//! unreachable stubs and are deleted inside the same transaction, so no
//! partial batch is ever observable.

use crate::domain::metadata::project_metadata;
use crate::error::RegistryResult;
use crate::infrastructure::database::entities::{reference_meta, reference_tag};
use crate::infrastructure::database::entities::reference_tag::ORIGIN_AUTOMATIC;
use crate::infrastructure::database::queries::{asset, cache_state, reference, tags};
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::ConnectionTrait;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// One file to ingest.
#[derive(Debug, Clone)]
pub struct FileSpec {
    pub abs_path: PathBuf,
    pub size_bytes: i64,
    pub mtime_ns: i64,
    pub name: String,
    pub tags: Vec<String>,
    /// Path relative to its root base dir, stored under the `filename`
    /// metadata key.
    pub relative_filename: Option<String>,
    pub user_metadata: Option<Map<String, JsonValue>>,
    /// Canonical hash when known up front (uploads); None creates a stub.
    pub hash: Option<String>,
}

/// Counts reported by one bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkInsertOutcome {
    pub inserted_references: u64,
    pub won_paths: u64,
    pub lost_paths: u64,
}

/// Insert a batch of file specs within the caller's transaction.
pub async fn bulk_insert_file_specs<C: ConnectionTrait>(
    conn: &C,
    specs: &[FileSpec],
    owner_id: &str,
) -> RegistryResult<BulkInsertOutcome> {
    if specs.is_empty() {
        return Ok(BulkInsertOutcome::default());
    }

    let now = Utc::now();
    let mut asset_rows = Vec::with_capacity(specs.len());
    let mut state_rows = Vec::with_capacity(specs.len());
    let mut path_to_asset: Vec<(String, Uuid)> = Vec::with_capacity(specs.len());
    let mut by_asset: HashMap<Uuid, (Uuid, &FileSpec)> = HashMap::with_capacity(specs.len());

    for spec in specs {
        let asset_id = Uuid::new_v4();
        let reference_id = Uuid::new_v4();
        let path = spec.abs_path.to_string_lossy().to_string();

        asset_rows.push(asset::new_asset_row(
            asset_id,
            spec.hash.clone(),
            spec.size_bytes,
            now,
        ));
        state_rows.push(crate::infrastructure::database::entities::cache_state::ActiveModel {
            asset_id: Set(asset_id),
            file_path: Set(path.clone()),
            mtime_ns: Set(Some(spec.mtime_ns)),
            needs_verify: Set(false),
            is_missing: Set(false),
            ..Default::default()
        });
        path_to_asset.push((path, asset_id));
        by_asset.insert(asset_id, (reference_id, spec));
    }

    // 1. Stub (or pre-hashed) asset rows.
    asset::bulk_insert_assets(conn, asset_rows).await?;

    // 2. Claim the paths; the unique index arbitrates.
    cache_state::bulk_insert_cache_states_ignore_conflicts(conn, state_rows).await?;

    // 3. A path is won iff its row now carries our asset id.
    let winners = cache_state::get_winning_paths(conn, &path_to_asset).await?;

    let lost_assets: Vec<Uuid> = path_to_asset
        .iter()
        .filter(|(path, _)| !winners.contains(path))
        .map(|(_, asset_id)| *asset_id)
        .collect();
    let lost_paths = lost_assets.len() as u64;

    // 4. Loser stubs are unreachable.
    asset::delete_assets_by_ids(conn, &lost_assets).await?;

    if winners.is_empty() {
        return Ok(BulkInsertOutcome {
            inserted_references: 0,
            won_paths: 0,
            lost_paths,
        });
    }

    // 5. Re-activate previously missing rows among the winning paths.
    let winner_paths: Vec<&String> = winners.iter().collect();
    cache_state::restore_cache_states_by_paths(conn, &winner_paths).await?;

    // 6. Reference rows for winners only.
    let winner_assets: Vec<(Uuid, Uuid, &FileSpec)> = path_to_asset
        .iter()
        .filter(|(path, _)| winners.contains(path))
        .map(|(_, asset_id)| {
            let (reference_id, spec) = by_asset[asset_id];
            (*asset_id, reference_id, spec)
        })
        .collect();

    let reference_rows = winner_assets
        .iter()
        .map(|(asset_id, reference_id, spec)| {
            let metadata = build_spec_metadata(spec);
            reference::new_reference_row(
                *reference_id,
                *asset_id,
                owner_id,
                &spec.name,
                metadata.map(JsonValue::Object),
                now,
            )
        })
        .collect();
    reference::bulk_insert_references_ignore_conflicts(conn, reference_rows).await?;

    // 7. Only references that actually landed get tags and metadata.
    let candidate_ids: Vec<Uuid> = winner_assets.iter().map(|(_, rid, _)| *rid).collect();
    let landed = reference::get_reference_ids_present(conn, &candidate_ids).await?;
    let landed_ours: Vec<&(Uuid, Uuid, &FileSpec)> = winner_assets
        .iter()
        .filter(|(_, reference_id, _)| landed.contains(reference_id))
        .collect();

    // 8. Tag and projection rows, independently chunked.
    let mut tag_rows: Vec<reference_tag::ActiveModel> = Vec::new();
    let mut meta_rows: Vec<reference_meta::ActiveModel> = Vec::new();
    for (_, reference_id, spec) in &landed_ours {
        for tag_name in &spec.tags {
            tag_rows.push(reference_tag::ActiveModel {
                reference_id: Set(*reference_id),
                tag_name: Set(tag_name.clone()),
                origin: Set(ORIGIN_AUTOMATIC.to_string()),
                added_at: Set(now),
            });
        }
        if let Some(metadata) = build_spec_metadata(spec) {
            for row in project_metadata(&metadata) {
                meta_rows.push(reference::meta_row_to_active(*reference_id, row));
            }
        }
    }
    tags::bulk_insert_tags_and_meta(conn, tag_rows, meta_rows).await?;

    Ok(BulkInsertOutcome {
        inserted_references: landed_ours.len() as u64,
        won_paths: winners.len() as u64,
        lost_paths,
    })
}

fn build_spec_metadata(spec: &FileSpec) -> Option<Map<String, JsonValue>> {
    let mut metadata = spec.user_metadata.clone().unwrap_or_default();
    if let Some(filename) = &spec.relative_filename {
        metadata.insert("filename".to_string(), JsonValue::String(filename.clone()));
    }
    if metadata.is_empty() {
        None
    } else {
        Some(metadata)
    }
}

/// Tag pool across a batch, used to pre-create tag rows before the insert.
pub fn collect_batch_tags(specs: &[FileSpec]) -> Vec<String> {
    let mut pool: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for spec in specs {
        for tag_name in &spec.tags {
            if seen.insert(tag_name.clone()) {
                pool.push(tag_name.clone());
            }
        }
    }
    pool
}
