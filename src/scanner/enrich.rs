//! Enrichment pass: header probing and hash promotion
//!
//! Takes references below the requested enrichment level and fills in what
//! discovery skipped: a tier-2 header probe for model formats and the full
//! BLAKE3 content hash. When hashing reveals that the bytes are already
//! registered under another asset, the stub is merged into it.

use crate::error::RegistryResult;
use crate::hash;
use crate::infrastructure::database::entities::{asset, asset_reference};
use crate::infrastructure::database::queries::{asset as asset_queries, cache_state, reference};
use crate::operations::select_best_live_path;
use sea_orm::ConnectionTrait;
use serde_json::{Map, Value as JsonValue};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::debug;
use uuid::Uuid;

/// Enrichment levels. Discovery leaves references at 0.
pub const LEVEL_STUB: i32 = 0;
pub const LEVEL_METADATA: i32 = 1;
pub const LEVEL_HASHED: i32 = 2;

/// Safetensors headers above this size are treated as corrupt and skipped.
const MAX_HEADER_LEN: u64 = 16 * 1024 * 1024;

/// Read the safetensors preamble: an 8-byte little-endian length followed by
/// a JSON table of tensors. Returns a compact summary, not the raw header.
pub async fn probe_safetensors_header(path: &Path) -> Option<Map<String, JsonValue>> {
    if path.extension().and_then(|e| e.to_str()) != Some("safetensors") {
        return None;
    }
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let mut len_bytes = [0u8; 8];
    file.read_exact(&mut len_bytes).await.ok()?;
    let header_len = u64::from_le_bytes(len_bytes);
    if header_len == 0 || header_len > MAX_HEADER_LEN {
        return None;
    }
    let mut header = vec![0u8; header_len as usize];
    file.read_exact(&mut header).await.ok()?;
    let table: Map<String, JsonValue> = serde_json::from_slice(&header).ok()?;

    let tensor_count = table.keys().filter(|k| *k != "__metadata__").count();
    let mut out = Map::new();
    out.insert("format".into(), JsonValue::String("safetensors".into()));
    out.insert("tensor_count".into(), JsonValue::Number(tensor_count.into()));
    if let Some(JsonValue::Object(meta)) = table.get("__metadata__") {
        if let Some(JsonValue::String(format)) = meta.get("format") {
            out.insert("model_format".into(), JsonValue::String(format.clone()));
        }
    }
    Some(out)
}

/// Enrich one reference up to `target_level`. Returns the id of the
/// reference that survived (merging can replace it) or None when there is no
/// live file to work from.
pub async fn enrich_reference<C: ConnectionTrait>(
    conn: &C,
    reference: &asset_reference::Model,
    asset: &asset::Model,
    target_level: i32,
) -> RegistryResult<Option<Uuid>> {
    let states = cache_state::list_cache_states_by_asset_id(conn, asset.id).await?;
    let Some(live_path) = select_best_live_path(&states) else {
        debug!("No live path for asset {}, skipping enrichment", asset.id);
        return Ok(None);
    };

    let mut surviving_reference = reference.id;
    let mut extra_metadata = Map::new();

    if target_level >= LEVEL_METADATA {
        if let Some(header) = probe_safetensors_header(&live_path).await {
            extra_metadata.extend(header);
        }
    }

    if target_level >= LEVEL_HASHED && asset.hash.is_none() {
        let digest = hash::hash_file_async(&live_path).await?;
        let canonical = hash::to_canonical(&digest);
        match asset_queries::get_asset_by_hash(conn, &canonical).await? {
            Some(existing) if existing.id != asset.id => {
                // Duplicate bytes under a different path: fold the stub into
                // the existing identity.
                reference::repoint_cache_states(conn, asset.id, existing.id).await?;
                for stub_reference in
                    reference::list_references_for_asset(conn, asset.id).await?
                {
                    let survivor =
                        reference::reassign_reference_asset(conn, &stub_reference, existing.id)
                            .await?;
                    if stub_reference.id == reference.id {
                        surviving_reference = survivor;
                    }
                }
                asset_queries::delete_assets_by_ids(conn, &[asset.id]).await?;
            }
            Some(_) | None => {
                let mime = mime_guess::from_path(&live_path)
                    .first()
                    .map(|m| m.essence_str().to_string());
                asset_queries::set_asset_hash(conn, asset.id, &canonical, mime).await?;
            }
        }
    }

    if !extra_metadata.is_empty() {
        if let Some(current) = reference::get_reference_by_id(conn, surviving_reference).await? {
            let mut merged = match current.user_metadata {
                Some(JsonValue::Object(map)) => map,
                _ => Map::new(),
            };
            merged.extend(extra_metadata);
            reference::set_reference_metadata(conn, surviving_reference, &merged).await?;
        }
    }

    reference::set_reference_enrichment_level(conn, &[surviving_reference], target_level).await?;
    Ok(Some(surviving_reference))
}
