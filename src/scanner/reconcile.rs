//! Filesystem reconciler
//!
//! Cross-checks stored cache states against the filesystem for one root at a
//! time: toggles verify flags, drops stale stubs, prunes superseded missing
//! paths of hashed assets, and reports the set of surviving paths so the
//! scanner can skip re-ingesting them. Session-scoped: the caller commits.

use crate::config::{RegistryConfig, RootType};
use crate::error::RegistryResult;
use crate::infrastructure::database::queries::{asset, cache_state, tags};
use sea_orm::ConnectionTrait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

/// Fast unchanged check: recorded mtime must match exactly and, when a size
/// is recorded, the size must match too. A state without a recorded mtime is
/// never fast-ok.
pub fn verify_file_unchanged(
    mtime_db: Option<i64>,
    size_db: i64,
    metadata: &std::fs::Metadata,
) -> bool {
    let Some(mtime_db) = mtime_db else {
        return false;
    };
    if mtime_db != super::mtime_ns(metadata) {
        return false;
    }
    if size_db > 0 {
        return metadata.len() as i64 == size_db;
    }
    true
}

struct StateCheck {
    state_id: i32,
    file_path: String,
    exists: bool,
    fast_ok: bool,
    needs_verify: bool,
    is_missing: bool,
}

struct AssetGroup {
    hash: Option<String>,
    size_db: i64,
    states: Vec<StateCheck>,
}

/// Reconcile one root. Returns the surviving absolute paths (files that
/// exist and stay tracked).
pub async fn reconcile_root<C: ConnectionTrait>(
    conn: &C,
    config: &RegistryConfig,
    root: RootType,
    update_missing_tags: bool,
) -> RegistryResult<HashSet<PathBuf>> {
    let prefixes = config.prefixes_for_root(root);
    if prefixes.is_empty() {
        return Ok(HashSet::new());
    }

    let rows = cache_state::get_cache_states_for_prefixes(conn, &prefixes).await?;

    let mut by_asset: HashMap<Uuid, AssetGroup> = HashMap::new();
    for row in rows {
        let group = by_asset.entry(row.asset_id).or_insert_with(|| AssetGroup {
            hash: row.asset_hash.clone(),
            size_db: row.size_bytes,
            states: Vec::new(),
        });

        // Any stat failure counts as missing.
        let (exists, fast_ok) = match tokio::fs::metadata(&row.file_path).await {
            Ok(metadata) => (
                true,
                verify_file_unchanged(row.mtime_ns, group.size_db, &metadata),
            ),
            Err(_) => (false, false),
        };

        group.states.push(StateCheck {
            state_id: row.state_id,
            file_path: row.file_path,
            exists,
            fast_ok,
            needs_verify: row.needs_verify,
            is_missing: row.is_missing,
        });
    }

    let mut to_set_verify: Vec<i32> = Vec::new();
    let mut to_clear_verify: Vec<i32> = Vec::new();
    let mut stale_state_ids: Vec<i32> = Vec::new();
    let mut dead_stub_ids: Vec<Uuid> = Vec::new();
    let mut reappeared_paths: Vec<String> = Vec::new();
    let mut survivors: HashSet<PathBuf> = HashSet::new();

    for (asset_id, group) in &by_asset {
        let any_fast_ok = group.states.iter().any(|s| s.fast_ok);
        let all_missing = group.states.iter().all(|s| !s.exists);

        for state in &group.states {
            if !state.exists {
                continue;
            }
            // A reappeared file clears its soft delete.
            if state.is_missing {
                reappeared_paths.push(state.file_path.clone());
            }
            if state.fast_ok && state.needs_verify {
                to_clear_verify.push(state.state_id);
            }
            if !state.fast_ok && !state.needs_verify {
                to_set_verify.push(state.state_id);
            }
        }

        if group.hash.is_none() {
            if !group.states.is_empty() && all_missing {
                dead_stub_ids.push(*asset_id);
            } else {
                survivors.extend(
                    group
                        .states
                        .iter()
                        .filter(|s| s.exists)
                        .map(|s| PathBuf::from(&s.file_path)),
                );
            }
            continue;
        }

        if any_fast_ok {
            // The file moved; the surviving path is authoritative.
            stale_state_ids.extend(
                group
                    .states
                    .iter()
                    .filter(|s| !s.exists)
                    .map(|s| s.state_id),
            );
            if update_missing_tags {
                if let Err(e) = tags::remove_missing_tag_for_asset(conn, *asset_id).await {
                    warn!("Failed to clear missing tag for asset {asset_id}: {e}");
                }
            }
        } else if update_missing_tags {
            if let Err(e) = tags::add_missing_tag_for_asset(conn, *asset_id).await {
                warn!("Failed to add missing tag for asset {asset_id}: {e}");
            }
        }

        survivors.extend(
            group
                .states
                .iter()
                .filter(|s| s.exists)
                .map(|s| PathBuf::from(&s.file_path)),
        );
    }

    asset::delete_assets_by_ids(conn, &dead_stub_ids).await?;
    cache_state::delete_cache_states_by_ids(conn, &stale_state_ids).await?;
    cache_state::restore_cache_states_by_paths(conn, &reappeared_paths).await?;
    cache_state::bulk_set_needs_verify(conn, &to_set_verify, true).await?;
    cache_state::bulk_set_needs_verify(conn, &to_clear_verify, false).await?;

    Ok(survivors)
}
