//! Service operations exposed to the HTTP layer
//!
//! Every operation opens one session, commits on success, and returns plain
//! data records.

pub mod bulk;
pub mod ingest;
pub mod management;
pub mod tagging;

use crate::domain::{AssetData, ReferenceData};
use crate::infrastructure::database::entities::{asset, asset_reference, cache_state};
use std::path::{Path, PathBuf};

/// Pick the best on-disk path among an asset's cache states: prefer a
/// verified path that exists, fall back to any existing path. Missing rows
/// never qualify.
pub fn select_best_live_path(states: &[cache_state::Model]) -> Option<PathBuf> {
    let live = |state: &&cache_state::Model| {
        !state.is_missing && Path::new(&state.file_path).is_file()
    };
    states
        .iter()
        .filter(|s| !s.needs_verify)
        .find(live)
        .or_else(|| states.iter().find(live))
        .map(|s| PathBuf::from(&s.file_path))
}

pub(crate) fn asset_data(model: asset::Model) -> AssetData {
    AssetData {
        id: model.id,
        hash: model.hash,
        size_bytes: model.size_bytes,
        mime_type: model.mime_type,
        created_at: model.created_at,
    }
}

pub(crate) fn reference_data(model: asset_reference::Model) -> ReferenceData {
    ReferenceData {
        id: model.id,
        asset_id: model.asset_id,
        owner_id: model.owner_id,
        name: model.name,
        preview_id: model.preview_id,
        user_metadata: model.user_metadata,
        created_at: model.created_at,
        updated_at: model.updated_at,
        last_access_time: model.last_access_time,
        enrichment_level: model.enrichment_level,
    }
}
