//! Request and response bodies for the HTTP surface

use crate::domain::{DetailResult, TagUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

fn default_tag_limit() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

/// Split a comma-separated tag list, dropping empty entries.
pub fn split_tag_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

#[derive(Debug, Serialize)]
pub struct AssetSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_hash: Option<String>,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
}

impl From<&DetailResult> for AssetSummary {
    fn from(item: &DetailResult) -> Self {
        Self {
            id: item.reference.id,
            name: item.reference.name.clone(),
            asset_hash: item.asset.hash.clone(),
            size: item.asset.size_bytes,
            mime_type: item.asset.mime_type.clone(),
            tags: item.tags.clone(),
            created_at: item.reference.created_at,
            updated_at: item.reference.updated_at,
            last_access_time: item.reference.last_access_time,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AssetsList {
    pub assets: Vec<AssetSummary>,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct AssetDetail {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_hash: Option<String>,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub tags: Vec<String>,
    pub user_metadata: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
}

impl From<&DetailResult> for AssetDetail {
    fn from(item: &DetailResult) -> Self {
        Self {
            id: item.reference.id,
            name: item.reference.name.clone(),
            asset_hash: item.asset.hash.clone(),
            size: item.asset.size_bytes,
            mime_type: item.asset.mime_type.clone(),
            tags: item.tags.clone(),
            user_metadata: item
                .reference
                .user_metadata
                .clone()
                .unwrap_or_else(|| JsonValue::Object(Map::new())),
            preview_id: item.reference.preview_id,
            created_at: item.reference.created_at,
            last_access_time: item.reference.last_access_time,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AssetCreated {
    #[serde(flatten)]
    pub detail: AssetDetail,
    pub created_new: bool,
}

#[derive(Debug, Serialize)]
pub struct AssetUpdated {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_hash: Option<String>,
    pub tags: Vec<String>,
    pub user_metadata: JsonValue,
    pub updated_at: DateTime<Utc>,
}

impl From<&DetailResult> for AssetUpdated {
    fn from(item: &DetailResult) -> Self {
        Self {
            id: item.reference.id,
            name: item.reference.name.clone(),
            asset_hash: item.asset.hash.clone(),
            tags: item.tags.clone(),
            user_metadata: item
                .reference
                .user_metadata
                .clone()
                .unwrap_or_else(|| JsonValue::Object(Map::new())),
            updated_at: item.reference.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateFromHashBody {
    pub hash: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub user_metadata: Option<Map<String, JsonValue>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateAssetBody {
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
    pub user_metadata: Option<Map<String, JsonValue>>,
}

#[derive(Debug, Deserialize)]
pub struct TagsBody {
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TagsListParams {
    pub prefix: Option<String>,
    #[serde(default = "default_tag_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
    pub order: Option<String>,
    #[serde(default = "default_true")]
    pub include_zero: bool,
}

#[derive(Debug, Serialize)]
pub struct TagUsageOut {
    pub name: String,
    #[serde(rename = "type")]
    pub tag_type: String,
    pub count: u64,
}

impl From<TagUsage> for TagUsageOut {
    fn from(usage: TagUsage) -> Self {
        Self {
            name: usage.name,
            tag_type: usage.tag_type,
            count: usage.count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TagsList {
    pub tags: Vec<TagUsageOut>,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct SeedBody {
    #[serde(default)]
    pub roots: Option<Vec<String>>,
    #[serde(default)]
    pub phase: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SeedParams {
    #[serde(default)]
    pub wait: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DeleteParams {
    pub delete_content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DownloadParams {
    pub disposition: Option<String>,
}
