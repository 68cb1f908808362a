//! Plain data records returned across session boundaries
//!
//! Service operations never hand out live ORM models; everything is copied
//! into these records so database sessions can close immediately.

pub mod metadata;
pub mod path_rules;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Content identity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetData {
    pub id: Uuid,
    pub hash: Option<String>,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Named, owned handle to an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceData {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub preview_id: Option<Uuid>,
    pub user_metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    pub enrichment_level: i32,
}

/// Reference with its asset and tag names, as returned by detail lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailResult {
    pub reference: ReferenceData,
    pub asset: AssetData,
    pub tags: Vec<String>,
}

/// One page of listing results plus the total under the same predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    pub items: Vec<DetailResult>,
    pub total: u64,
}

/// Outcome of an upload or register-by-hash call.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub detail: DetailResult,
    /// True when new content was stored, false when the bytes were already known.
    pub created_new: bool,
}

/// Resolved download target.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadResolution {
    pub abs_path: std::path::PathBuf,
    pub content_type: String,
    pub download_name: String,
}

/// Tag with its usage count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagUsage {
    pub name: String,
    pub tag_type: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagPage {
    pub tags: Vec<TagUsage>,
    pub total: u64,
}

/// Result of adding tags to a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddTagsOutcome {
    pub added: Vec<String>,
    pub already_present: Vec<String>,
    pub total_tags: Vec<String>,
}

/// Result of removing tags from a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveTagsOutcome {
    pub removed: Vec<String>,
    pub not_present: Vec<String>,
    pub total_tags: Vec<String>,
}

/// Listing sort fields. Unknown input falls back to `CreatedAt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    Name,
    #[default]
    CreatedAt,
    UpdatedAt,
    LastAccessTime,
    Size,
}

impl SortField {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("name") => Self::Name,
            Some("updated_at") => Self::UpdatedAt,
            Some("last_access_time") => Self::LastAccessTime,
            Some("size") => Self::Size,
            _ => Self::CreatedAt,
        }
    }
}

/// Listing sort direction, default descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("asc") => Self::Asc,
            _ => Self::Desc,
        }
    }
}

/// Query parameters for `list_assets_page`.
#[derive(Debug, Clone, Default)]
pub struct ListAssetsQuery {
    pub include_tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub name_contains: Option<String>,
    pub metadata_filter: Option<serde_json::Map<String, JsonValue>>,
    pub limit: u64,
    pub offset: u64,
    pub sort: SortField,
    pub order: SortOrder,
}
