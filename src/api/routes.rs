//! HTTP surface of the asset registry

use crate::api::error::{ApiError, ApiResult};
use crate::api::schemas::*;
use crate::api::{owner_id_from_headers, AppState};
use crate::config::RootType;
use crate::domain::{ListAssetsQuery, SortField, SortOrder};
use crate::error::RegistryError;
use crate::hash;
use crate::infrastructure::database::entities::reference_tag::ORIGIN_MANUAL;
use crate::infrastructure::database::queries::tags::TagOrder;
use crate::operations::{ingest, management, tagging};
use crate::scanner::supervisor::{ScanOptions, ScanPhase};
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, head, post};
use axum::{Json, Router};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{json, Map, Value as JsonValue};
use std::path::PathBuf;
use std::str::FromStr;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::warn;
use uuid::Uuid;

const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// RFC 5987 `filename*` encoding keeps unreserved characters only.
const FILENAME_STAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/assets/hash/:hash", head(head_asset_by_hash))
        .route("/api/assets", get(list_assets).post(upload_asset))
        .route("/api/assets/from-hash", post(create_asset_from_hash))
        .route(
            "/api/assets/:id",
            get(get_asset).put(update_asset).delete(delete_asset),
        )
        .route("/api/assets/:id/content", get(download_asset_content))
        .route(
            "/api/assets/:id/tags",
            post(add_asset_tags).delete(remove_asset_tags),
        )
        .route("/api/assets/seed", post(seed_assets))
        .route("/api/assets/seed/status", get(seed_status))
        .route("/api/assets/seed/cancel", post(cancel_seed))
        .route("/api/assets/prune", post(prune_assets))
        .route("/api/tags", get(list_tags))
        .with_state(state)
}

async fn head_asset_by_hash(
    State(state): State<AppState>,
    Path(hash_str): Path<String>,
) -> Response {
    let Ok(canonical) = hash::parse_canonical_hash(&hash_str) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match management::asset_exists(&state.db(), &canonical).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Decode a query string into a multimap. Keys may repeat and may carry the
/// `[]` suffix convention for list parameters.
fn parse_query_multimap(raw: &str) -> std::collections::HashMap<String, Vec<String>> {
    let mut map: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let decode = |s: &str| {
            percent_encoding::percent_decode_str(&s.replace('+', " "))
                .decode_utf8_lossy()
                .into_owned()
        };
        let key = decode(key);
        let key = key.strip_suffix("[]").unwrap_or(&key).to_string();
        map.entry(key).or_default().push(decode(value));
    }
    map
}

async fn list_assets(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> ApiResult<Json<AssetsList>> {
    let params = parse_query_multimap(raw.as_deref().unwrap_or(""));
    let first = |key: &str| params.get(key).and_then(|v| v.first()).map(String::as_str);
    // List parameters accept repeated keys and comma-separated values.
    let tag_list = |key: &str| -> Vec<String> {
        params
            .get(key)
            .map(|values| {
                values
                    .iter()
                    .flat_map(|v| split_tag_list(Some(v)))
                    .collect()
            })
            .unwrap_or_default()
    };

    let metadata_filter = match first("metadata_filter") {
        None | Some("") => None,
        Some(raw) => match serde_json::from_str::<JsonValue>(raw) {
            Ok(JsonValue::Object(map)) => Some(map),
            Ok(_) => {
                return Err(ApiError::invalid_query(
                    "metadata_filter must be a JSON object",
                ))
            }
            Err(e) => {
                return Err(ApiError::invalid_query(format!(
                    "metadata_filter is not valid JSON: {e}"
                )))
            }
        },
    };

    let limit = match first("limit") {
        None | Some("") => 20,
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ApiError::invalid_query("limit must be a non-negative integer"))?,
    };
    let offset = match first("offset") {
        None | Some("") => 0,
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ApiError::invalid_query("offset must be a non-negative integer"))?,
    };

    let query = ListAssetsQuery {
        include_tags: tag_list("include_tags"),
        exclude_tags: tag_list("exclude_tags"),
        name_contains: first("name_contains").map(str::to_string),
        metadata_filter,
        limit: limit.clamp(1, 500),
        offset,
        sort: SortField::parse(first("sort")),
        order: SortOrder::parse(first("order")),
    };

    let owner_id = owner_id_from_headers(&headers);
    let page = management::list_assets_page(&state.db(), &query, &owner_id).await?;

    let assets: Vec<AssetSummary> = page.items.iter().map(AssetSummary::from).collect();
    let has_more = query.offset + (assets.len() as u64) < page.total;
    Ok(Json(AssetsList {
        assets,
        total: page.total,
        has_more,
    }))
}

async fn get_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AssetDetail>> {
    let owner_id = owner_id_from_headers(&headers);
    let detail = management::get_asset_detail(&state.db(), id, &owner_id)
        .await?
        .ok_or_else(|| {
            ApiError::asset_not_found(format!("AssetReference {id} not found"))
                .with_details(json!({ "id": id }))
        })?;
    Ok(Json(AssetDetail::from(&detail)))
}

async fn download_asset_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(params): Query<DownloadParams>,
) -> ApiResult<Response> {
    let disposition = match params.disposition.as_deref() {
        Some("inline") => "inline",
        _ => "attachment",
    };

    let owner_id = owner_id_from_headers(&headers);
    let resolved = management::resolve_asset_for_download(&state.db(), id, &owner_id).await?;

    let file = tokio::fs::File::open(&resolved.abs_path)
        .await
        .map_err(|_| ApiError::from(RegistryError::FileNotFound(resolved.abs_path.display().to_string())))?;
    let size = file
        .metadata()
        .await
        .map(|m| m.len())
        .map_err(RegistryError::from)?;

    let stream = ReaderStream::with_capacity(file, DOWNLOAD_CHUNK_SIZE);
    let body = Body::from_stream(stream);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, resolved.content_type)
        .header(header::CONTENT_LENGTH, size)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(disposition, &resolved.download_name),
        )
        .body(body)
        .map_err(|e| ApiError::from(RegistryError::Internal(e.to_string())))?;
    Ok(response)
}

/// `Content-Disposition` with a sanitized ASCII fallback and an RFC 5987
/// `filename*` for the real name.
fn content_disposition(disposition: &str, filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(filename, FILENAME_STAR);
    format!("{disposition}; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

async fn create_asset_from_hash(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateFromHashBody>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<Response> {
    let Json(body) = body.map_err(|_| ApiError::invalid_json())?;
    let owner_id = owner_id_from_headers(&headers);

    let outcome = ingest::create_from_hash(
        &state.db(),
        &state.config(),
        &body.hash,
        &body.name,
        Some(&body.tags),
        body.user_metadata.as_ref(),
        &owner_id,
    )
    .await?;

    let Some(outcome) = outcome else {
        return Err(ApiError::asset_not_found(format!(
            "Asset content {} does not exist",
            body.hash
        )));
    };

    let payload = AssetCreated {
        detail: AssetDetail::from(&outcome.detail),
        created_new: false,
    };
    Ok((StatusCode::CREATED, Json(payload)).into_response())
}

/// Spooled multipart state. The temp file is cleaned up on every error path.
struct ParsedUpload {
    tmp_path: Option<PathBuf>,
    client_filename: Option<String>,
    provided_name: Option<String>,
    tags: Vec<String>,
    user_metadata: Option<Map<String, JsonValue>>,
    provided_hash: Option<String>,
    provided_hash_exists: bool,
}

async fn cleanup_temp(parsed: &ParsedUpload) {
    if let Some(path) = &parsed.tmp_path {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove upload temp file {}: {e}", path.display());
            }
        }
    }
}

async fn parse_multipart_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> ApiResult<ParsedUpload> {
    let mut parsed = ParsedUpload {
        tmp_path: None,
        client_filename: None,
        provided_name: None,
        tags: Vec::new(),
        user_metadata: None,
        provided_hash: None,
        provided_hash_exists: false,
    };

    let spool_dir = state.config().data_dir.join("uploads");

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                cleanup_temp(&parsed).await;
                return Err(ApiError::invalid_body(format!("malformed multipart: {e}")));
            }
        };
        match field.name().unwrap_or_default() {
            "hash" => {
                let raw = match field.text().await {
                    Ok(raw) => raw,
                    Err(e) => {
                        cleanup_temp(&parsed).await;
                        return Err(ApiError::invalid_body(format!(
                            "unreadable hash field: {e}"
                        )));
                    }
                };
                let canonical = match hash::parse_canonical_hash(&raw) {
                    Ok(canonical) => canonical,
                    Err(e) => {
                        cleanup_temp(&parsed).await;
                        return Err(e.into());
                    }
                };
                parsed.provided_hash_exists =
                    management::asset_exists(&state.db(), &canonical).await?;
                parsed.provided_hash = Some(canonical);
            }
            "name" => {
                parsed.provided_name = field.text().await.ok().filter(|s| !s.trim().is_empty());
            }
            "tags" => {
                let raw = field.text().await.unwrap_or_default();
                if !raw.trim().is_empty() {
                    match serde_json::from_str::<Vec<String>>(&raw) {
                        Ok(tags) => parsed.tags = tags,
                        Err(_) => {
                            cleanup_temp(&parsed).await;
                            return Err(ApiError::invalid_body(
                                "tags must be a JSON array of strings",
                            ));
                        }
                    }
                }
            }
            "user_metadata" => {
                let raw = field.text().await.unwrap_or_default();
                if !raw.trim().is_empty() {
                    match serde_json::from_str::<Map<String, JsonValue>>(&raw) {
                        Ok(metadata) => parsed.user_metadata = Some(metadata),
                        Err(_) => {
                            cleanup_temp(&parsed).await;
                            return Err(ApiError::invalid_body(
                                "user_metadata must be a JSON object",
                            ));
                        }
                    }
                }
            }
            "file" => {
                parsed.client_filename = field.file_name().map(|s| s.to_string());

                // Fast path: a known hash arriving before the file means the
                // bytes never need to touch disk.
                if parsed.provided_hash.is_some() && parsed.provided_hash_exists {
                    let mut field = field;
                    while let Ok(Some(_)) = field.chunk().await {}
                    continue;
                }

                tokio::fs::create_dir_all(&spool_dir)
                    .await
                    .map_err(RegistryError::from)?;
                let tmp_path = spool_dir.join(format!("upload-{}.part", Uuid::new_v4()));
                let mut out = tokio::fs::File::create(&tmp_path)
                    .await
                    .map_err(RegistryError::from)?;
                parsed.tmp_path = Some(tmp_path);

                let mut field = field;
                loop {
                    match field.chunk().await {
                        Ok(Some(chunk)) => {
                            if let Err(e) = out.write_all(&chunk).await {
                                cleanup_temp(&parsed).await;
                                return Err(ApiError::from(RegistryError::from(e)));
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            cleanup_temp(&parsed).await;
                            return Err(ApiError::invalid_body(format!(
                                "upload stream aborted: {e}"
                            )));
                        }
                    }
                }
                out.flush().await.map_err(RegistryError::from)?;
            }
            _ => {}
        }
    }

    Ok(parsed)
}

async fn upload_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Response> {
    let owner_id = owner_id_from_headers(&headers);
    let parsed = parse_multipart_upload(&state, multipart).await?;

    // Unknown models category fails before any hashing happens.
    if parsed.tags.first().map(String::as_str) == Some("models") {
        let category = parsed.tags.get(1).map(String::as_str).unwrap_or("");
        if !state.config().models.contains_key(category) {
            cleanup_temp(&parsed).await;
            return Err(ApiError::invalid_body(format!(
                "unknown models category '{category}'"
            )));
        }
    }

    if let (Some(provided_hash), true) = (&parsed.provided_hash, parsed.provided_hash_exists) {
        let digest = provided_hash.split(':').nth(1).unwrap_or_default().to_string();
        let name = parsed
            .provided_name
            .clone()
            .or_else(|| parsed.client_filename.clone())
            .unwrap_or(digest);
        let outcome = ingest::create_from_hash(
            &state.db(),
            &state.config(),
            provided_hash,
            &name,
            Some(&parsed.tags),
            parsed.user_metadata.as_ref(),
            &owner_id,
        )
        .await;
        cleanup_temp(&parsed).await;
        let outcome = outcome?.ok_or_else(|| {
            ApiError::asset_not_found(format!("Asset content {provided_hash} does not exist"))
        })?;
        let payload = AssetCreated {
            detail: AssetDetail::from(&outcome.detail),
            created_new: false,
        };
        return Ok((StatusCode::OK, Json(payload)).into_response());
    }

    let Some(tmp_path) = parsed.tmp_path.clone() else {
        return Err(ApiError::asset_not_found(
            "Provided hash not found and no file uploaded.",
        ));
    };

    let result = ingest::upload_from_temp_path(
        &state.db(),
        &state.config(),
        &tmp_path,
        parsed.provided_name.as_deref(),
        &parsed.tags,
        parsed.user_metadata.as_ref(),
        parsed.client_filename.as_deref(),
        &owner_id,
        parsed.provided_hash.as_deref(),
    )
    .await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            cleanup_temp(&parsed).await;
            return Err(e.into());
        }
    };

    let status = if outcome.created_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let payload = AssetCreated {
        detail: AssetDetail::from(&outcome.detail),
        created_new: outcome.created_new,
    };
    Ok((status, Json(payload)).into_response())
}

async fn update_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateAssetBody>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<Json<AssetUpdated>> {
    let Json(body) = body.map_err(|_| ApiError::invalid_json())?;
    let owner_id = owner_id_from_headers(&headers);

    let detail = management::update_asset_metadata(
        &state.db(),
        &state.config(),
        id,
        body.name.as_deref(),
        body.tags.as_deref(),
        body.user_metadata.as_ref(),
        &owner_id,
    )
    .await?;
    Ok(Json(AssetUpdated::from(&detail)))
}

async fn delete_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<Response> {
    let delete_content = params
        .delete_content
        .as_deref()
        .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
        .unwrap_or(true);

    let owner_id = owner_id_from_headers(&headers);
    let deleted =
        management::delete_asset_reference(&state.db(), id, &owner_id, delete_content).await?;
    if !deleted {
        return Err(ApiError::asset_not_found(format!(
            "AssetReference {id} not found."
        )));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn add_asset_tags(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Result<Json<TagsBody>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<Response> {
    let Json(body) = body.map_err(|_| ApiError::invalid_json())?;
    let owner_id = owner_id_from_headers(&headers);
    let outcome = tagging::apply_tags(&state.db(), id, &body.tags, ORIGIN_MANUAL, &owner_id).await?;
    Ok(Json(outcome).into_response())
}

async fn remove_asset_tags(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Result<Json<TagsBody>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<Response> {
    let Json(body) = body.map_err(|_| ApiError::invalid_json())?;
    let owner_id = owner_id_from_headers(&headers);
    let outcome = tagging::remove_tags(&state.db(), id, &body.tags, &owner_id).await?;
    Ok(Json(outcome).into_response())
}

async fn list_tags(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TagsListParams>,
) -> ApiResult<Json<TagsList>> {
    let owner_id = owner_id_from_headers(&headers);
    let page = tagging::list_tags(
        &state.db(),
        &owner_id,
        params.prefix.as_deref(),
        params.include_zero,
        TagOrder::parse(params.order.as_deref()),
        params.limit,
        params.offset,
    )
    .await?;

    let tags: Vec<TagUsageOut> = page.tags.into_iter().map(TagUsageOut::from).collect();
    let has_more = params.offset + (tags.len() as u64) < page.total;
    Ok(Json(TagsList {
        tags,
        total: page.total,
        has_more,
    }))
}

async fn seed_assets(
    State(state): State<AppState>,
    Query(params): Query<SeedParams>,
    body: Option<Json<SeedBody>>,
) -> ApiResult<Response> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let roots: Vec<RootType> = body
        .roots
        .unwrap_or_else(|| RootType::ALL.iter().map(|r| r.to_string()).collect())
        .iter()
        .filter_map(|r| RootType::from_str(r).ok())
        .collect();
    if roots.is_empty() {
        return Err(ApiError::invalid_body("No valid roots specified"));
    }

    let phase = match body.phase.as_deref() {
        None => ScanPhase::Fast,
        Some(raw) => ScanPhase::from_str(raw)
            .map_err(|_| ApiError::invalid_body(format!("unknown phase '{raw}'")))?,
    };

    let options = ScanOptions {
        roots,
        phase,
        ..ScanOptions::default()
    };
    let started = state.scanner().start(options, None);
    if !started {
        return Ok((
            StatusCode::CONFLICT,
            Json(json!({ "status": "already_running" })),
        )
            .into_response());
    }

    let should_wait = matches!(
        params.wait.as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("true") | Some("1") | Some("yes")
    );
    if should_wait {
        state.scanner().wait(None).await;
        let status = state.scanner().status();
        return Ok(Json(json!({
            "status": "completed",
            "progress": status.progress.unwrap_or_default(),
            "errors": status.errors,
        }))
        .into_response());
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "started" }))).into_response())
}

async fn seed_status(State(state): State<AppState>) -> Response {
    let status = state.scanner().status();
    Json(json!({
        "state": status.state.to_string(),
        "progress": status.progress,
        "errors": status.errors,
    }))
    .into_response()
}

async fn cancel_seed(State(state): State<AppState>) -> Response {
    let cancelled = state.scanner().cancel();
    let status = if cancelled { "cancelling" } else { "idle" };
    Json(json!({ "status": status })).into_response()
}

async fn prune_assets(State(state): State<AppState>) -> ApiResult<Response> {
    match state.scanner().mark_missing_outside_known_prefixes().await? {
        Some(marked) => Ok(Json(json!({ "status": "completed", "marked": marked })).into_response()),
        None => Ok((
            StatusCode::CONFLICT,
            Json(json!({ "status": "scan_running", "marked": 0 })),
        )
            .into_response()),
    }
}
