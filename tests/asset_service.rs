//! Service operations: upload, register-by-hash, delete, download, tags

mod common;

use asset_registry::domain::ListAssetsQuery;
use asset_registry::error::RegistryError;
use asset_registry::infrastructure::database::entities::{asset, asset_reference, cache_state};
use asset_registry::infrastructure::database::queries::tags::TagOrder;
use asset_registry::operations::{ingest, management, tagging};
use common::TestEnv;
use pretty_assertions::assert_eq;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use std::path::PathBuf;

fn tags_of(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

async fn spool_upload(env: &TestEnv, contents: &[u8]) -> PathBuf {
    let dir = env.config.data_dir.join("uploads");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("spool-{}", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[tokio::test]
async fn upload_new_bytes_lands_under_models_category() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let contents = b"fresh model weights";
    let temp = spool_upload(&env, contents).await;

    let outcome = ingest::upload_from_temp_path(
        &registry.db(),
        &registry.config(),
        &temp,
        Some("My Model"),
        &tags_of(&["models", "loras"]),
        None,
        Some("my-model.safetensors"),
        "",
        None,
    )
    .await
    .unwrap();

    assert!(outcome.created_new);
    assert_eq!(outcome.detail.reference.name, "My Model");
    assert_eq!(
        outcome.detail.asset.hash.as_deref(),
        Some(common::canonical_hash(contents).as_str())
    );

    // Temp file is gone; the content sits at <digest>.safetensors.
    assert!(!temp.exists());
    let digest = common::canonical_hash(contents);
    let digest = digest.strip_prefix("blake3:").unwrap();
    let dest = env.loras_dir().join(format!("{digest}.safetensors"));
    assert!(dest.is_file());

    let db = registry.db();
    let state = cache_state::Entity::find().one(db.conn()).await.unwrap().unwrap();
    assert_eq!(state.file_path, dest.to_string_lossy());
}

#[tokio::test]
async fn upload_duplicate_bytes_reuses_the_asset() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let contents = b"duplicated payload";

    let first = spool_upload(&env, contents).await;
    ingest::upload_from_temp_path(
        &registry.db(),
        &registry.config(),
        &first,
        Some("original"),
        &tags_of(&["models", "loras"]),
        None,
        Some("original.bin"),
        "",
        None,
    )
    .await
    .unwrap();

    let second = spool_upload(&env, contents).await;
    let outcome = ingest::upload_from_temp_path(
        &registry.db(),
        &registry.config(),
        &second,
        Some("alt"),
        &tags_of(&["models", "loras"]),
        None,
        Some("alt.bin"),
        "",
        None,
    )
    .await
    .unwrap();

    assert!(!outcome.created_new);
    assert!(!second.exists(), "duplicate temp file is discarded");

    let db = registry.db();
    assert_eq!(asset::Entity::find().count(db.conn()).await.unwrap(), 1);
    assert_eq!(
        asset_reference::Entity::find().count(db.conn()).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn upload_with_wrong_expected_hash_leaves_nothing_behind() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let temp = spool_upload(&env, b"some bytes").await;
    let wrong = common::canonical_hash(b"other bytes");

    let result = ingest::upload_from_temp_path(
        &registry.db(),
        &registry.config(),
        &temp,
        Some("x"),
        &tags_of(&["models", "loras"]),
        None,
        Some("x.bin"),
        "",
        Some(&wrong),
    )
    .await;

    assert!(matches!(result, Err(RegistryError::HashMismatch)));
    assert!(!temp.exists());

    let db = registry.db();
    assert_eq!(asset::Entity::find().count(db.conn()).await.unwrap(), 0);
    assert_eq!(cache_state::Entity::find().count(db.conn()).await.unwrap(), 0);
}

#[tokio::test]
async fn create_from_hash_needs_known_content() {
    let env = TestEnv::new();
    let registry = env.registry().await;

    let unknown = common::canonical_hash(b"never uploaded");
    let missing = ingest::create_from_hash(
        &registry.db(),
        &registry.config(),
        &unknown,
        "ghost",
        None,
        None,
        "",
    )
    .await
    .unwrap();
    assert!(missing.is_none());

    // Upload, then register a second name against the same hash.
    let contents = b"registered bytes";
    let temp = spool_upload(&env, contents).await;
    ingest::upload_from_temp_path(
        &registry.db(),
        &registry.config(),
        &temp,
        Some("original"),
        &tags_of(&["models", "loras"]),
        None,
        Some("original.bin"),
        "",
        None,
    )
    .await
    .unwrap();

    let hash = common::canonical_hash(contents);
    let outcome = ingest::create_from_hash(
        &registry.db(),
        &registry.config(),
        &hash,
        "alt",
        Some(&tags_of(&["models", "loras"])),
        None,
        "",
    )
    .await
    .unwrap()
    .unwrap();
    assert!(outcome.created, "a new reference name was created");

    // Registering the same name again finds the existing reference.
    let again = ingest::create_from_hash(
        &registry.db(),
        &registry.config(),
        &hash,
        "alt",
        None,
        None,
        "",
    )
    .await
    .unwrap()
    .unwrap();
    assert!(!again.created);
    assert_eq!(again.detail.reference.id, outcome.detail.reference.id);
}

#[tokio::test]
async fn asset_exists_validates_and_answers() {
    let env = TestEnv::new();
    let registry = env.registry().await;

    assert!(matches!(
        management::asset_exists(&registry.db(), "nonsense").await,
        Err(RegistryError::InvalidHash(_))
    ));
    assert!(!management::asset_exists(&registry.db(), &common::canonical_hash(b"nope"))
        .await
        .unwrap());
}

#[tokio::test]
async fn ownership_hides_foreign_references() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let contents = b"alices bytes";
    let temp = spool_upload(&env, contents).await;

    let outcome = ingest::upload_from_temp_path(
        &registry.db(),
        &registry.config(),
        &temp,
        Some("private"),
        &tags_of(&["models", "loras"]),
        None,
        Some("private.bin"),
        "alice",
        None,
    )
    .await
    .unwrap();
    let id = outcome.detail.reference.id;

    assert!(management::get_asset_detail(&registry.db(), id, "alice")
        .await
        .unwrap()
        .is_some());
    assert!(management::get_asset_detail(&registry.db(), id, "bob")
        .await
        .unwrap()
        .is_none());

    // Deleting through the wrong owner reports not-found.
    assert!(!management::delete_asset_reference(&registry.db(), id, "bob", true)
        .await
        .unwrap());
}

#[tokio::test]
async fn delete_orphan_reference_removes_content_and_files() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let contents = b"deletable";
    let temp = spool_upload(&env, contents).await;

    let outcome = ingest::upload_from_temp_path(
        &registry.db(),
        &registry.config(),
        &temp,
        Some("victim"),
        &tags_of(&["models", "loras"]),
        None,
        Some("victim.bin"),
        "",
        None,
    )
    .await
    .unwrap();

    let db = registry.db();
    let state = cache_state::Entity::find().one(db.conn()).await.unwrap().unwrap();
    let on_disk = PathBuf::from(&state.file_path);
    assert!(on_disk.is_file());

    let deleted = management::delete_asset_reference(
        &registry.db(),
        outcome.detail.reference.id,
        "",
        true,
    )
    .await
    .unwrap();
    assert!(deleted);

    assert_eq!(asset::Entity::find().count(db.conn()).await.unwrap(), 0);
    assert_eq!(cache_state::Entity::find().count(db.conn()).await.unwrap(), 0);
    assert!(!on_disk.exists(), "orphaned content file is removed");
}

#[tokio::test]
async fn delete_keeps_content_while_other_references_remain() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let contents = b"shared bytes";
    let temp = spool_upload(&env, contents).await;

    let first = ingest::upload_from_temp_path(
        &registry.db(),
        &registry.config(),
        &temp,
        Some("one"),
        &tags_of(&["models", "loras"]),
        None,
        Some("one.bin"),
        "",
        None,
    )
    .await
    .unwrap();
    let hash = common::canonical_hash(contents);
    ingest::create_from_hash(&registry.db(), &registry.config(), &hash, "two", None, None, "")
        .await
        .unwrap()
        .unwrap();

    let deleted = management::delete_asset_reference(
        &registry.db(),
        first.detail.reference.id,
        "",
        true,
    )
    .await
    .unwrap();
    assert!(deleted);

    let db = registry.db();
    assert_eq!(asset::Entity::find().count(db.conn()).await.unwrap(), 1);
    assert_eq!(cache_state::Entity::find().count(db.conn()).await.unwrap(), 1);
}

#[tokio::test]
async fn download_resolves_live_path_and_touches_access_time() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let contents = b"downloadable";
    let temp = spool_upload(&env, contents).await;

    let outcome = ingest::upload_from_temp_path(
        &registry.db(),
        &registry.config(),
        &temp,
        Some("dl.png"),
        &tags_of(&["output"]),
        None,
        Some("dl.png"),
        "",
        None,
    )
    .await
    .unwrap();
    let id = outcome.detail.reference.id;
    let before = outcome.detail.reference.last_access_time;

    let resolved = management::resolve_asset_for_download(&registry.db(), id, "")
        .await
        .unwrap();
    assert!(resolved.abs_path.is_file());
    assert_eq!(resolved.download_name, "dl.png");
    assert_eq!(resolved.content_type, "image/png");

    let after = management::get_asset_detail(&registry.db(), id, "")
        .await
        .unwrap()
        .unwrap()
        .reference
        .last_access_time;
    assert!(after >= before);

    // Remove the file: resolution now fails with a file error.
    std::fs::remove_file(&resolved.abs_path).unwrap();
    assert!(matches!(
        management::resolve_asset_for_download(&registry.db(), id, "").await,
        Err(RegistryError::FileNotFound(_))
    ));
}

#[tokio::test]
async fn update_metadata_rewrites_projection_and_tags() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let temp = spool_upload(&env, b"meta bytes").await;

    let outcome = ingest::upload_from_temp_path(
        &registry.db(),
        &registry.config(),
        &temp,
        Some("meta"),
        &tags_of(&["models", "loras"]),
        None,
        Some("meta.bin"),
        "",
        None,
    )
    .await
    .unwrap();
    let id = outcome.detail.reference.id;

    let new_meta = json!({"rating": 5, "notes": "good"});
    let detail = management::update_asset_metadata(
        &registry.db(),
        &registry.config(),
        id,
        Some("renamed"),
        Some(&tags_of(&["models", "loras", "favorite"])),
        new_meta.as_object(),
        "",
    )
    .await
    .unwrap();

    assert_eq!(detail.reference.name, "renamed");
    assert!(detail.tags.contains(&"favorite".to_string()));
    let stored = detail.reference.user_metadata.unwrap();
    assert_eq!(stored["rating"], json!(5));
    // The computed filename is maintained alongside user keys.
    assert!(stored["filename"].is_string());

    // The projection answers filters for the new keys.
    let mut query = ListAssetsQuery {
        limit: 10,
        ..Default::default()
    };
    query.metadata_filter = Some(
        json!({"rating": 5})
            .as_object()
            .cloned()
            .unwrap(),
    );
    let page = management::list_assets_page(&registry.db(), &query, "").await.unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn tag_lifecycle_reports_added_present_removed() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let temp = spool_upload(&env, b"tag bytes").await;

    let outcome = ingest::upload_from_temp_path(
        &registry.db(),
        &registry.config(),
        &temp,
        Some("tagged"),
        &tags_of(&["models", "loras"]),
        None,
        Some("tagged.bin"),
        "",
        None,
    )
    .await
    .unwrap();
    let id = outcome.detail.reference.id;

    let added = tagging::apply_tags(
        &registry.db(),
        id,
        &tags_of(&["favorite", "loras"]),
        "manual",
        "",
    )
    .await
    .unwrap();
    assert_eq!(added.added, vec!["favorite"]);
    assert_eq!(added.already_present, vec!["loras"]);
    assert!(added.total_tags.contains(&"favorite".to_string()));

    let removed = tagging::remove_tags(&registry.db(), id, &tags_of(&["favorite", "ghost"]), "")
        .await
        .unwrap();
    assert_eq!(removed.removed, vec!["favorite"]);
    assert_eq!(removed.not_present, vec!["ghost"]);

    let page = tagging::list_tags(&registry.db(), "", None, true, TagOrder::CountDesc, 100, 0)
        .await
        .unwrap();
    let names: Vec<&str> = page.tags.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"models"));
    assert!(names.contains(&"loras"));

    let filtered = tagging::list_tags(
        &registry.db(),
        "",
        Some("mod"),
        true,
        TagOrder::NameAsc,
        100,
        0,
    )
    .await
    .unwrap();
    assert_eq!(filtered.tags.len(), 1);
    assert_eq!(filtered.tags[0].name, "models");
}

#[tokio::test]
async fn preview_must_point_at_an_existing_asset() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let temp = spool_upload(&env, b"preview target").await;

    let outcome = ingest::upload_from_temp_path(
        &registry.db(),
        &registry.config(),
        &temp,
        Some("thing"),
        &tags_of(&["models", "loras"]),
        None,
        Some("thing.bin"),
        "",
        None,
    )
    .await
    .unwrap();
    let id = outcome.detail.reference.id;
    let asset_id = outcome.detail.asset.id;

    let detail = management::set_asset_preview(&registry.db(), id, Some(asset_id), "")
        .await
        .unwrap();
    assert_eq!(detail.reference.preview_id, Some(asset_id));

    assert!(matches!(
        management::set_asset_preview(&registry.db(), id, Some(uuid::Uuid::new_v4()), "").await,
        Err(RegistryError::NotFound(_))
    ));

    let cleared = management::set_asset_preview(&registry.db(), id, None, "")
        .await
        .unwrap();
    assert_eq!(cleared.reference.preview_id, None);
}
