//! Cache state query behavior: upsert, soft delete, restore, race winners

mod common;

use asset_registry::infrastructure::database::entities::{asset, cache_state};
use asset_registry::infrastructure::database::queries::cache_state as queries;
use chrono::Utc;
use pretty_assertions::assert_eq;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

async fn make_asset(
    db: &asset_registry::infrastructure::database::Database,
    hash: Option<&str>,
    size: i64,
) -> asset::Model {
    asset::ActiveModel {
        id: Set(Uuid::new_v4()),
        hash: Set(hash.map(str::to_string)),
        size_bytes: Set(size),
        mime_type: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(db.conn())
    .await
    .expect("insert asset")
}

async fn make_state(
    db: &asset_registry::infrastructure::database::Database,
    asset: &asset::Model,
    file_path: &str,
    mtime_ns: Option<i64>,
) -> cache_state::Model {
    cache_state::ActiveModel {
        asset_id: Set(asset.id),
        file_path: Set(file_path.to_string()),
        mtime_ns: Set(mtime_ns),
        needs_verify: Set(false),
        is_missing: Set(false),
        ..Default::default()
    }
    .insert(db.conn())
    .await
    .expect("insert cache state")
}

async fn state_by_path(
    db: &asset_registry::infrastructure::database::Database,
    file_path: &str,
) -> cache_state::Model {
    cache_state::Entity::find()
        .filter(cache_state::Column::FilePath.eq(file_path))
        .one(db.conn())
        .await
        .expect("query state")
        .expect("state exists")
}

#[tokio::test]
async fn upsert_creates_new_state() {
    let db = common::memory_db().await;
    let asset = make_asset(&db, Some("blake3:aa"), 100).await;

    let (created, updated) = queries::upsert_cache_state(db.conn(), asset.id, "/p/a.bin", 12345)
        .await
        .unwrap();
    assert_eq!((created, updated), (true, false));
    assert_eq!(state_by_path(&db, "/p/a.bin").await.mtime_ns, Some(12345));
}

#[tokio::test]
async fn upsert_same_values_is_noop() {
    let db = common::memory_db().await;
    let asset = make_asset(&db, Some("blake3:aa"), 100).await;

    queries::upsert_cache_state(db.conn(), asset.id, "/p/a.bin", 100)
        .await
        .unwrap();
    let (created, updated) = queries::upsert_cache_state(db.conn(), asset.id, "/p/a.bin", 100)
        .await
        .unwrap();
    assert_eq!((created, updated), (false, false));
}

#[tokio::test]
async fn upsert_with_new_mtime_updates() {
    let db = common::memory_db().await;
    let asset = make_asset(&db, Some("blake3:aa"), 100).await;

    queries::upsert_cache_state(db.conn(), asset.id, "/p/a.bin", 100)
        .await
        .unwrap();
    let (created, updated) = queries::upsert_cache_state(db.conn(), asset.id, "/p/a.bin", 200)
        .await
        .unwrap();
    assert_eq!((created, updated), (false, true));
    assert_eq!(state_by_path(&db, "/p/a.bin").await.mtime_ns, Some(200));
}

#[tokio::test]
async fn upsert_restores_missing_state() {
    let db = common::memory_db().await;
    let asset = make_asset(&db, Some("blake3:aa"), 100).await;

    let state = make_state(&db, &asset, "/restored/file.bin", Some(100)).await;
    let mut active: cache_state::ActiveModel = state.into();
    active.is_missing = Set(true);
    active.update(db.conn()).await.unwrap();

    let (created, updated) =
        queries::upsert_cache_state(db.conn(), asset.id, "/restored/file.bin", 100)
            .await
            .unwrap();
    assert_eq!((created, updated), (false, true));
    assert!(!state_by_path(&db, "/restored/file.bin").await.is_missing);
}

#[tokio::test]
async fn restore_by_paths_clears_missing_only() {
    let db = common::memory_db().await;
    let asset = make_asset(&db, Some("blake3:aa"), 100).await;

    let missing = make_state(&db, &asset, "/missing/file.bin", None).await;
    let mut active: cache_state::ActiveModel = missing.into();
    active.is_missing = Set(true);
    active.update(db.conn()).await.unwrap();
    make_state(&db, &asset, "/active/file.bin", None).await;

    let restored = queries::restore_cache_states_by_paths(db.conn(), &["/missing/file.bin"])
        .await
        .unwrap();
    assert_eq!(restored, 1);
    assert!(!state_by_path(&db, "/missing/file.bin").await.is_missing);

    let none: [&str; 0] = [];
    assert_eq!(
        queries::restore_cache_states_by_paths(db.conn(), &none)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn mark_missing_outside_prefixes_flips_only_outsiders() {
    let db = common::memory_db().await;
    let asset = make_asset(&db, Some("blake3:aa"), 100).await;
    make_state(&db, &asset, "/valid/file.bin", None).await;
    make_state(&db, &asset, "/invalid/file.bin", None).await;

    let marked =
        queries::mark_cache_states_missing_outside_prefixes(db.conn(), &["/valid"])
            .await
            .unwrap();
    assert_eq!(marked, 1);
    assert!(!state_by_path(&db, "/valid/file.bin").await.is_missing);
    assert!(state_by_path(&db, "/invalid/file.bin").await.is_missing);
}

#[tokio::test]
async fn mark_missing_is_idempotent() {
    let db = common::memory_db().await;
    let asset = make_asset(&db, Some("blake3:aa"), 100).await;
    make_state(&db, &asset, "/valid/file.bin", None).await;
    make_state(&db, &asset, "/other/file.bin", None).await;

    let first = queries::mark_cache_states_missing_outside_prefixes(db.conn(), &["/valid"])
        .await
        .unwrap();
    let second = queries::mark_cache_states_missing_outside_prefixes(db.conn(), &["/valid"])
        .await
        .unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 0);
    assert!(state_by_path(&db, "/other/file.bin").await.is_missing);
}

#[tokio::test]
async fn mark_missing_with_no_prefixes_is_refused() {
    let db = common::memory_db().await;
    let asset = make_asset(&db, Some("blake3:aa"), 100).await;
    make_state(&db, &asset, "/some/file.bin", None).await;

    let empty: [&str; 0] = [];
    let marked = queries::mark_cache_states_missing_outside_prefixes(db.conn(), &empty)
        .await
        .unwrap();
    assert_eq!(marked, 0);
    assert!(!state_by_path(&db, "/some/file.bin").await.is_missing);
}

#[tokio::test]
async fn prefix_match_does_not_bleed_across_siblings() {
    let db = common::memory_db().await;
    let asset = make_asset(&db, Some("blake3:aa"), 100).await;
    make_state(&db, &asset, "/roots/models/a.bin", None).await;
    make_state(&db, &asset, "/roots/models-evil/b.bin", None).await;

    let marked =
        queries::mark_cache_states_missing_outside_prefixes(db.conn(), &["/roots/models"])
            .await
            .unwrap();
    assert_eq!(marked, 1);
    assert!(state_by_path(&db, "/roots/models-evil/b.bin").await.is_missing);
}

#[tokio::test]
async fn winning_paths_require_matching_asset_id() {
    let db = common::memory_db().await;
    let asset_a = make_asset(&db, Some("blake3:aa"), 100).await;
    let asset_b = make_asset(&db, Some("blake3:bb"), 100).await;
    make_state(&db, &asset_a, "/p/one.bin", None).await;
    make_state(&db, &asset_b, "/p/two.bin", None).await;

    let winners = queries::get_winning_paths(
        db.conn(),
        &[
            ("/p/one.bin".to_string(), asset_a.id),
            ("/p/two.bin".to_string(), asset_b.id),
        ],
    )
    .await
    .unwrap();
    assert_eq!(winners.len(), 2);

    // The path exists but belongs to another asset: not a win.
    let losers = queries::get_winning_paths(db.conn(), &[("/p/one.bin".to_string(), asset_b.id)])
        .await
        .unwrap();
    assert!(losers.is_empty());
}

#[tokio::test]
async fn bulk_insert_skips_conflicting_paths() {
    let db = common::memory_db().await;
    let asset = make_asset(&db, Some("blake3:aa"), 100).await;
    make_state(&db, &asset, "/existing.bin", Some(100)).await;

    let rows = vec![
        cache_state::ActiveModel {
            asset_id: Set(asset.id),
            file_path: Set("/existing.bin".to_string()),
            mtime_ns: Set(Some(999)),
            needs_verify: Set(false),
            is_missing: Set(false),
            ..Default::default()
        },
        cache_state::ActiveModel {
            asset_id: Set(asset.id),
            file_path: Set("/new.bin".to_string()),
            mtime_ns: Set(Some(200)),
            needs_verify: Set(false),
            is_missing: Set(false),
            ..Default::default()
        },
    ];
    queries::bulk_insert_cache_states_ignore_conflicts(db.conn(), rows)
        .await
        .unwrap();

    let all = cache_state::Entity::find().all(db.conn()).await.unwrap();
    assert_eq!(all.len(), 2);
    // The conflicting row kept its original mtime.
    assert_eq!(state_by_path(&db, "/existing.bin").await.mtime_ns, Some(100));
}

#[tokio::test]
async fn unreferenced_unhashed_assets_are_found() {
    let db = common::memory_db().await;

    let no_states = make_asset(&db, None, 10).await;
    let with_active = make_asset(&db, None, 10).await;
    make_state(&db, &with_active, "/has/state.bin", None).await;
    let with_missing = make_asset(&db, None, 10).await;
    let missing_state = make_state(&db, &with_missing, "/missing/state.bin", None).await;
    let mut active: cache_state::ActiveModel = missing_state.into();
    active.is_missing = Set(true);
    active.update(db.conn()).await.unwrap();
    let hashed = make_asset(&db, Some("blake3:cc"), 10).await;

    let orphans = queries::get_unreferenced_unhashed_asset_ids(db.conn())
        .await
        .unwrap();
    assert!(orphans.contains(&no_states.id));
    assert!(orphans.contains(&with_missing.id));
    assert!(!orphans.contains(&with_active.id));
    assert!(!orphans.contains(&hashed.id));
}
