//! Scanner supervisor: end-to-end scans, state machine, cancellation

mod common;

use asset_registry::config::RootType;
use asset_registry::infrastructure::database::entities::{asset, asset_reference, cache_state};
use asset_registry::infrastructure::events::Event;
use asset_registry::scanner::enrich::LEVEL_HASHED;
use asset_registry::scanner::supervisor::{ScanOptions, ScanPhase, ScanState};
use common::TestEnv;
use pretty_assertions::assert_eq;
use sea_orm::{EntityTrait, PaginatorTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

fn fast_options(roots: Vec<RootType>) -> ScanOptions {
    ScanOptions {
        roots,
        phase: ScanPhase::Fast,
        ..ScanOptions::default()
    }
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
    events
}

#[tokio::test]
async fn fast_scan_registers_new_file() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let path = common::write_file(&env.loras_dir().join("x.safetensors"), &[7u8; 1000]);

    let mut events = registry.events().subscribe();
    let scanner = registry.scanner();
    assert!(scanner.start(fast_options(vec![RootType::Models]), None));
    assert!(scanner.wait(None).await);

    let db = registry.db();
    let assets = asset::Entity::find().all(db.conn()).await.unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].hash, None);
    assert_eq!(assets[0].size_bytes, 1000);

    let states = cache_state::Entity::find().all(db.conn()).await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].file_path, path.to_string_lossy());
    assert!(!states[0].is_missing);
    assert!(states[0].mtime_ns.is_some());

    let references = asset_reference::Entity::find().all(db.conn()).await.unwrap();
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].name, "x");
    assert_eq!(references[0].owner_id, "");

    let tags = asset_registry::infrastructure::database::queries::tags::get_reference_tags(
        db.conn(),
        references[0].id,
    )
    .await
    .unwrap();
    assert!(tags.contains(&"models".to_string()));
    assert!(tags.contains(&"loras".to_string()));

    let status = scanner.status();
    assert_eq!(status.state, ScanState::Idle);
    let progress = status.progress.unwrap();
    assert_eq!(progress.created, 1);
    assert_eq!(progress.skipped, 0);
    assert!(status.errors.is_empty());

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(e, Event::SeedStarted { .. })));
    assert!(events.iter().any(|e| matches!(e, Event::SeedCompleted { .. })));
}

#[tokio::test]
async fn rescan_skips_tracked_files() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    common::write_file(&env.loras_dir().join("x.safetensors"), &[7u8; 1000]);

    let scanner = registry.scanner();
    assert!(scanner.start(fast_options(vec![RootType::Models]), None));
    scanner.wait(None).await;

    assert!(scanner.start(fast_options(vec![RootType::Models]), None));
    scanner.wait(None).await;

    let status = scanner.status();
    let progress = status.progress.unwrap();
    assert_eq!(progress.created, 0);
    assert_eq!(progress.skipped, 1);

    let db = registry.db();
    assert_eq!(asset::Entity::find().count(db.conn()).await.unwrap(), 1);
}

#[tokio::test]
async fn renamed_file_moves_to_a_fresh_stub() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let old_path = common::write_file(&env.loras_dir().join("x.safetensors"), &[7u8; 1000]);

    let scanner = registry.scanner();
    assert!(scanner.start(fast_options(vec![RootType::Models]), None));
    scanner.wait(None).await;

    let new_path = env.loras_dir().join("y.safetensors");
    std::fs::rename(&old_path, &new_path).unwrap();

    assert!(scanner.start(fast_options(vec![RootType::Models]), None));
    scanner.wait(None).await;

    let db = registry.db();
    let assets = asset::Entity::find().all(db.conn()).await.unwrap();
    assert_eq!(assets.len(), 1);

    let states = cache_state::Entity::find().all(db.conn()).await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].file_path, new_path.to_string_lossy());

    let references = asset_reference::Entity::find().all(db.conn()).await.unwrap();
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].name, "y");
}

#[tokio::test]
async fn start_while_running_is_refused() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let scanner = registry.scanner();

    assert!(scanner.start(fast_options(vec![RootType::Models]), None));
    assert!(!scanner.start(fast_options(vec![RootType::Models]), None));
    scanner.wait(None).await;
    // Idle again: a new scan may start.
    assert!(scanner.start(fast_options(vec![RootType::Models]), None));
    scanner.wait(None).await;
}

#[tokio::test]
async fn cancel_when_idle_is_refused() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    assert!(!registry.scanner().cancel());
}

#[tokio::test]
async fn pause_resume_completes_the_scan() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    for i in 0..5 {
        common::write_file(&env.input_dir().join(format!("f{i}.png")), &[1u8; 16]);
    }

    let scanner = registry.scanner();
    let mut events = registry.events().subscribe();
    assert!(scanner.start(fast_options(vec![RootType::Input]), None));

    // The worker has not reached its first checkpoint yet; pause wins.
    assert!(scanner.pause());
    assert_eq!(scanner.status().state, ScanState::Paused);
    assert!(!scanner.pause());

    assert!(scanner.resume());
    assert_eq!(scanner.status().state, ScanState::Running);
    assert!(scanner.wait(None).await);

    assert_eq!(scanner.status().progress.unwrap().created, 5);
    let events = drain_events(&mut events);
    assert!(events.contains(&Event::SeedPaused));
    assert!(events.contains(&Event::SeedResumed));
    assert!(events.iter().any(|e| matches!(e, Event::SeedCompleted { .. })));
}

#[tokio::test]
async fn cancel_from_paused_is_honored_immediately() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    for i in 0..5 {
        common::write_file(&env.input_dir().join(format!("f{i}.png")), &[1u8; 16]);
    }

    let scanner = registry.scanner();
    let mut events = registry.events().subscribe();
    assert!(scanner.start(fast_options(vec![RootType::Input]), None));
    assert!(scanner.pause());
    assert!(scanner.cancel());
    assert_eq!(scanner.status().state, ScanState::Cancelling);

    assert!(scanner.wait(None).await);
    assert_eq!(scanner.status().state, ScanState::Idle);

    let events = drain_events(&mut events);
    let cancelled = events
        .iter()
        .filter(|e| matches!(e, Event::SeedCancelled { .. }))
        .count();
    assert_eq!(cancelled, 1);
    assert!(!events.iter().any(|e| matches!(e, Event::SeedCompleted { .. })));
}

#[tokio::test]
async fn cancel_mid_scan_stops_after_the_current_batch() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    for i in 0..6 {
        common::write_file(&env.input_dir().join(format!("f{i}.png")), &[1u8; 16]);
    }

    let scanner = registry.scanner();
    let mut events = registry.events().subscribe();
    let options = ScanOptions {
        batch_size: 1,
        ..fast_options(vec![RootType::Input])
    };

    let cancel_target = Arc::clone(&scanner);
    let seen = Arc::new(AtomicU64::new(0));
    let seen_cb = Arc::clone(&seen);
    let callback: asset_registry::scanner::supervisor::ProgressCallback =
        Arc::new(move |progress| {
            seen_cb.store(progress.scanned, Ordering::SeqCst);
            if progress.scanned >= 3 {
                cancel_target.cancel();
            }
        });

    assert!(scanner.start(options, Some(callback)));
    assert!(scanner.wait(None).await);

    let progress = scanner.status().progress.unwrap();
    assert_eq!(progress.scanned, 3);
    assert_eq!(progress.created, 3);
    assert_eq!(seen.load(Ordering::SeqCst), 3);

    let events = drain_events(&mut events);
    let cancelled = events
        .iter()
        .filter(|e| matches!(e, Event::SeedCancelled { .. }))
        .count();
    assert_eq!(cancelled, 1);
}

#[tokio::test]
async fn full_scan_enriches_stubs_to_hashed_assets() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let contents = b"unique model bytes for enrichment".repeat(10);
    common::write_file(&env.loras_dir().join("m.bin"), &contents);

    let scanner = registry.scanner();
    let options = ScanOptions {
        phase: ScanPhase::Full,
        ..fast_options(vec![RootType::Models])
    };
    assert!(scanner.start(options, None));
    assert!(scanner.wait(None).await);

    let db = registry.db();
    let assets = asset::Entity::find().all(db.conn()).await.unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(
        assets[0].hash.as_deref(),
        Some(common::canonical_hash(&contents).as_str())
    );

    let references = asset_reference::Entity::find().all(db.conn()).await.unwrap();
    assert_eq!(references[0].enrichment_level, LEVEL_HASHED);
}

#[tokio::test]
async fn duplicate_bytes_merge_into_one_asset_during_enrichment() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    let contents = b"identical bytes in two places".repeat(8);
    common::write_file(&env.loras_dir().join("first.bin"), &contents);
    common::write_file(&env.checkpoints_dir().join("second.bin"), &contents);

    let scanner = registry.scanner();
    let options = ScanOptions {
        phase: ScanPhase::Full,
        ..fast_options(vec![RootType::Models])
    };
    assert!(scanner.start(options, None));
    assert!(scanner.wait(None).await);

    let db = registry.db();
    let assets = asset::Entity::find().all(db.conn()).await.unwrap();
    assert_eq!(assets.len(), 1, "duplicate stubs folded into one identity");
    assert!(assets[0].hash.is_some());

    assert_eq!(cache_state::Entity::find().count(db.conn()).await.unwrap(), 2);
    let references = asset_reference::Entity::find().all(db.conn()).await.unwrap();
    assert_eq!(references.len(), 2);
    for reference in &references {
        assert_eq!(reference.asset_id, assets[0].id);
    }
}

#[tokio::test]
async fn prune_is_refused_while_scanning_and_works_when_idle() {
    let env = TestEnv::new();
    let registry = env.registry().await;
    common::write_file(&env.input_dir().join("keep.png"), &[1u8; 16]);

    let scanner = registry.scanner();
    assert!(scanner.start(fast_options(vec![RootType::Input]), None));
    assert!(scanner.pause());
    // Paused is not IDLE: the prune entry point refuses to run.
    assert!(scanner
        .mark_missing_outside_known_prefixes()
        .await
        .unwrap()
        .is_none());
    assert!(scanner.resume());
    scanner.wait(None).await;

    // Everything lives under known prefixes: nothing to mark.
    assert_eq!(
        scanner.mark_missing_outside_known_prefixes().await.unwrap(),
        Some(0)
    );
}
