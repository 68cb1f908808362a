//! Scanner supervisor
//!
//! Owns the single background scan worker. The state machine is
//! `IDLE → RUNNING ↔ PAUSED → CANCELLING → IDLE`; the worker cooperates by
//! polling a set-once cancel flag and a pause gate at checkpoints (between
//! phases, between roots, between batches). Nothing inside a batch suspends:
//! a batch runs to commit or rollback before cancellation is observed.

use crate::config::{RegistryConfig, RootType};
use crate::error::{RegistryError, RegistryResult};
use crate::infrastructure::database::queries::{cache_state, reference, tags};
use crate::infrastructure::database::Database;
use crate::infrastructure::events::{Event, EventBus};
use crate::operations::bulk::{self, FileSpec};
use crate::scanner::{build_file_specs, collect_files_for_roots, enrich, reconcile};
use sea_orm::TransactionTrait;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use strum::{Display, EnumString};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Scanner state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanState {
    Idle,
    Running,
    Paused,
    Cancelling,
}

/// Which phases a scan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Fast,
    Enrich,
    Full,
}

/// Monotone progress counters for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub scanned: u64,
    pub total: u64,
    pub created: u64,
    pub skipped: u64,
}

/// Snapshot returned by [`ScannerSupervisor::status`].
#[derive(Debug, Clone)]
pub struct ScanStatus {
    pub state: ScanState,
    pub progress: Option<Progress>,
    pub errors: Vec<String>,
}

/// Options for one scan run.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub roots: Vec<RootType>,
    pub phase: ScanPhase,
    pub update_missing_tags: bool,
    pub enrich_target: i32,
    pub batch_size: usize,
    pub enrich_batch_size: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            roots: RootType::ALL.to_vec(),
            phase: ScanPhase::Fast,
            update_missing_tags: true,
            enrich_target: enrich::LEVEL_HASHED,
            batch_size: 500,
            enrich_batch_size: 100,
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

const MAX_ERRORS: usize = 64;
const PROGRESS_EVENT_INTERVAL: Duration = Duration::from_secs(1);

struct Inner {
    state: ScanState,
    progress: Option<Progress>,
    errors: Vec<String>,
    handle: Option<JoinHandle<()>>,
    progress_callback: Option<ProgressCallback>,
}

/// Process-wide singleton managing one background scan worker at a time.
///
/// The mutex guards state, progress and the worker handle only; it is never
/// held across a database or filesystem call.
pub struct ScannerSupervisor {
    db: Arc<Database>,
    config: Arc<RegistryConfig>,
    events: EventBus,
    inner: Mutex<Inner>,
    cancel: AtomicBool,
    pause_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ScanState>,
    state_tx: watch::Sender<ScanState>,
}

enum ScanEnd {
    Completed,
    Cancelled,
}

impl ScannerSupervisor {
    pub fn new(db: Arc<Database>, config: Arc<RegistryConfig>, events: EventBus) -> Self {
        let (pause_tx, _) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ScanState::Idle);
        Self {
            db,
            config,
            events,
            inner: Mutex::new(Inner {
                state: ScanState::Idle,
                progress: None,
                errors: Vec::new(),
                handle: None,
                progress_callback: None,
            }),
            cancel: AtomicBool::new(false),
            pause_tx,
            state_rx,
            state_tx,
        }
    }

    /// Start a background scan. Returns false when a scan is already
    /// running (any state other than IDLE).
    pub fn start(
        self: &Arc<Self>,
        options: ScanOptions,
        progress_callback: Option<ProgressCallback>,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ScanState::Idle {
            return false;
        }
        inner.state = ScanState::Running;
        inner.progress = Some(Progress::default());
        inner.errors.clear();
        inner.progress_callback = progress_callback;
        self.cancel.store(false, Ordering::SeqCst);
        let _ = self.pause_tx.send(false);
        let _ = self.state_tx.send(ScanState::Running);

        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            supervisor.run_scan(options).await;
        });
        inner.handle = Some(handle);
        true
    }

    /// Pause a running scan at its next checkpoint.
    pub fn pause(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ScanState::Running {
            return false;
        }
        inner.state = ScanState::Paused;
        let _ = self.pause_tx.send(true);
        let _ = self.state_tx.send(ScanState::Paused);
        self.events.emit(Event::SeedPaused);
        true
    }

    /// Resume a paused scan.
    pub fn resume(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ScanState::Paused {
            return false;
        }
        inner.state = ScanState::Running;
        let _ = self.pause_tx.send(false);
        let _ = self.state_tx.send(ScanState::Running);
        self.events.emit(Event::SeedResumed);
        true
    }

    /// Request cancellation. The pause gate is released so a paused worker
    /// observes the cancel immediately. Returns false when IDLE.
    pub fn cancel(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !matches!(inner.state, ScanState::Running | ScanState::Paused) {
            return false;
        }
        inner.state = ScanState::Cancelling;
        self.cancel.store(true, Ordering::SeqCst);
        let _ = self.pause_tx.send(false);
        let _ = self.state_tx.send(ScanState::Cancelling);
        true
    }

    /// Wait for the current scan to finish. Returns true when the scanner is
    /// idle before the timeout expires.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.state_rx.clone();
        let idle = async {
            loop {
                if *rx.borrow_and_update() == ScanState::Idle {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, idle).await.is_ok(),
            None => {
                idle.await;
                true
            }
        }
    }

    /// Cancel any running scan and join the worker.
    pub async fn shutdown(&self) {
        self.cancel();
        self.wait(Some(Duration::from_secs(5))).await;
        let handle = self.inner.lock().unwrap().handle.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn status(&self) -> ScanStatus {
        let inner = self.inner.lock().unwrap();
        ScanStatus {
            state: inner.state,
            progress: inner.progress,
            errors: inner.errors.clone(),
        }
    }

    /// Mark cache states missing when they fall outside all known root
    /// prefixes. Decoupled from scanning so a partial scan can never
    /// misclassify assets of unscanned roots; refuses unless IDLE.
    pub async fn mark_missing_outside_known_prefixes(&self) -> RegistryResult<Option<u64>> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.state != ScanState::Idle {
                warn!("Cannot mark missing cache states while a scan is running");
                return Ok(None);
            }
        }
        let prefixes = self.config.all_known_prefixes();
        let txn = self.db.conn().begin().await?;
        let marked = cache_state::mark_cache_states_missing_outside_prefixes(&txn, &prefixes).await?;
        txn.commit().await?;
        if marked > 0 {
            info!("Marked {marked} cache states as missing");
        }
        Ok(Some(marked))
    }

    // --- worker side -----------------------------------------------------

    /// Checkpoint: returns false when the scan should stop. Suspension while
    /// paused is unbounded; cancellation releases the gate.
    async fn checkpoint(&self) -> bool {
        let mut rx = self.pause_tx.subscribe();
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return false;
            }
            if !*rx.borrow_and_update() {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    fn update_progress(&self, apply: impl FnOnce(&mut Progress)) {
        let (snapshot, callback) = {
            let mut inner = self.inner.lock().unwrap();
            match inner.progress.as_mut() {
                Some(progress) => {
                    apply(progress);
                    (Some(*progress), inner.progress_callback.clone())
                }
                None => (None, None),
            }
        };
        if let (Some(progress), Some(callback)) = (snapshot, callback) {
            // Callback panics must never take down the scan.
            let _ = std::panic::catch_unwind(AssertUnwindSafe(|| callback(progress)));
        }
    }

    fn snapshot_progress(&self) -> Progress {
        self.inner
            .lock()
            .unwrap()
            .progress
            .unwrap_or_default()
    }

    fn add_error(&self, message: String) {
        error!("{message}");
        let mut inner = self.inner.lock().unwrap();
        if inner.errors.len() < MAX_ERRORS {
            inner.errors.push(message);
        }
    }

    async fn run_scan(self: Arc<Self>, options: ScanOptions) {
        let started = Instant::now();
        let outcome = self.scan_body(&options).await;
        let progress = self.snapshot_progress();
        match outcome {
            Ok(ScanEnd::Completed) => {
                info!(
                    "Asset scan (roots={:?}, phase={}) completed in {:.3}s \
                     (created={}, skipped={}, total={})",
                    options.roots,
                    options.phase,
                    started.elapsed().as_secs_f64(),
                    progress.created,
                    progress.skipped,
                    progress.total,
                );
                self.events.emit(Event::SeedCompleted {
                    scanned: progress.scanned,
                    total: progress.total,
                    created: progress.created,
                    skipped: progress.skipped,
                });
            }
            Ok(ScanEnd::Cancelled) => {
                info!(
                    "Asset scan cancelled after {} of {} files (created={})",
                    progress.scanned, progress.total, progress.created,
                );
                self.events.emit(Event::SeedCancelled {
                    scanned: progress.scanned,
                    total: progress.total,
                    created: progress.created,
                });
            }
            Err(e) => {
                self.add_error(format!("Scan failed: {e}"));
                self.events.emit(Event::SeedError {
                    message: e.to_string(),
                });
            }
        }
        let mut inner = self.inner.lock().unwrap();
        inner.state = ScanState::Idle;
        let _ = self.state_tx.send(ScanState::Idle);
    }

    async fn scan_body(&self, options: &ScanOptions) -> RegistryResult<ScanEnd> {
        if matches!(options.phase, ScanPhase::Fast | ScanPhase::Full) {
            match self.fast_phase(options).await? {
                ScanEnd::Cancelled => return Ok(ScanEnd::Cancelled),
                ScanEnd::Completed => {}
            }
            if options.phase == ScanPhase::Full {
                let progress = self.snapshot_progress();
                self.events.emit(Event::SeedFastComplete {
                    created: progress.created,
                    skipped: progress.skipped,
                });
            }
        }

        if matches!(options.phase, ScanPhase::Enrich | ScanPhase::Full) {
            match self.enrich_phase(options).await? {
                ScanEnd::Cancelled => return Ok(ScanEnd::Cancelled),
                ScanEnd::Completed => {}
            }
        }

        Ok(ScanEnd::Completed)
    }

    async fn fast_phase(&self, options: &ScanOptions) -> RegistryResult<ScanEnd> {
        // Reconcile each root first; its survivors are skipped by ingest.
        let mut survivors = std::collections::HashSet::<PathBuf>::new();
        for root in &options.roots {
            if !self.checkpoint().await {
                return Ok(ScanEnd::Cancelled);
            }
            match self.reconcile_root_safely(*root, options.update_missing_tags).await {
                Ok(paths) => survivors.extend(paths),
                Err(e) => self.add_error(format!("Reconcile failed for {root}: {e}")),
            }
        }

        if !self.checkpoint().await {
            return Ok(ScanEnd::Cancelled);
        }

        let files = collect_files_for_roots(&self.config, &options.roots).await;
        let total = files.len() as u64;
        self.update_progress(|p| p.total = total);
        self.events.emit(Event::SeedStarted {
            roots: options.roots.iter().map(|r| r.to_string()).collect(),
            total,
        });

        let (specs, skipped) = build_file_specs(files, &survivors).await;
        self.update_progress(|p| p.skipped = skipped);

        let mut last_event = Instant::now();
        let mut scanned = 0u64;
        for (index, batch) in specs.chunks(options.batch_size.max(1)).enumerate() {
            if !self.checkpoint().await {
                return Ok(ScanEnd::Cancelled);
            }
            match self.ingest_batch(batch).await {
                Ok(outcome) => {
                    self.update_progress(|p| p.created += outcome.inserted_references);
                }
                Err(e) => {
                    self.add_error(format!(
                        "Batch insert failed at offset {}: {e}",
                        index * options.batch_size,
                    ));
                }
            }
            scanned += batch.len() as u64;
            self.update_progress(|p| p.scanned = scanned);

            if last_event.elapsed() >= PROGRESS_EVENT_INTERVAL {
                let progress = self.snapshot_progress();
                self.events.emit(Event::SeedProgress {
                    scanned: progress.scanned,
                    total: progress.total,
                    created: progress.created,
                });
                last_event = Instant::now();
            }
        }

        Ok(ScanEnd::Completed)
    }

    async fn enrich_phase(&self, options: &ScanOptions) -> RegistryResult<ScanEnd> {
        if !self.checkpoint().await {
            return Ok(ScanEnd::Cancelled);
        }

        let pending =
            reference::count_references_below_enrichment(self.db.conn(), options.enrich_target)
                .await?;
        if options.phase == ScanPhase::Enrich {
            self.update_progress(|p| p.total = pending);
            self.events.emit(Event::SeedStarted {
                roots: options.roots.iter().map(|r| r.to_string()).collect(),
                total: pending,
            });
        }

        let mut enriched = 0u64;
        let mut cursor = None;
        loop {
            if !self.checkpoint().await {
                return Ok(ScanEnd::Cancelled);
            }
            let batch = reference::list_references_below_enrichment(
                self.db.conn(),
                options.enrich_target,
                cursor,
                options.enrich_batch_size,
            )
            .await?;
            if batch.is_empty() {
                break;
            }
            cursor = batch.last().map(|(reference, _)| reference.id);

            let txn = self.db.conn().begin().await?;
            for (reference, asset) in &batch {
                match enrich::enrich_reference(&txn, reference, asset, options.enrich_target).await
                {
                    Ok(Some(_)) => enriched += 1,
                    Ok(None) => {}
                    Err(e) => {
                        self.add_error(format!("Enrichment failed for {}: {e}", reference.id))
                    }
                }
            }
            txn.commit().await?;
            let advanced = batch.len() as u64;
            self.update_progress(|p| p.scanned += advanced);
        }

        self.events.emit(Event::SeedEnrichComplete { enriched });
        Ok(ScanEnd::Completed)
    }

    async fn reconcile_root_safely(
        &self,
        root: RootType,
        update_missing_tags: bool,
    ) -> RegistryResult<std::collections::HashSet<PathBuf>> {
        let txn = self.db.conn().begin().await?;
        let survivors = reconcile::reconcile_root(&txn, &self.config, root, update_missing_tags)
            .await
            .map_err(|e| {
                // The transaction is dropped (rolled back) on error.
                RegistryError::Internal(format!("reconcile {root}: {e}"))
            })?;
        txn.commit().await?;
        Ok(survivors)
    }

    async fn ingest_batch(&self, batch: &[FileSpec]) -> RegistryResult<bulk::BulkInsertOutcome> {
        let txn = self.db.conn().begin().await?;
        let tag_pool = bulk::collect_batch_tags(batch);
        tags::ensure_tags_exist(&txn, &tag_pool, tags::TAG_TYPE_USER).await?;
        let outcome = bulk::bulk_insert_file_specs(&txn, batch, "").await?;
        txn.commit().await?;
        Ok(outcome)
    }
}
