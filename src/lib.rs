//! Content-addressed asset registry
//!
//! Files discovered on disk are registered under a canonical BLAKE3 identity,
//! annotated with tags and user metadata, and served back through lookup,
//! listing, download and upload APIs. Two invariants hold throughout: a path
//! on disk is claimed by exactly one asset record, and identical bytes under
//! different paths share a single asset identity.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod hash;
pub mod infrastructure;
pub mod operations;
pub mod scanner;

use crate::config::RegistryConfig;
use crate::error::RegistryResult;
use crate::infrastructure::database::Database;
use crate::infrastructure::events::EventBus;
use crate::scanner::supervisor::ScannerSupervisor;
use std::sync::Arc;
use tracing::info;

/// Process-wide registry: database pool, configuration, event bus and the
/// scanner supervisor singleton.
pub struct Registry {
    db: Arc<Database>,
    config: Arc<RegistryConfig>,
    events: EventBus,
    scanner: Arc<ScannerSupervisor>,
}

impl Registry {
    /// Open (or create) the database for `config`, run migrations, and wire
    /// up the supervisor.
    pub async fn new(config: RegistryConfig) -> RegistryResult<Arc<Self>> {
        let db = Arc::new(Database::create(&config.database_path()).await?);
        db.migrate().await?;
        Ok(Self::with_database(db, config))
    }

    /// Registry over an already migrated database (tests use the in-memory
    /// variant).
    pub fn with_database(db: Arc<Database>, config: RegistryConfig) -> Arc<Self> {
        let config = Arc::new(config);
        let events = EventBus::default();
        let scanner = Arc::new(ScannerSupervisor::new(
            Arc::clone(&db),
            Arc::clone(&config),
            events.clone(),
        ));
        info!("Registry initialized (data dir: {})", config.data_dir.display());
        Arc::new(Self {
            db,
            config,
            events,
            scanner,
        })
    }

    pub fn db(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    pub fn config(&self) -> Arc<RegistryConfig> {
        Arc::clone(&self.config)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn scanner(&self) -> Arc<ScannerSupervisor> {
        Arc::clone(&self.scanner)
    }

    /// Graceful shutdown: cancel any running scan and join the worker.
    pub async fn shutdown(&self) {
        self.scanner.shutdown().await;
    }
}
