//! Shared fixtures for integration tests

#![allow(dead_code)]

use asset_registry::config::RegistryConfig;
use asset_registry::infrastructure::database::Database;
use asset_registry::Registry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Migrated in-memory database.
pub async fn memory_db() -> Arc<Database> {
    let db = Database::memory().await.expect("open in-memory db");
    db.migrate().await.expect("run migrations");
    Arc::new(db)
}

/// Temp-dir backed environment: root directories on disk plus a config that
/// points at them.
pub struct TestEnv {
    pub tmp: TempDir,
    pub config: RegistryConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let root = tmp.path();

        let loras = root.join("models").join("loras");
        let checkpoints = root.join("models").join("checkpoints");
        let input = root.join("input");
        let output = root.join("output");
        for dir in [&loras, &checkpoints, &input, &output] {
            std::fs::create_dir_all(dir).expect("create root dir");
        }

        let mut config = RegistryConfig::with_data_dir(root.join("data"));
        config.models.insert("loras".into(), vec![loras]);
        config.models.insert("checkpoints".into(), vec![checkpoints]);
        config.input = vec![input];
        config.output = vec![output];

        Self { tmp, config }
    }

    pub fn loras_dir(&self) -> PathBuf {
        self.config.models["loras"][0].clone()
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.config.models["checkpoints"][0].clone()
    }

    pub fn input_dir(&self) -> PathBuf {
        self.config.input[0].clone()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.config.output[0].clone()
    }

    /// Registry over an in-memory database with this env's config.
    pub async fn registry(&self) -> Arc<Registry> {
        Registry::with_database(memory_db().await, self.config.clone())
    }

    /// Registry over a file-backed database inside the temp dir.
    pub async fn registry_on_disk(&self) -> Arc<Registry> {
        let db = Database::create(&self.config.database_path())
            .await
            .expect("create db");
        db.migrate().await.expect("run migrations");
        Registry::with_database(Arc::new(db), self.config.clone())
    }
}

/// Write a file and return its absolute path.
pub fn write_file(path: &Path, contents: &[u8]) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(path, contents).expect("write file");
    path.to_path_buf()
}

/// Canonical hash of a byte slice, matching what the registry stores.
pub fn canonical_hash(bytes: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(bytes).to_hex())
}
