//! Database infrastructure using SeaORM

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database as SeaDatabase, DatabaseConnection, DbErr, Statement,
};
use sea_orm_migration::MigratorTrait;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod entities;
pub mod migration;
pub mod queries;

/// Database wrapper owning the process-wide connection pool.
pub struct Database {
    conn: DatabaseConnection,
}

impl Database {
    /// Create (or open) the database file at `path` and apply PRAGMAs.
    pub async fn create(path: &Path) -> Result<Self, DbErr> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DbErr::Custom(format!("Failed to create directory: {e}")))?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", path.display());
        let conn = Self::connect(db_url, 10).await?;
        Self::apply_pragmas(&conn, true).await;

        info!("Opened database at {}", path.display());
        Ok(Self { conn })
    }

    /// In-memory database for tests. A single pooled connection: every
    /// in-memory SQLite connection is its own database.
    pub async fn memory() -> Result<Self, DbErr> {
        let conn = Self::connect("sqlite::memory:".to_string(), 1).await?;
        Self::apply_pragmas(&conn, false).await;
        Ok(Self { conn })
    }

    async fn connect(db_url: String, max_connections: u32) -> Result<DatabaseConnection, DbErr> {
        let mut opt = ConnectOptions::new(db_url);
        opt.max_connections(max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(8))
            .idle_timeout(Duration::from_secs(8))
            .sqlx_logging(false);
        SeaDatabase::connect(opt).await
    }

    async fn apply_pragmas(conn: &DatabaseConnection, file_backed: bool) {
        let mut pragmas = vec!["PRAGMA foreign_keys=ON", "PRAGMA temp_store=MEMORY"];
        if file_backed {
            pragmas.push("PRAGMA journal_mode=WAL");
            pragmas.push("PRAGMA synchronous=NORMAL");
        }
        for pragma in pragmas {
            let _ = conn
                .execute(Statement::from_string(
                    sea_orm::DatabaseBackend::Sqlite,
                    pragma,
                ))
                .await;
        }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<(), DbErr> {
        migration::Migrator::up(&self.conn, None).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the database connection.
    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }
}
