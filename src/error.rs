//! Registry-wide error types

use thiserror::Error;

/// Errors produced by registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Malformed canonical hash string
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    /// Request data failed validation (bad tags, bad query, bad body)
    #[error("validation failed: {0}")]
    Validation(String),

    /// Reference or asset does not exist (or is not visible to the caller)
    #[error("not found: {0}")]
    NotFound(String),

    /// No live file backs the asset
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Uploaded bytes do not match the hash the client promised
    #[error("uploaded file hash does not match provided hash")]
    HashMismatch,

    /// Operation conflicts with in-flight state (scan already running)
    #[error("conflict: {0}")]
    Conflict(String),

    /// A required runtime dependency is unavailable
    #[error("dependency missing: {0}")]
    DependencyMissing(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unreachable branch or broken internal invariant
    #[error("internal error: {0}")]
    Internal(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

impl RegistryError {
    /// True when the error hides the existence of a resource from the caller.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::FileNotFound(_))
    }
}
