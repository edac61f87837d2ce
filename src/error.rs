//! Error types, one enum per layer.

use std::path::PathBuf;
use thiserror::Error;

/// Structural errors of the in-memory tag tree.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Depth mismatch: expected {expected} tag values, found {found} ({context})")]
    DepthMismatch {
        expected: usize,
        found: usize,
        context: String,
    },

    #[error("Duplicate key conflict: image {path} differs between the merged inputs")]
    DuplicateKeyConflict { path: String },

    #[error("Hierarchy mismatch: {left:?} vs {right:?}")]
    HierarchyMismatch {
        left: Vec<String>,
        right: Vec<String>,
    },
}

/// Errors of the persistent store and the merger.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store file not found: {0}")]
    NotFound(PathBuf),

    #[error("Timed out waiting for lock on {path} during {operation} after {attempts} attempts")]
    LockTimeout {
        path: PathBuf,
        operation: String,
        attempts: u32,
    },

    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("Migration of {path} failed, previous table left intact: {reason}")]
    MigrationFailure { path: PathBuf, reason: String },

    #[error("Duplicate key conflict: image {path} already stored with different content")]
    DuplicateKeyConflict { path: String },

    #[error("Store is missing required tags: {0:?}")]
    MissingTags(Vec<String>),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Corrupt store data: {0}")]
    Corrupt(String),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True for the lock-contention conditions the retry policy absorbs.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Top-level error for embedding applications (configuration, logging).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
