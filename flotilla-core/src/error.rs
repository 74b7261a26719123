//! Error types for flotilla-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from registry and document-store operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure — carries the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (write/save path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON parse error on load — includes the document path.
    #[error("failed to parse cluster document at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Schema migration failed; the load is aborted with no partial state.
    #[error(transparent)]
    Migrate(#[from] MigrateError),

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.flotilla/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// A collaborator failed during an explicit `add` (propagated, unlike
    /// reconciliation which skips).
    #[error(transparent)]
    Factory(#[from] FactoryError),

    /// A live cluster rejected a model update during an explicit `add`.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Migration pipeline failures. Always fatal to the load operation.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("persisted document version {found} is newer than supported version {current}")]
    VersionTooNew { found: u32, current: u32 },

    #[error("persisted document carries invalid schema version {0}")]
    InvalidVersion(u32),

    #[error("migration to schema version {to} failed: {reason}")]
    Step { to: u32, reason: String },

    #[error("migrated document does not match the current schema: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Failure from the injected create-cluster / read-config collaborators.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("invalid config for cluster '{id}': {reason}")]
    InvalidConfig { id: String, reason: String },

    #[error("failed to construct cluster '{id}': {reason}")]
    Construct { id: String, reason: String },
}

/// Failure reported by a live cluster when applying an updated model.
#[derive(Debug, Error)]
#[error("cluster '{id}': {reason}")]
pub struct ClusterError {
    pub id: String,
    pub reason: String,
}

impl ClusterError {
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source,
    }
}
