//! Error types for splitter-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ObjectKey;

/// Failures reported by a remote object store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The supplied version token is stale (optimistic concurrency).
    #[error("conflict on {kind} {key}: expected version {expected:?}, store has {actual}")]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        expected: Option<String>,
        actual: String,
    },

    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    /// The requested watch start version is older than retained history,
    /// or the consumer fell behind the live feed. Callers must relist.
    #[error("watch version {version} is too old; relist required")]
    Expired { version: String },

    #[error("invalid resource version '{0}'")]
    InvalidVersion(String),

    /// Network, throttling or other transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

/// Errors from loading a YAML manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error, with the file path and serde_yaml's line context.
    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("manifest object {key} is invalid: {reason}")]
    Invalid { key: String, reason: String },

    #[error("seeding store failed: {0}")]
    Seed(#[from] StoreError),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ManifestError {
    ManifestError::Io {
        path: path.into(),
        source,
    }
}
