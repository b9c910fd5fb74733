use std::error::Error as StdError;
use std::path::PathBuf;

use splitter_core::StoreError;
use thiserror::Error;

/// Why one reconcile attempt for one key failed.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("reconcile failed: {0}")]
    Reconcile(#[source] Box<dyn StdError + Send + Sync>),

    #[error("reconcile panicked: {0}")]
    Panicked(String),

    #[error("status write-back failed: {0}")]
    UpdateStatus(#[source] StoreError),
}

impl ProcessError {
    /// `true` when the store rejected a write because the object changed
    /// underneath us.
    pub fn is_conflict(&self) -> bool {
        match self {
            ProcessError::UpdateStatus(err) => err.is_conflict(),
            ProcessError::Reconcile(err) => {
                let mut current: Option<&(dyn StdError + 'static)> = Some(err.as_ref());
                while let Some(e) = current {
                    if e.downcast_ref::<StoreError>().is_some_and(StoreError::is_conflict) {
                        return true;
                    }
                    current = e.source();
                }
                false
            }
            ProcessError::Panicked(_) => false,
        }
    }
}

/// Error surface for controller setup, configuration and task management.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse controller config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid controller config: {0}")]
    InvalidConfig(String),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ControllerError {
    ControllerError::Io {
        path: path.into(),
        source,
    }
}
