//! Error types for splitter-deployment.

use splitter_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SplitError {
    /// A create, update or status write was rejected by the store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
