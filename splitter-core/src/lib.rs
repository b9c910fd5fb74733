//! Splitter core library: object model, remote store interface, manifests.
//!
//! - [`types`]: keys, metadata, `Deployment`, `Cluster`, watch payloads
//! - [`resource`]: the [`Resource`] trait the engine is generic over
//! - [`store`]: [`RemoteStore`] and the in-memory [`MemoryStore`]
//! - [`manifest`]: YAML seed files
//! - [`error`]: [`StoreError`], [`ManifestError`]

pub mod error;
pub mod manifest;
pub mod resource;
pub mod store;
pub mod types;

pub use error::{ManifestError, StoreError};
pub use manifest::Manifest;
pub use resource::Resource;
pub use store::{MemoryStore, RemoteStore, WatchStream};
pub use types::{
    Cluster, ConditionStatus, Deployment, DeploymentCondition, DeploymentSpec, DeploymentStatus,
    ObjectKey, ObjectList, ObjectMeta, OwnerReference, WatchEvent,
};
