//! YAML seed manifest: the clusters and deployments a store starts with.
//!
//! ```yaml
//! clusters:
//!   - metadata: { name: east }
//!   - metadata: { name: west }
//! deployments:
//!   - metadata: { name: web, namespace: default }
//!     spec: { replicas: 5 }
//! ```
//!
//! Deployments without a namespace land in `default`. Version tokens in the
//! file are ignored; the store assigns its own.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ManifestError};
use crate::resource::Resource;
use crate::store::RemoteStore;
use crate::types::{Cluster, Deployment};

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub deployments: Vec<Deployment>,
}

impl Manifest {
    /// Read, parse and normalise a manifest file.
    ///
    /// Returns [`ManifestError::Parse`] (with path and line context) for
    /// malformed YAML and [`ManifestError::Invalid`] for empty names or
    /// duplicate keys.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let manifest: Manifest =
            serde_yaml::from_str(&contents).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        manifest.normalized()
    }

    fn normalized(mut self) -> Result<Self, ManifestError> {
        for cluster in &mut self.clusters {
            cluster.metadata.namespace = None;
            cluster.metadata.resource_version = None;
        }
        for deployment in &mut self.deployments {
            let meta = &mut deployment.metadata;
            if meta.namespace.as_deref().map_or(true, str::is_empty) {
                meta.namespace = Some(DEFAULT_NAMESPACE.to_owned());
            }
            meta.resource_version = None;
        }
        check_unique(&self.clusters)?;
        check_unique(&self.deployments)?;
        Ok(self)
    }

    /// Create every object in the manifest. Clusters go first so a
    /// controller that is already watching sees them before any deployment.
    pub async fn seed<C, D>(&self, clusters: &C, deployments: &D) -> Result<(), ManifestError>
    where
        C: RemoteStore<Cluster>,
        D: RemoteStore<Deployment>,
    {
        for cluster in &self.clusters {
            clusters.create(cluster).await?;
        }
        for deployment in &self.deployments {
            deployments.create(deployment).await?;
        }
        tracing::debug!(
            clusters = self.clusters.len(),
            deployments = self.deployments.len(),
            "seeded store from manifest"
        );
        Ok(())
    }
}

fn check_unique<O: Resource>(objects: &[O]) -> Result<(), ManifestError> {
    let mut seen = HashSet::new();
    for object in objects {
        let key = object.key();
        if key.name.is_empty() {
            return Err(ManifestError::Invalid {
                key: format!("{} #{}", O::KIND, seen.len()),
                reason: "metadata.name is empty".to_owned(),
            });
        }
        if !seen.insert(key.clone()) {
            return Err(ManifestError::Invalid {
                key: key.to_string(),
                reason: format!("duplicate {}", O::KIND),
            });
        }
    }
    Ok(())
}
