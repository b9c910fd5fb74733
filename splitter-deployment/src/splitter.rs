//! The deployment splitter reconcile step.

use std::sync::Arc;

use async_trait::async_trait;
use splitter_controller::{Controller, ControllerConfig, Mirror, MirrorWriter, Reconcile};
use splitter_core::{Cluster, Deployment, ObjectKey, RemoteStore};

use crate::error::SplitError;
use crate::plan::{
    aggregate_status, clear_no_clusters_condition, missing_leaves, plan_leaves,
    set_no_clusters_condition, Role, CLUSTER_LABEL, OWNED_BY_LABEL,
};

/// Splits root deployments across registered clusters and rolls leaf status
/// back up into the root.
///
/// Reads deployments and clusters from mirrors; writes go to `store`.
pub struct DeploymentSplitter<S> {
    store: Arc<S>,
    deployments: Mirror<Deployment>,
    clusters: Mirror<Cluster>,
}

impl<S> DeploymentSplitter<S>
where
    S: RemoteStore<Deployment>,
{
    pub fn new(store: Arc<S>, deployments: Mirror<Deployment>, clusters: Mirror<Cluster>) -> Self {
        Self {
            store,
            deployments,
            clusters,
        }
    }

    async fn leaves_of(&self, namespace: Option<&str>, root: &str) -> Vec<Deployment> {
        self.deployments
            .list_matching(|d| {
                d.metadata.namespace.as_deref() == namespace
                    && d.metadata.label(OWNED_BY_LABEL) == Some(root)
                    && d.metadata.label(CLUSTER_LABEL).is_some()
            })
            .await
    }

    async fn reconcile_root(&self, root: &mut Deployment) -> Result<(), SplitError> {
        let key = root.metadata.key();
        let existing = self
            .leaves_of(root.metadata.namespace.as_deref(), &root.metadata.name)
            .await;
        let clusters: Vec<String> = self
            .clusters
            .list()
            .await
            .into_iter()
            .map(|c| c.metadata.name)
            .collect();

        match (clusters.as_slice(), existing.is_empty()) {
            ([], true) => {
                if set_no_clusters_condition(&mut root.status) {
                    tracing::info!(key = %key, "no clusters registered; marking root not progressing");
                }
            }
            ([only], true) => {
                let mut labelled = root.clone();
                labelled
                    .metadata
                    .labels
                    .insert(CLUSTER_LABEL.to_owned(), only.clone());
                let updated = self.store.update(&labelled).await?;
                root.metadata = updated.metadata;
                clear_no_clusters_condition(&mut root.status);
                tracing::info!(key = %key, cluster = %only, "single cluster; pinned root");
            }
            (many, _) if many.len() > 1 => {
                clear_no_clusters_condition(&mut root.status);
                let Some(missing) = missing_leaves(plan_leaves(root, many), &existing) else {
                    tracing::debug!(
                        key = %key,
                        leaves = existing.len(),
                        clusters = many.len(),
                        "root split for other clusters; not rebalancing"
                    );
                    return Ok(());
                };
                for leaf in missing {
                    self.create_leaf(&key, &leaf).await?;
                }
            }
            _ => {
                tracing::debug!(key = %key, leaves = existing.len(), "root already split");
            }
        }
        Ok(())
    }

    async fn create_leaf(&self, key: &ObjectKey, leaf: &Deployment) -> Result<(), SplitError> {
        let leaf_key = leaf.metadata.key();
        match self.store.create(leaf).await {
            Ok(_) => {
                tracing::info!(
                    key = %key,
                    leaf = %leaf_key,
                    replicas = leaf.spec.desired_replicas(),
                    "created leaf"
                );
                Ok(())
            }
            // Created by an earlier attempt the mirror has not caught up with.
            Err(err) if err.is_already_exists() => {
                tracing::debug!(key = %key, leaf = %leaf_key, "leaf already exists");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn reconcile_leaf(&self, leaf: &Deployment) -> Result<(), SplitError> {
        let Some(root_name) = leaf.metadata.label(OWNED_BY_LABEL) else {
            return Ok(());
        };
        let root_key = ObjectKey::new(leaf.metadata.namespace.as_deref(), root_name);
        let Some(mut root) = self.deployments.get(&root_key).await else {
            tracing::debug!(leaf = %leaf.metadata.key(), root = %root_key, "root gone; nothing to aggregate");
            return Ok(());
        };

        let leaves = self
            .leaves_of(leaf.metadata.namespace.as_deref(), root_name)
            .await;
        let status = aggregate_status(&root.status, &leaves);
        if status == root.status {
            return Ok(());
        }

        root.status = status;
        self.store.update_status(&root).await?;
        tracing::info!(
            root = %root_key,
            ready = root.status.ready_replicas,
            replicas = root.status.replicas,
            "aggregated leaf status into root"
        );
        Ok(())
    }
}

#[async_trait]
impl<S> Reconcile<Deployment> for DeploymentSplitter<S>
where
    S: RemoteStore<Deployment>,
{
    type Error = SplitError;

    async fn reconcile(&self, obj: &mut Deployment) -> Result<(), SplitError> {
        match Role::of(obj) {
            Role::Root => self.reconcile_root(obj).await,
            Role::Leaf => self.reconcile_leaf(obj).await,
            Role::Pinned => Ok(()),
        }
    }
}

/// Wire a controller that runs [`DeploymentSplitter`] over `deployments`,
/// with `clusters` mirrored as a secondary collection.
pub fn build_controller<D, C>(
    deployments: Arc<D>,
    clusters: Arc<C>,
    config: ControllerConfig,
) -> Controller<Deployment, D, DeploymentSplitter<D>>
where
    D: RemoteStore<Deployment>,
    C: RemoteStore<Cluster>,
{
    let (deployment_mirror, deployment_writer): (Mirror<Deployment>, MirrorWriter<Deployment>) =
        splitter_controller::mirror();
    let (cluster_mirror, cluster_writer) = splitter_controller::mirror::<Cluster>();
    let splitter = DeploymentSplitter::new(Arc::clone(&deployments), deployment_mirror, cluster_mirror);
    Controller::new(deployments, deployment_writer, Arc::new(splitter), config)
        .with_secondary(clusters, cluster_writer)
}
