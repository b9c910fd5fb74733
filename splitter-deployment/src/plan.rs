//! Pure split and aggregation rules.
//!
//! A **root** deployment carries no cluster label. It is split into one
//! **leaf** per registered cluster, named `<root>--<cluster>`, labelled with
//! the target cluster and the root it came from. A deployment carrying only
//! a cluster label is **pinned** to that cluster and is left alone.

use chrono::Utc;
use splitter_core::{
    ConditionStatus, Deployment, DeploymentCondition, DeploymentStatus, ObjectMeta, OwnerReference,
};

pub const CLUSTER_LABEL: &str = "kcp.dev/cluster";
pub const OWNED_BY_LABEL: &str = "kcp.dev/owned-by";

pub const PROGRESSING: &str = "Progressing";
pub const NO_REGISTERED_CLUSTERS: &str = "NoRegisteredClusters";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Root,
    Leaf,
    Pinned,
}

impl Role {
    pub fn of(deployment: &Deployment) -> Self {
        let meta = &deployment.metadata;
        match (meta.label(CLUSTER_LABEL), meta.label(OWNED_BY_LABEL)) {
            (None, _) => Role::Root,
            (Some(_), Some(_)) => Role::Leaf,
            (Some(_), None) => Role::Pinned,
        }
    }
}

/// Spread `total` replicas over `clusters`; the first one takes the remainder.
/// Negative totals are treated as zero.
pub fn split_replicas(total: i32, clusters: usize) -> Vec<i32> {
    if clusters == 0 {
        return Vec::new();
    }
    let total = total.max(0);
    let n = i32::try_from(clusters).unwrap_or(i32::MAX);
    let share = total / n;
    let remainder = total % n;
    (0..clusters)
        .map(|i| if i == 0 { share + remainder } else { share })
        .collect()
}

pub fn leaf_name(root: &str, cluster: &str) -> String {
    format!("{root}--{cluster}")
}

/// The leaf of `root` that runs `replicas` pods on `cluster`.
pub fn leaf_for(root: &Deployment, cluster: &str, replicas: i32) -> Deployment {
    let mut labels = root.metadata.labels.clone();
    labels.insert(CLUSTER_LABEL.to_owned(), cluster.to_owned());
    labels.insert(OWNED_BY_LABEL.to_owned(), root.metadata.name.clone());

    let mut spec = root.spec.clone();
    spec.replicas = Some(replicas);

    Deployment {
        metadata: ObjectMeta {
            labels,
            owner_references: vec![OwnerReference {
                kind: "Deployment".to_owned(),
                name: root.metadata.name.clone(),
            }],
            ..ObjectMeta::named(root.metadata.namespace.as_deref(), leaf_name(&root.metadata.name, cluster))
        },
        spec,
        status: DeploymentStatus::default(),
    }
}

/// One leaf per cluster, in the order given.
pub fn plan_leaves(root: &Deployment, clusters: &[String]) -> Vec<Deployment> {
    split_replicas(root.spec.desired_replicas(), clusters.len())
        .into_iter()
        .zip(clusters)
        .map(|(replicas, cluster)| leaf_for(root, cluster, replicas))
        .collect()
}

/// Planned leaves not yet present in `existing`.
///
/// `None` when some existing leaf does not match the plan by name and
/// replica count: the root was split for a different set of clusters and is
/// not rebalanced. An interrupted split matches its plan, so the leaves it
/// did not get to are returned here.
pub fn missing_leaves(planned: Vec<Deployment>, existing: &[Deployment]) -> Option<Vec<Deployment>> {
    let in_plan = |leaf: &Deployment| {
        planned.iter().any(|p| {
            p.metadata.name == leaf.metadata.name
                && p.spec.desired_replicas() == leaf.spec.desired_replicas()
        })
    };
    if !existing.iter().all(in_plan) {
        return None;
    }
    Some(
        planned
            .into_iter()
            .filter(|p| !existing.iter().any(|e| e.metadata.name == p.metadata.name))
            .collect(),
    )
}

/// Sum the leaf counters into `base`, keeping `base`'s conditions.
pub fn aggregate_status(base: &DeploymentStatus, leaves: &[Deployment]) -> DeploymentStatus {
    let mut status = DeploymentStatus {
        conditions: base.conditions.clone(),
        ..DeploymentStatus::default()
    };
    for leaf in leaves {
        status.replicas += leaf.status.replicas;
        status.updated_replicas += leaf.status.updated_replicas;
        status.ready_replicas += leaf.status.ready_replicas;
        status.available_replicas += leaf.status.available_replicas;
        status.unavailable_replicas += leaf.status.unavailable_replicas;
    }
    status
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

pub fn has_no_clusters_condition(status: &DeploymentStatus) -> bool {
    status
        .conditions
        .iter()
        .any(|c| c.type_ == PROGRESSING && c.reason == NO_REGISTERED_CLUSTERS)
}

/// Add `Progressing=False/NoRegisteredClusters` unless already present.
/// Returns `true` if the status changed.
pub fn set_no_clusters_condition(status: &mut DeploymentStatus) -> bool {
    if has_no_clusters_condition(status) {
        return false;
    }
    status.conditions.push(DeploymentCondition {
        type_: PROGRESSING.to_owned(),
        status: ConditionStatus::False,
        reason: NO_REGISTERED_CLUSTERS.to_owned(),
        message: "no clusters are registered to schedule onto".to_owned(),
        last_transition_time: Some(Utc::now()),
    });
    true
}

/// Returns `true` if a condition was removed.
pub fn clear_no_clusters_condition(status: &mut DeploymentStatus) -> bool {
    let before = status.conditions.len();
    status
        .conditions
        .retain(|c| !(c.type_ == PROGRESSING && c.reason == NO_REGISTERED_CLUSTERS));
    status.conditions.len() != before
}
