//! Stand-in for cluster agents: reports every scheduled deployment as fully
//! rolled out.

use std::sync::Arc;
use std::time::Duration;

use splitter_core::{Deployment, DeploymentStatus, MemoryStore, RemoteStore};
use splitter_deployment::CLUSTER_LABEL;
use tokio::sync::broadcast;

const TICK: Duration = Duration::from_millis(50);

/// Status a healthy agent would report for `deployment`.
fn rolled_out(deployment: &Deployment) -> DeploymentStatus {
    let desired = deployment.spec.desired_replicas();
    DeploymentStatus {
        replicas: desired,
        updated_replicas: desired,
        ready_replicas: desired,
        available_replicas: desired,
        unavailable_replicas: 0,
        conditions: deployment.status.conditions.clone(),
    }
}

/// Mark every deployment with a cluster label ready, every tick, until
/// `shutdown` fires.
pub async fn run(store: Arc<MemoryStore<Deployment>>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(TICK);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                for mut deployment in store.snapshot() {
                    if deployment.metadata.label(CLUSTER_LABEL).is_none() {
                        continue;
                    }
                    let status = rolled_out(&deployment);
                    if deployment.status == status {
                        continue;
                    }
                    deployment.status = status;
                    match store.update_status(&deployment).await {
                        Ok(_) => tracing::debug!(
                            key = %deployment.metadata.key(),
                            "simulated rollout"
                        ),
                        // Raced with the controller; next tick retries.
                        Err(err) => tracing::debug!(
                            key = %deployment.metadata.key(),
                            error = %err,
                            "simulated rollout deferred"
                        ),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolled_out_matches_desired_and_keeps_conditions() {
        let mut d = Deployment::new("default", "web--east", 3);
        d.status.unavailable_replicas = 3;
        d.status.conditions.push(splitter_core::DeploymentCondition {
            type_: "Available".into(),
            status: splitter_core::ConditionStatus::True,
            reason: String::new(),
            message: String::new(),
            last_transition_time: None,
        });
        let status = rolled_out(&d);
        assert_eq!(status.ready_replicas, 3);
        assert_eq!(status.unavailable_replicas, 0);
        assert_eq!(status.conditions.len(), 1);
    }
}
