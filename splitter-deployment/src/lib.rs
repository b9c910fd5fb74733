//! # splitter-deployment
//!
//! Reconcile step that splits a root `Deployment` into one leaf per
//! registered `Cluster` and aggregates leaf status back into the root.
//!
//! [`build_controller`] wires it into a
//! [`Controller`](splitter_controller::Controller) with the cluster
//! collection mirrored alongside the deployments.

pub mod error;
pub mod plan;
pub mod splitter;

pub use error::SplitError;
pub use plan::{Role, CLUSTER_LABEL, OWNED_BY_LABEL};
pub use splitter::{build_controller, DeploymentSplitter};
