//! `splitter plan`: show the split each root deployment would get.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use splitter_core::{Deployment, Manifest};
use splitter_deployment::{
    plan::{leaf_name, split_replicas},
    Role, CLUSTER_LABEL,
};

/// Arguments for `splitter plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// YAML manifest listing clusters and deployments.
    #[arg(long)]
    pub manifest: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize, Tabled)]
pub struct PlanRow {
    #[tabled(rename = "root")]
    pub root: String,
    #[tabled(rename = "deployment")]
    pub deployment: String,
    #[tabled(rename = "cluster")]
    pub cluster: String,
    #[tabled(rename = "replicas")]
    pub replicas: i32,
    #[tabled(rename = "action")]
    pub action: &'static str,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let manifest = Manifest::load(&self.manifest)
            .with_context(|| format!("failed to load manifest {}", self.manifest.display()))?;
        let mut clusters: Vec<String> = manifest
            .clusters
            .iter()
            .map(|c| c.metadata.name.clone())
            .collect();
        clusters.sort();

        let rows: Vec<PlanRow> = manifest
            .deployments
            .iter()
            .flat_map(|d| plan_rows(d, &clusters))
            .collect();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            return Ok(());
        }

        println!(
            "{} {} clusters | {} deployments",
            "plan:".bold(),
            clusters.len(),
            manifest.deployments.len()
        );
        if rows.is_empty() {
            println!("No deployments in manifest.");
            return Ok(());
        }
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

/// What the splitter would do for `deployment` given `clusters` (sorted).
pub fn plan_rows(deployment: &Deployment, clusters: &[String]) -> Vec<PlanRow> {
    let root = deployment.metadata.key().to_string();
    let name = &deployment.metadata.name;
    let replicas = deployment.spec.desired_replicas();

    match Role::of(deployment) {
        Role::Leaf | Role::Pinned => vec![PlanRow {
            root,
            deployment: name.clone(),
            cluster: deployment
                .metadata
                .label(CLUSTER_LABEL)
                .unwrap_or_default()
                .to_owned(),
            replicas,
            action: "keep",
        }],
        Role::Root => match clusters {
            [] => vec![PlanRow {
                root,
                deployment: name.clone(),
                cluster: "-".to_owned(),
                replicas,
                action: "no-clusters",
            }],
            [only] => vec![PlanRow {
                root,
                deployment: name.clone(),
                cluster: only.clone(),
                replicas,
                action: "pin",
            }],
            many => split_replicas(replicas, many.len())
                .into_iter()
                .zip(many)
                .map(|(share, cluster)| PlanRow {
                    root: root.clone(),
                    deployment: leaf_name(name, cluster),
                    cluster: cluster.clone(),
                    replicas: share,
                    action: "create-leaf",
                })
                .collect(),
        },
    }
}
