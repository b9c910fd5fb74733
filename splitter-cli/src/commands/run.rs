//! `splitter run`: seed in-memory stores from a manifest and run the
//! controller until interrupted (or for `--duration-ms`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use tokio::sync::broadcast;

use splitter_controller::{ControllerConfig, ControllerHandle};
use splitter_core::{Cluster, Deployment, Manifest, MemoryStore};
use splitter_deployment::{build_controller, Role, CLUSTER_LABEL};

use crate::simulate;

/// Arguments for `splitter run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML manifest listing clusters and deployments to seed.
    #[arg(long)]
    pub manifest: PathBuf,

    /// Controller config file (YAML). Defaults apply when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker count; overrides the config file.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Stop after this many milliseconds instead of waiting for ctrl-c.
    #[arg(long)]
    pub duration_ms: Option<u64>,

    /// Pretend every scheduled deployment rolls out immediately.
    #[arg(long)]
    pub simulate_ready: bool,

    /// Print the final deployments as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ControllerConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.validate().context("invalid controller settings")?;

        let manifest = Manifest::load(&self.manifest)
            .with_context(|| format!("failed to load manifest {}", self.manifest.display()))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start tokio runtime")?;
        let deployments = runtime.block_on(drive(
            manifest,
            config,
            self.duration_ms.map(Duration::from_millis),
            self.simulate_ready,
        ))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&deployments)?);
        } else {
            print_table(&deployments);
        }
        Ok(())
    }
}

async fn drive(
    manifest: Manifest,
    config: ControllerConfig,
    duration: Option<Duration>,
    simulate_ready: bool,
) -> Result<Vec<Deployment>> {
    let deployments = Arc::new(MemoryStore::<Deployment>::new());
    let clusters = Arc::new(MemoryStore::<Cluster>::new());
    manifest
        .seed(clusters.as_ref(), deployments.as_ref())
        .await
        .context("failed to seed stores from manifest")?;
    tracing::info!(
        clusters = manifest.clusters.len(),
        deployments = manifest.deployments.len(),
        "stores seeded"
    );

    let workers = config.workers;
    let controller = build_controller(Arc::clone(&deployments), clusters, config);
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let simulator = simulate_ready.then(|| {
        tokio::spawn(simulate::run(
            Arc::clone(&deployments),
            shutdown_tx.subscribe(),
        ))
    });
    let stopper = tokio::spawn(stop_after(
        duration,
        controller.handle(),
        shutdown_tx.clone(),
    ));

    let result = controller.run(workers).await;
    let _ = shutdown_tx.send(());
    stopper.abort();
    if let Some(simulator) = simulator {
        simulator.await.context("simulator task failed")?;
    }
    result.context("controller failed")?;

    Ok(deployments.snapshot())
}

async fn stop_after(
    duration: Option<Duration>,
    handle: ControllerHandle,
    shutdown_tx: broadcast::Sender<()>,
) {
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        () = deadline => tracing::info!("run duration elapsed; stopping"),
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => tracing::info!("received ctrl-c; stopping"),
            Err(err) => tracing::warn!(error = %err, "ctrl-c handler failed; stopping"),
        },
    }
    handle.stop();
    let _ = shutdown_tx.send(());
}

#[derive(Debug, Serialize, Tabled)]
struct DeploymentRow {
    #[tabled(rename = "deployment")]
    deployment: String,
    #[tabled(rename = "role")]
    role: &'static str,
    #[tabled(rename = "cluster")]
    cluster: String,
    #[tabled(rename = "replicas")]
    replicas: i32,
    #[tabled(rename = "ready")]
    ready: i32,
}

fn row(deployment: &Deployment) -> DeploymentRow {
    DeploymentRow {
        deployment: deployment.metadata.key().to_string(),
        role: match Role::of(deployment) {
            Role::Root => "root",
            Role::Leaf => "leaf",
            Role::Pinned => "pinned",
        },
        cluster: deployment
            .metadata
            .label(CLUSTER_LABEL)
            .unwrap_or("-")
            .to_owned(),
        replicas: deployment.spec.desired_replicas(),
        ready: deployment.status.ready_replicas,
    }
}

fn print_table(deployments: &[Deployment]) {
    println!("{} {} deployments", "final state:".bold(), deployments.len());
    if deployments.is_empty() {
        return;
    }
    let mut table = Table::new(deployments.iter().map(row));
    table.with(Style::rounded());
    println!("{table}");
}
