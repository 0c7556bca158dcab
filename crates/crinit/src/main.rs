//! crinit
//!
//! Deploys and removes cluster registry API servers.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cluster_client::ClusterClientTrait;
use crinit::cli::{Cli, Command, DeleteArgs, InitArgs};
use crinit::kubeconfig;
use crinit::options::{DeploymentOptions, DeploymentPlan};
use crinit::orchestrator::{HttpsProbeFactory, Orchestrator};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("A rustls crypto provider is already installed");
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Init(args) => init(&args).await,
        Command::Delete(args) => delete(&args).await,
    }
}

/// Print validation warnings to stderr
fn warn_user(plan: &DeploymentPlan) {
    for warning in &plan.warnings {
        eprintln!("{warning}");
    }
}

/// Clients for the host and, when aggregated, the aggregator context.
/// The host client is reused when both name the same context.
async fn orchestrator(plan: &DeploymentPlan) -> anyhow::Result<Orchestrator> {
    let path = kubeconfig::resolve_path(plan.kubeconfig.as_deref())?;
    let host: Arc<dyn ClusterClientTrait> = Arc::new(
        kubeconfig::client_for_context(&path, &plan.host_context)
            .await
            .with_context(|| format!("connecting to host cluster context {}", plan.host_context))?,
    );

    let aggregator = match plan.aggregator_context() {
        None => None,
        Some(context) if context == plan.host_context => Some(host.clone()),
        Some(context) => {
            let client = kubeconfig::client_for_context(&path, context)
                .await
                .with_context(|| format!("connecting to aggregator context {context}"))?;
            Some(Arc::new(client) as Arc<dyn ClusterClientTrait>)
        }
    };

    Ok(Orchestrator::new(host, aggregator, Arc::new(HttpsProbeFactory)))
}

async fn init(args: &InitArgs) -> anyhow::Result<()> {
    let plan = DeploymentOptions::from(args).validate()?;
    warn_user(&plan);
    let orchestrator = orchestrator(&plan).await?;

    let mut stdout = io::stdout();
    match orchestrator.run(&plan, &mut stdout).await {
        Ok(report) => {
            info!(objects = report.provisioned.len(), "Cluster registry bootstrap complete");
            Ok(())
        }
        Err(failure) => {
            // the failed step's progress line is still open
            writeln!(stdout)?;
            if args.rollback_on_failure && !failure.provisioned.is_empty() {
                writeln!(stdout, "Rolling back...")?;
                if let Err(e) = orchestrator.teardown(&failure.provisioned, &mut stdout).await {
                    error!(error = %e, "Rollback incomplete");
                    eprintln!("rollback incomplete: {e:#}");
                }
            }
            Err(failure.error.into())
        }
    }
}

async fn delete(args: &DeleteArgs) -> anyhow::Result<()> {
    let plan = DeploymentOptions::from(args).validate()?;
    warn_user(&plan);
    let orchestrator = orchestrator(&plan).await?;

    let mut stdout = io::stdout();
    orchestrator.delete(&plan, args.delete_namespace, &mut stdout).await?;
    Ok(())
}
