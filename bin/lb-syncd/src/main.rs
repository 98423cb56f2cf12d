//! ---
//! lbs_section: "01-core-functionality"
//! lbs_subsection: "binary"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Binary entrypoint for the lb-sync daemon."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lb_sync_common::config::AppConfig;
use lb_sync_common::logging::init_tracing;
use lb_sync_core::{Baseline, ReconcileEngine, Scheduler};
use lb_sync_inventory::AwsInventory;
use lb_sync_metrics::{new_registry, spawn_http_server, CycleMetrics};
use lb_sync_reload::ProcessReload;
use lb_sync_render::ConfigRenderer;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Auto Scaling group to load-balancer reconciliation daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override the monitored group name")]
    group: Option<String>,

    #[arg(long, value_name = "SECONDS", help = "Override the poll interval")]
    poll_interval: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the reconciliation loop")]
    Run,
    #[command(about = "Validate configuration and template, then exit")]
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/lb-sync.toml"));
    candidates.push(PathBuf::from("/etc/lb-sync/config.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(group) = cli.group {
        config.group = group;
    }
    if let Some(seconds) = cli.poll_interval {
        config.poll_interval = Duration::from_secs(seconds);
    }
    config.validate()?;

    init_tracing("lb-syncd", &config.logging)?;
    info!(config_path = %loaded.source.display(), group = %config.group, "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Validate => validate(&config),
        Commands::Run => run_daemon(config).await,
    }
}

/// Load-and-parse everything that would be startup-fatal, then exit.
fn validate(config: &AppConfig) -> Result<()> {
    let _ = load_renderer(config)?;
    info!(
        group = %config.group,
        template = %config.template.display(),
        output = %config.output.display(),
        "configuration and template are valid"
    );
    Ok(())
}

fn load_renderer(config: &AppConfig) -> Result<ConfigRenderer> {
    let source = std::fs::read_to_string(&config.template).with_context(|| {
        format!("unable to read template file {}", config.template.display())
    })?;
    ConfigRenderer::from_template_source(&source)
        .with_context(|| format!("failed to parse template {}", config.template.display()))
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    info!("lb-syncd starting up");

    // Everything that can fail here is startup-fatal; once the loop is
    // running, cycle errors only ever reach the logs.
    let renderer = load_renderer(&config)?;

    let mut metrics = None;
    let mut metrics_server = None;
    if config.metrics.enabled {
        let registry = new_registry();
        metrics = Some(CycleMetrics::new(registry.clone())?);
        match spawn_http_server(registry, config.metrics.listen) {
            Ok(server) => {
                info!(address = %server.addr(), "metrics exporter enabled");
                metrics_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start metrics exporter; continuing without it");
            }
        }
    }

    let inventory = Arc::new(AwsInventory::from_env(Some(config.region.clone())).await);
    let reload = Arc::new(ProcessReload::from_config(&config.reload));

    let poll_interval = config.poll_interval;
    let group = config.group.clone();
    let engine = ReconcileEngine::new(
        Arc::new(config),
        inventory,
        renderer,
        reload,
        metrics,
    );

    info!(group = %group, "running initial reconciliation");
    let initial = engine
        .run_cycle(&Baseline::empty())
        .await
        .context("initial reconciliation failed")?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let scheduler = Scheduler::new(engine, poll_interval);
    let loop_task = tokio::spawn(scheduler.run(shutdown_rx, initial.baseline));

    shutdown_signal().await;
    info!("termination signal received; shutting down");
    let _ = shutdown_tx.send(());
    let final_baseline = loop_task.await?;
    info!(members = final_baseline.len(), "reconciliation loop stopped");

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => {
            warn!(?err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}
