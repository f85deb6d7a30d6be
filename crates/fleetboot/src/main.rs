//! fleetboot
//!
//! Waits for a fleet of instances to become ready, then bootstraps each one
//! over SSH concurrently and reports which hosts succeeded.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use eyre::{WrapErr, bail, eyre};
use fleetboot_core::{
    BootstrapFleet, FleetEvent, FleetOrchestrator, FleetReport, HostDescriptor, OrchestratorActor,
    OrchestratorActorArgs, discover_hosts,
};
use kameo::actor::Spawn;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

mod config;
mod factory;

#[derive(Parser)]
#[command(name = "fleetboot")]
#[command(about = "Concurrent bootstrap of cloud instance fleets", long_about = None)]
struct Cli {
    /// Config file (default: search FLEETBOOT_CONFIG, ./fleetboot.toml, ...)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap every discovered host
    Bootstrap {
        /// Write the full report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write succeeded instance and security-group ids as JSON
        #[arg(long)]
        targets: Option<PathBuf>,

        /// Exit successfully even if some hosts failed
        #[arg(long)]
        allow_partial: bool,

        /// Override `bootstrap.max_concurrency`
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Skip these instance ids
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// List hosts that would be bootstrapped
    Discover {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show control-plane status for discovered hosts
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let env_file = dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(Config::locate);
    let mut config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    init_tracing(&config.log.level, cli.log_format);
    if let Some(path) = env_file {
        info!(path = %path.display(), "loaded environment file");
    }
    match &config_path {
        Some(path) => info!(path = %path.display(), "loaded configuration"),
        None => warn!("no config file found, using defaults"),
    }

    match cli.command {
        Commands::Bootstrap {
            report,
            targets,
            allow_partial,
            max_concurrency,
            exclude,
        } => {
            if let Some(n) = max_concurrency {
                config.bootstrap.max_concurrency = n;
            }
            config.cloud.exclude_instance_ids.extend(exclude);

            let fleet = run_bootstrap(&config).await?;
            print_summary(&fleet);

            if let Some(path) = report {
                write_json(&path, &fleet)?;
                info!(path = %path.display(), "wrote report");
            }
            if let Some(path) = targets {
                write_json(&path, &fleet.target_registration())?;
                info!(path = %path.display(), "wrote target registration");
            }

            if !fleet.is_complete_success() && !allow_partial {
                bail!(
                    "{} of {} host(s) failed to bootstrap",
                    fleet.failed.len(),
                    fleet.total()
                );
            }
        }
        Commands::Discover { json } => {
            let hosts = discover(&config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hosts)?);
            } else {
                print_hosts(&hosts);
            }
        }
        Commands::Status => {
            let control_plane = factory::build_control_plane(&config);
            let hosts = discover_hosts(control_plane.as_ref(), &config.instance_filter())
                .await
                .wrap_err("failed to discover hosts")?;
            let ids: Vec<String> = hosts.iter().map(|h| h.id.clone()).collect();
            let statuses = control_plane
                .describe_instance_status(&ids)
                .await
                .wrap_err("failed to describe instance status")?;

            for id in &ids {
                match statuses.iter().find(|s| &s.instance_id == id) {
                    Some(status) => println!("{status}"),
                    None => println!("{id}: no status reported"),
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let fmt = match format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry().with(filter).with(fmt).init();
}

async fn discover(config: &Config) -> Result<Vec<HostDescriptor>> {
    let control_plane = factory::build_control_plane(config);
    discover_hosts(control_plane.as_ref(), &config.instance_filter())
        .await
        .wrap_err("failed to discover hosts")
}

async fn run_bootstrap(config: &Config) -> Result<FleetReport> {
    let control_plane = factory::build_control_plane(config);
    let hosts = discover_hosts(control_plane.as_ref(), &config.instance_filter())
        .await
        .wrap_err("failed to discover hosts")?;
    if hosts.is_empty() {
        warn!("no hosts matched the instance filter");
    }

    let mut orchestrator = FleetOrchestrator::new(
        config.bootstrap_config(),
        factory::build_connector(config)?,
        control_plane,
    )?;
    if let Some(probe) = factory::build_probe(config)? {
        orchestrator = orchestrator.with_probe(probe);
    }

    let events = tokio::spawn(log_events(orchestrator.subscribe()));

    let actor =
        OrchestratorActor::spawn(OrchestratorActorArgs::new(orchestrator).with_hosts(hosts));
    let report = actor
        .ask(BootstrapFleet {
            readiness: config.readiness_predicate(),
            commands: config.commands(),
        })
        .await
        .map_err(|e| eyre!("fleet bootstrap failed: {e}"))?;

    if let Err(e) = actor.stop_gracefully().await {
        warn!(error = %e, "orchestrator did not stop cleanly");
    }
    events.abort();

    Ok(report)
}

async fn log_events(mut events: broadcast::Receiver<FleetEvent>) {
    loop {
        match events.recv().await {
            Ok(FleetEvent::HostPhaseChanged { host, from, to }) => {
                info!(host = %host, %from, %to, "phase changed");
            }
            Ok(FleetEvent::CommandFinished {
                host,
                command,
                status,
                attempts,
            }) => {
                info!(host = %host, command = %command, ?status, attempts, "command finished");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_hosts(hosts: &[HostDescriptor]) {
    println!("{:<22} {:<18} {:<18}", "ID", "PUBLIC", "PRIVATE");
    for host in hosts {
        println!(
            "{:<22} {:<18} {:<18}",
            host.id,
            host.public_addr.as_deref().unwrap_or("-"),
            host.private_addr.as_deref().unwrap_or("-"),
        );
    }
}

fn print_summary(report: &FleetReport) {
    println!("{:<22} {:<10} DETAIL", "HOST", "STATUS");
    for outcome in &report.outcomes {
        let (status, detail) = match &outcome.failure {
            None => ("ok", format!("{} command(s)", outcome.commands.len())),
            Some(failure) => ("failed", format!("{}: {}", failure.kind, failure.message)),
        };
        println!("{:<22} {:<10} {}", outcome.host.id, status, detail);
    }
    println!(
        "\n{} succeeded, {} failed",
        report.succeeded.len(),
        report.failed.len()
    );
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).wrap_err_with(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
