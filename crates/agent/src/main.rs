//! hostwatch - host resource monitor with anomaly detection
//!
//! Samples host metrics on a fixed interval, learns a baseline of normal
//! behavior and flags deviations, while serving health and metrics endpoints.

use anyhow::{Context, Result};
use clap::Parser;
use hostwatch_lib::{
    AnomalyLog, HealthRegistry, MetricSampler, MonitorLoopBuilder, MonitorMetrics,
    SimulatedSampler, StructuredLogger, SystemSampler,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, fmt::writer::BoxMakeWriter, prelude::*, EnvFilter};

mod api;
mod config;

use crate::config::{AgentConfig, LogFormat};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "hostwatch", version, about = "Host resource monitor with anomaly detection")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "HOSTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Run a single monitoring cycle, print it as JSON and exit
    #[arg(long)]
    once: bool,

    /// Override the configured log format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Use synthetic host data instead of reading the OS
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AgentConfig::load(args.config.as_deref())?;

    // Keep stdout clean for the JSON bundle in single-cycle mode
    init_tracing(args.log_format.unwrap_or(config.log_format), args.once);

    let simulate = config.simulate || args.simulate;
    info!(version = AGENT_VERSION, node_name = %config.node_name, simulate, "Starting hostwatch");

    let sampler: Box<dyn MetricSampler> = if simulate {
        Box::new(SimulatedSampler::new())
    } else {
        Box::new(SystemSampler::new(
            config.disk_mount.clone(),
            config.monitor.process_limit,
        ))
    };

    let anomaly_log =
        AnomalyLog::open(&config.monitor.anomaly_log).context("failed to open anomaly log")?;

    let health_registry = HealthRegistry::new();
    let metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let (mut monitor, handle) = MonitorLoopBuilder::new()
        .config(config.monitor.clone())
        .sampler(sampler)
        .anomaly_log(anomaly_log)
        .health(health_registry.clone())
        .metrics(metrics)
        .logger(logger.clone())
        .build()?;

    if args.once {
        let bundle = monitor
            .run_cycle()
            .await
            .context("monitoring cycle failed")?;
        println!("{}", serde_json::to_string_pretty(&*bundle)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut monitor_task = tokio::spawn(monitor.run(shutdown_rx));

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry, handle));
    let mut api_task = tokio::spawn(api::serve(config.api_port, app_state));

    let result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
            // The loop may already be gone
            let _ = shutdown_tx.send(());
            monitor_task.await.context("monitor task panicked")?
        }
        outcome = &mut monitor_task => {
            outcome.context("monitor task panicked")?
        }
        outcome = &mut api_task => {
            outcome.context("API server panicked")??;
            anyhow::bail!("API server exited unexpectedly");
        }
    };

    api_task.abort();
    info!("Shutting down");
    result.context("monitoring stopped")
}

fn init_tracing(format: LogFormat, to_stderr: bool) {
    let writer = if to_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    let layer = match format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_writer(writer).boxed(),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(layer)
        .init();
}
