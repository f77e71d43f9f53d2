//! Expedição - package dispatch intake and productivity tracking server
//!
//! Accepts barcode scans from warehouse workstations, guarantees one
//! registration per order, assigns scans to stations M1..M4 and keeps live
//! per-station and per-hour productivity with business day closure.
//!
//! Module structure:
//! - `domain/` - Core types (registrations, stations, sellers, classifier, errors)
//! - `io/` - External interfaces (REST API, workstation TCP, MQTT egress, log)
//! - `services/` - Business logic (registry, aggregator, day boundary, stations)
//! - `infra/` - Infrastructure (Config, Clock, Metrics, Broker)

use anyhow::Context;
use clap::Parser;
use expedicao::infra::{Config, Metrics};
use expedicao::io::{
    start_api_server, start_workstation_listener, ApiState, MqttPublisher, WorkstationListenerConfig,
};
use expedicao::services::{DispatchBackend, DispatchService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Expedição - dispatch floor intake server
#[derive(Parser, Debug)]
#[command(name = "expedicao", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("GIT_HASH"), "expedicao starting");

    let args = Args::parse();
    let config = match args.config {
        Some(ref path) => Config::load_from_path(path),
        None => Config::load(&[]),
    }
    .context("Failed to load configuration")?;

    // Start embedded MQTT broker with config
    expedicao::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        timezone = %config.timezone(),
        http_port = %config.http_port(),
        workstation_port = %config.workstation_port(),
        auto_commit_delay_ms = %config.auto_commit_delay_ms(),
        operating_hours = %format!("{:02}-{:02}", config.first_hour(), config.last_hour()),
        pace_window_minutes = %config.pace_window_minutes(),
        registrations_file = %config.registrations_file(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Replays the registration log before anything accepts traffic
    let service = Arc::new(
        DispatchService::from_config(&config, metrics.clone()).context("Failed to start dispatch service")?,
    );

    // MQTT egress of live events
    if config.mqtt_egress_enabled() {
        let publisher = MqttPublisher::new(&config, service.subscribe(), metrics.clone());
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });
    }

    // Workstation TCP listener
    let workstation_config = WorkstationListenerConfig {
        port: config.workstation_port(),
        enabled: config.workstation_enabled(),
        auto_commit_delay: Duration::from_millis(config.auto_commit_delay_ms()),
    };
    let backend: Arc<dyn DispatchBackend> = service.clone();
    let workstation_metrics = metrics.clone();
    let workstation_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            start_workstation_listener(workstation_config, backend, workstation_metrics, workstation_shutdown).await
        {
            error!(error = %e, "workstation_listener_error");
        }
    });

    // Pace windows decay with time even when nobody scans
    let pace_service = service.clone();
    let prune_interval = config.pace_prune_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(prune_interval.max(1)));
        loop {
            interval.tick().await;
            let pruned = pace_service.expire_pace_windows();
            if pruned > 0 {
                tracing::debug!(pruned = %pruned, "pace_windows_pruned");
            }
        }
    });

    // Periodic metrics log
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // REST API runs in the foreground until shutdown
    let state = Arc::new(ApiState::new(service, config.site_id()));
    start_api_server(config.http_port(), state, shutdown_rx).await?;

    info!("expedicao shutdown complete");
    Ok(())
}
