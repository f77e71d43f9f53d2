//! Expedição scan station - terminal workstation client
//!
//! Reads scanner input from stdin (a USB barcode scanner in keyboard mode
//! types the code followed by Enter) and drives a local station session
//! against a remote server over REST.
//!
//! Usage:
//!   expedicao-station --server http://10.0.0.5:8080 --operator carla
//!
//! Input lines are the workstation line protocol (barcode, `M1`..`M4`,
//! `!M2`, `CANCEL`, `OPERATOR <name>`) plus two supervisor commands:
//! `STATUS` prints the business day state and `CLOSE` closes the day.

use clap::Parser;
use expedicao::io::workstation::{format_error, format_outcome, handle_line};
use expedicao::io::HttpDispatchClient;
use expedicao::services::{DispatchBackend, StationController};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "expedicao-station")]
#[command(about = "Dispatch workstation - scan a package, pick a station")]
struct Args {
    /// Server base URL
    #[arg(long, default_value = "http://localhost:8080")]
    server: String,
    /// Operator recorded on every commit from this station
    #[arg(long)]
    operator: Option<String>,
    /// Delay between a typed station and its auto-commit
    #[arg(long, default_value_t = 400)]
    auto_commit_delay_ms: u64,
    /// Per-request timeout
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let client = Arc::new(HttpDispatchClient::new(&args.server, Duration::from_secs(args.timeout_secs))?);
    let backend: Arc<dyn DispatchBackend> = client.clone();
    let (controller, mut outcomes) =
        StationController::new(backend, Duration::from_millis(args.auto_commit_delay_ms), None);
    controller.set_operator(args.operator.clone());

    info!(server = %client.base_url(), operator = ?args.operator, "station_started");
    println!("Expedição station @ {} - scan a package", client.base_url());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let reply = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => match line.trim().to_ascii_uppercase().as_str() {
                    "STATUS" => Some(match client.day_status().await {
                        Ok(status) => serde_json::to_string(&status)?,
                        Err(e) => format_error(&e),
                    }),
                    "CLOSE" => Some(match client.close_day(args.operator.as_deref()).await {
                        Ok(report) => format!(
                            "CLOSED {} ({} packages) NEXT {}",
                            report.closed_date, report.total_packages, report.next_business_date
                        ),
                        Err(e) => format_error(&e),
                    }),
                    _ => handle_line(&controller, &line).await,
                },
                None => break,
            },
            Some(outcome) = outcomes.recv() => Some(format_outcome(&outcome)),
        };

        if let Some(reply) = reply {
            println!("{reply}");
        }
    }

    Ok(())
}
