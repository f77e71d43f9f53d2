//! Workstation TCP listener - line protocol for networked scanners
//!
//! One connection = one workstation = one station assignment session.
//! Input lines:
//! - a barcode while no scan is waiting
//! - `M1`..`M4` (any case) while a scan waits for its station; commits after the debounce delay
//! - `!M3` button path, commits immediately
//! - `CANCEL` dismisses the in-flight scan
//! - `OPERATOR <name>` sets the operator recorded on commits
//!
//! Replies are single lines: `OK <seller> AWAIT_STATION`, `OK SCHEDULED <station>`,
//! `COMMITTED <orderId> <station> <businessDate> [ROLLOVER <nextDate>]`, `ERR <code> <message>`.

use crate::domain::error::DispatchError;
use crate::domain::types::{CommitReceipt, StationId};
use crate::infra::metrics::Metrics;
use crate::services::station::{AutoCommitOutcome, DispatchBackend, ScanPhase, StationController, StationInput};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Workstation listener configuration
#[derive(Debug, Clone)]
pub struct WorkstationListenerConfig {
    pub port: u16,
    pub enabled: bool,
    pub auto_commit_delay: Duration,
}

pub fn format_receipt(receipt: &CommitReceipt) -> String {
    let registration = &receipt.registration;
    let mut line = format!(
        "COMMITTED {} {} {}",
        registration.order_id, registration.station_id, registration.business_date
    );
    if let Some(rollover) = receipt.business_day_rollover {
        line.push_str(&format!(" ROLLOVER {}", rollover.next_business_date));
    }
    line
}

pub fn format_error(err: &DispatchError) -> String {
    format!("ERR {} {}", err.code(), err)
}

pub fn format_outcome(outcome: &AutoCommitOutcome) -> String {
    match &outcome.result {
        Ok(receipt) => format_receipt(receipt),
        Err(e) => format_error(e),
    }
}

/// Apply one input line to a session and produce the reply
pub async fn handle_line(controller: &StationController, line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.eq_ignore_ascii_case("CANCEL") {
        controller.dismiss();
        return Some("OK CANCELLED".to_string());
    }

    if let Some(name) = line.strip_prefix("OPERATOR ") {
        let name = name.trim();
        controller.set_operator((!name.is_empty()).then(|| name.to_string()));
        return Some(format!("OK OPERATOR {name}"));
    }

    match controller.phase() {
        ScanPhase::AwaitingStation { .. } => {
            if let Some(button) = line.strip_prefix('!') {
                let station = match button.parse::<StationId>() {
                    Ok(station) => station,
                    Err(e) => return Some(format_error(&e)),
                };
                return Some(match controller.press_station(station).await {
                    Ok(Some(receipt)) => format_receipt(&receipt),
                    Ok(None) => "ERR busy commit already in flight".to_string(),
                    Err(e) => format_error(&e),
                });
            }

            Some(match controller.submit_station(line) {
                Ok(StationInput::AutoCommitScheduled(station)) => format!("OK SCHEDULED {station}"),
                Ok(_) => "ERR busy no scan awaiting station".to_string(),
                Err(e) => format_error(&e),
            })
        }
        ScanPhase::Committing { .. } => Some("ERR busy commit in flight".to_string()),
        ScanPhase::AwaitingScan => Some(match controller.scan(line).await {
            Ok(Some(pending)) => format!("OK {} AWAIT_STATION", pending.seller),
            Ok(None) => "ERR busy scan superseded".to_string(),
            Err(e) => format_error(&e),
        }),
    }
}

/// Start the workstation TCP listener
pub async fn start_workstation_listener(
    config: WorkstationListenerConfig,
    backend: Arc<dyn DispatchBackend>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if !config.enabled {
        info!("workstation_listener_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(port = %config.port, "workstation_listener_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("workstation_listener_shutdown");
                    return Ok(());
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let backend = backend.clone();
                        let metrics = metrics.clone();
                        let delay = config.auto_commit_delay;
                        tokio::spawn(async move {
                            handle_workstation_connection(socket, addr, backend, metrics, delay).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "workstation_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_workstation_connection(
    socket: TcpStream,
    addr: SocketAddr,
    backend: Arc<dyn DispatchBackend>,
    metrics: Arc<Metrics>,
    auto_commit_delay: Duration,
) {
    let peer = addr.to_string();
    info!(peer = %peer, "workstation_connected");

    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    let (controller, mut outcomes) = StationController::new(backend, auto_commit_delay, Some(metrics));

    loop {
        let reply = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&controller, &line).await,
                Ok(None) => break,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "workstation_read_failed");
                    break;
                }
            },
            Some(outcome) = outcomes.recv() => Some(format_outcome(&outcome)),
        };

        if let Some(reply) = reply {
            debug!(peer = %peer, reply = %reply, "workstation_reply");
            if let Err(e) = writer.write_all(format!("{reply}\n").as_bytes()).await {
                warn!(peer = %peer, error = %e, "workstation_write_failed");
                break;
            }
        }
    }

    // Dropping the controller cancels any pending auto-commit
    drop(controller);
    info!(peer = %peer, "workstation_disconnected");
}
