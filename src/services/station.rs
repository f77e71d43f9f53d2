//! Station assignment controller - one in-flight scan per workstation
//!
//! Per scan: Scanned → Classified → DuplicateChecked → AwaitingStation →
//! Committed, or Rejected from any step. Two input paths commit a scan:
//! typing a station code (auto-commit after a debounce delay) or pressing
//! a station button (immediate commit).
//!
//! The auto-commit is a single-slot timer. Every keystroke, button press,
//! dismissal, new scan or teardown replaces or cancels it, and a scan
//! generation counter makes a timer that outlived its scan a no-op. At
//! most one commit is in flight per scan (the `Committing` phase is the
//! busy flag); a second attempt while it is pending is ignored.

use crate::domain::classifier::ScanCandidate;
use crate::domain::error::{DispatchError, Result};
use crate::domain::types::{CommitReceipt, PackageRegistration, SellerType, StationId};
use crate::infra::metrics::Metrics;
use crate::services::dispatch::{DispatchService, RegisterRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a workstation needs from the dispatch server
#[async_trait]
pub trait DispatchBackend: Send + Sync {
    /// Read-only pre-check; safe to retry
    async fn check_duplicate(&self, order_id: &str) -> Result<Option<PackageRegistration>>;

    /// Commit; never retried by callers
    async fn commit(&self, request: RegisterRequest) -> Result<CommitReceipt>;
}

#[async_trait]
impl DispatchBackend for DispatchService {
    async fn check_duplicate(&self, order_id: &str) -> Result<Option<PackageRegistration>> {
        DispatchService::check_duplicate(self, order_id)
    }

    async fn commit(&self, request: RegisterRequest) -> Result<CommitReceipt> {
        self.register(request)
    }
}

/// A classified, duplicate-checked scan waiting for its station
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingScan {
    pub order_id: String,
    pub seller: SellerType,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPhase {
    AwaitingScan,
    AwaitingStation { scan: PendingScan },
    Committing { scan: PendingScan, station: StationId },
}

/// Result of a station keystroke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationInput {
    /// Input names a station; commit fires after the debounce delay
    AutoCommitScheduled(StationId),
    /// Prefix of a station code; nothing scheduled
    Incomplete,
    /// No scan is waiting for a station
    NoScan,
}

/// Outcome of an auto-commit, delivered asynchronously
#[derive(Debug)]
pub struct AutoCommitOutcome {
    pub order_id: String,
    pub station: StationId,
    pub result: Result<CommitReceipt>,
}

struct Slot {
    phase: ScanPhase,
    /// Bumped on every new scan and dismissal
    generation: u64,
    /// Identifies the currently scheduled timer
    timer_seq: u64,
    timer: Option<JoinHandle<()>>,
    operator: Option<String>,
}

impl Slot {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
            debug!("auto_commit_cancelled");
        }
    }

    /// Move the scan of `generation` to `Committing`
    ///
    /// `None` when that scan is gone or already committing.
    fn begin_commit(&mut self, generation: u64, station: StationId) -> Option<(PendingScan, Option<String>)> {
        if self.generation != generation {
            return None;
        }
        let scan = match &self.phase {
            ScanPhase::AwaitingStation { scan } => scan.clone(),
            ScanPhase::Committing { .. } => {
                debug!("commit_ignored_already_in_flight");
                return None;
            }
            ScanPhase::AwaitingScan => return None,
        };
        self.phase = ScanPhase::Committing { scan: scan.clone(), station };
        Some((scan, self.operator.clone()))
    }
}

struct Inner {
    backend: Arc<dyn DispatchBackend>,
    slot: Mutex<Slot>,
    auto_commit_delay: Duration,
    updates: mpsc::Sender<AutoCommitOutcome>,
    metrics: Option<Arc<Metrics>>,
}

impl Inner {
    fn record_invalid_station(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_invalid_station();
        }
    }
}

pub struct StationController {
    inner: Arc<Inner>,
}

impl StationController {
    /// Controller plus the stream of auto-commit outcomes
    ///
    /// `metrics` counts the rejections that never reach the backend.
    pub fn new(
        backend: Arc<dyn DispatchBackend>,
        auto_commit_delay: Duration,
        metrics: Option<Arc<Metrics>>,
    ) -> (Self, mpsc::Receiver<AutoCommitOutcome>) {
        let (updates, rx) = mpsc::channel(16);
        let inner = Inner {
            backend,
            slot: Mutex::new(Slot {
                phase: ScanPhase::AwaitingScan,
                generation: 0,
                timer_seq: 0,
                timer: None,
                operator: None,
            }),
            auto_commit_delay,
            updates,
            metrics,
        };
        (Self { inner: Arc::new(inner) }, rx)
    }

    pub fn phase(&self) -> ScanPhase {
        self.inner.slot.lock().phase.clone()
    }

    /// Operator recorded on every commit from this workstation
    pub fn set_operator(&self, operator: Option<String>) {
        self.inner.slot.lock().operator = operator;
    }

    /// Classify and pre-check a barcode
    ///
    /// Replaces any scan still waiting for a station. Returns `Ok(None)`
    /// when the scan was superseded while the pre-check was in flight, or
    /// when a commit is still in flight.
    pub async fn scan(&self, raw: &str) -> Result<Option<PendingScan>> {
        let generation = {
            let mut slot = self.inner.slot.lock();
            if matches!(slot.phase, ScanPhase::Committing { .. }) {
                debug!("scan_ignored_commit_in_flight");
                return Ok(None);
            }
            slot.cancel_timer();
            slot.phase = ScanPhase::AwaitingScan;
            slot.generation += 1;
            slot.generation
        };

        let classified = ScanCandidate::new(raw, Utc::now()).classify();
        let scanned_at = classified.scanned_at;
        let (order_id, seller) = classified.into_seller().inspect_err(|e| {
            warn!(error = %e, "scan_rejected_invalid_barcode");
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_invalid_barcode();
            }
        })?;

        // Duplicate pre-check; the server repeats it at commit time
        let existing = self.inner.backend.check_duplicate(&order_id).await?;

        let mut slot = self.inner.slot.lock();
        if slot.generation != generation {
            return Ok(None);
        }
        if let Some(existing) = existing {
            warn!(
                order_id = %order_id,
                existing_station = %existing.station_id,
                "scan_rejected_duplicate"
            );
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_duplicate();
            }
            return Err(DispatchError::duplicate(existing));
        }

        let pending = PendingScan { order_id, seller, scanned_at };
        slot.phase = ScanPhase::AwaitingStation { scan: pending.clone() };
        info!(order_id = %pending.order_id, seller = %pending.seller, "scan_awaiting_station");
        Ok(Some(pending))
    }

    /// Station text as typed so far
    ///
    /// Each keystroke cancels the pending auto-commit; a complete code
    /// schedules a fresh one. Anything that cannot become a station code is
    /// rejected without touching the waiting scan.
    pub fn type_station(&self, input: &str) -> Result<StationInput> {
        let mut slot = self.inner.slot.lock();
        if !matches!(slot.phase, ScanPhase::AwaitingStation { .. }) {
            return Ok(StationInput::NoScan);
        }
        slot.cancel_timer();

        let trimmed = input.trim();
        if let Ok(station) = trimmed.parse::<StationId>() {
            self.schedule_auto_commit(&mut slot, station);
            return Ok(StationInput::AutoCommitScheduled(station));
        }

        let is_prefix = StationId::ALL
            .iter()
            .any(|station| station.as_str().starts_with(&trimmed.to_ascii_uppercase()));
        if is_prefix {
            Ok(StationInput::Incomplete)
        } else {
            warn!(input = %trimmed, "station_input_rejected");
            self.inner.record_invalid_station();
            Err(DispatchError::InvalidStation { input: trimmed.to_string() })
        }
    }

    /// Complete station input (e.g. a scanned station label)
    ///
    /// Same as `type_station`, but a partial code is an invalid station.
    pub fn submit_station(&self, input: &str) -> Result<StationInput> {
        match self.type_station(input)? {
            StationInput::Incomplete => {
                warn!(input = %input.trim(), "station_input_rejected");
                self.inner.record_invalid_station();
                Err(DispatchError::InvalidStation { input: input.trim().to_string() })
            }
            other => Ok(other),
        }
    }

    /// Button path: cancel any pending auto-commit and commit now
    ///
    /// `Ok(None)` means nothing was committed: no scan is waiting, or a
    /// commit for this scan is already in flight.
    pub async fn press_station(&self, station: StationId) -> Result<Option<CommitReceipt>> {
        let claimed = {
            let mut slot = self.inner.slot.lock();
            slot.cancel_timer();
            let generation = slot.generation;
            slot.begin_commit(generation, station)
        };
        match claimed {
            Some((scan, operator)) => Inner::commit(&self.inner, scan, operator, station).await.map(Some),
            None => Ok(None),
        }
    }

    /// Abandon the in-flight scan
    pub fn dismiss(&self) {
        let mut slot = self.inner.slot.lock();
        slot.cancel_timer();
        slot.generation += 1;
        if matches!(slot.phase, ScanPhase::AwaitingStation { .. }) {
            info!("scan_dismissed");
            slot.phase = ScanPhase::AwaitingScan;
        }
    }

    fn schedule_auto_commit(&self, slot: &mut Slot, station: StationId) {
        slot.timer_seq += 1;
        let timer_seq = slot.timer_seq;
        let generation = slot.generation;
        let inner = self.inner.clone();
        let delay = self.inner.auto_commit_delay;

        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let claimed = {
                let mut slot = inner.slot.lock();
                if slot.timer_seq != timer_seq {
                    return;
                }
                // From here on the commit is no longer cancellable
                slot.timer = None;
                slot.begin_commit(generation, station)
            };
            let Some((scan, operator)) = claimed else {
                return;
            };

            let order_id = scan.order_id.clone();
            let result = Inner::commit(&inner, scan, operator, station).await;
            if inner.updates.try_send(AutoCommitOutcome { order_id, station, result }).is_err() {
                warn!(station = %station, "auto_commit_outcome_dropped");
            }
        }));
        debug!(station = %station, delay_ms = %delay.as_millis(), "auto_commit_scheduled");
    }
}

impl Inner {
    /// Single commit attempt for a scan already moved to `Committing`
    async fn commit(
        inner: &Arc<Inner>,
        scan: PendingScan,
        operator: Option<String>,
        station: StationId,
    ) -> Result<CommitReceipt> {
        let request = RegisterRequest {
            order_id: scan.order_id.clone(),
            station_id: station.as_str().to_string(),
            seller_type: Some(scan.seller),
            operator,
        };
        let result = inner.backend.commit(request).await;

        {
            // Every outcome ends the scan; a failed commit needs a fresh scan
            let mut slot = inner.slot.lock();
            if matches!(slot.phase, ScanPhase::Committing { .. }) {
                slot.phase = ScanPhase::AwaitingScan;
            }
        }

        match result {
            Ok(receipt) => {
                info!(order_id = %scan.order_id, station = %station, "scan_committed");
                Ok(receipt)
            }
            Err(e) => {
                warn!(order_id = %scan.order_id, station = %station, error = %e, "scan_commit_failed");
                Err(e)
            }
        }
    }
}

impl Drop for StationController {
    fn drop(&mut self) {
        self.inner.slot.lock().cancel_timer();
    }
}
