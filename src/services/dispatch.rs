//! Dispatch engine - the commit path and the read side
//!
//! Control flow of a registration:
//! order ID validation → station validation → business date resolution →
//! registry commit (uniqueness) → aggregator → live channel.
//!
//! `day_gate` serializes day closure against in-flight commits: a commit
//! holds it shared from date resolution until the aggregator is updated,
//! a closure holds it exclusively. The total reported by a closure is
//! therefore exactly the set of registrations tagged with the closed date.

use crate::domain::classifier::classify;
use crate::domain::error::{DispatchError, Result};
use crate::domain::types::{
    BusinessDayRollover, CommitReceipt, DailyGoal, LiveEvent, OrderId, PackageRegistration,
    SellerType, StationId,
};
use crate::infra::clock::{Clock, SystemClock};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::live_channel::{LiveChannel, LiveSubscription};
use crate::io::registration_log::RegistrationLog;
use crate::services::aggregator::{HourBuckets, ProductivityAggregator, ProductivitySnapshot};
use crate::services::calendar::{BusinessCalendar, WeekdayCalendar};
use crate::services::day_boundary::{DayBoundaryManager, DayStatus};
use crate::services::goals::GoalStore;
use crate::services::registry::ScanRegistry;
use anyhow::Context;
use chrono::NaiveDate;
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Body of `POST /register`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub order_id: String,
    pub station_id: String,
    #[serde(default)]
    pub seller_type: Option<SellerType>,
    /// Filled from the auth context, never from the body
    #[serde(skip)]
    pub operator: Option<String>,
}

/// Response of a successful `POST /close-day`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayClosedReport {
    pub closed_date: NaiveDate,
    pub next_business_date: NaiveDate,
    pub total_packages: u64,
}

pub struct DispatchService {
    registry: ScanRegistry,
    aggregator: ProductivityAggregator,
    day: DayBoundaryManager,
    goals: GoalStore,
    live: LiveChannel,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    day_gate: RwLock<()>,
}

impl DispatchService {
    /// Service backed by the configured files and the system clock
    pub fn from_config(config: &Config, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        Self::open(config, Arc::new(SystemClock), metrics)
    }

    /// Service backed by the configured files, replaying the registration log
    pub fn open(config: &Config, clock: Arc<dyn Clock>, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let timezone = config.timezone();
        let today = clock.now().with_timezone(&timezone).date_naive();
        let calendar: Arc<dyn BusinessCalendar> =
            Arc::new(WeekdayCalendar::new(config.holidays().iter().copied()));

        let registry = ScanRegistry::open(RegistrationLog::new(config.registrations_file()))
            .with_context(|| format!("Failed to replay registration log {}", config.registrations_file()))?;

        let aggregator = ProductivityAggregator::from_registrations(
            HourBuckets::new(config.first_hour(), config.last_hour()),
            config.pace_window_minutes(),
            timezone,
            &registry.all(),
        );

        let day = DayBoundaryManager::open(calendar, config.day_state_file(), today)
            .with_context(|| format!("Failed to load day state {}", config.day_state_file()))?;

        let goals = GoalStore::open(config.goals_file())
            .with_context(|| format!("Failed to load goals {}", config.goals_file()))?;

        Ok(Self {
            registry,
            aggregator,
            day,
            goals,
            live: LiveChannel::new(config.live_channel_capacity()),
            metrics,
            clock,
            timezone,
            day_gate: RwLock::new(()),
        })
    }

    /// Volatile service (nothing touches disk)
    pub fn in_memory(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let timezone = config.timezone();
        let today = clock.now().with_timezone(&timezone).date_naive();
        let calendar: Arc<dyn BusinessCalendar> =
            Arc::new(WeekdayCalendar::new(config.holidays().iter().copied()));

        Self {
            registry: ScanRegistry::in_memory(),
            aggregator: ProductivityAggregator::new(
                HourBuckets::new(config.first_hour(), config.last_hour()),
                config.pace_window_minutes(),
                timezone,
            ),
            day: DayBoundaryManager::new(calendar, today),
            goals: GoalStore::in_memory(),
            live: LiveChannel::new(config.live_channel_capacity()),
            metrics: Arc::new(Metrics::new()),
            clock,
            timezone,
            day_gate: RwLock::new(()),
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn live_channel(&self) -> &LiveChannel {
        &self.live
    }

    pub fn subscribe(&self) -> LiveSubscription {
        self.live.subscribe()
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.timezone).date_naive()
    }

    /// Existing registration for a raw order ID
    pub fn check_duplicate(&self, raw_order_id: &str) -> Result<Option<PackageRegistration>> {
        let order_id = OrderId::parse(raw_order_id)?;
        Ok(self.registry.check_duplicate(&order_id))
    }

    /// Commit a registration
    ///
    /// The uniqueness check is repeated here under the registry write lock;
    /// a client-side pre-check is only an optimization.
    pub fn register(&self, request: RegisterRequest) -> Result<CommitReceipt> {
        let started = Instant::now();

        let order_id = OrderId::parse(&request.order_id).inspect_err(|e| {
            warn!(order_id = %request.order_id, error = %e, "invalid_order_id_rejected");
        })?;

        let station = request.station_id.parse::<StationId>().inspect_err(|_| {
            self.metrics.record_invalid_station();
            warn!(order_id = %order_id, input = %request.station_id, "invalid_station_rejected");
        })?;

        // Collaborators may register IDs the classifier does not know; those are stored unclassified
        let seller_type = request.seller_type.or_else(|| classify(order_id.as_str()).seller());

        let _gate = self.day_gate.read();
        let now = self.clock.now();
        let resolved = self
            .day
            .resolve_business_date(now.with_timezone(&self.timezone).date_naive())
            .inspect_err(|e| {
                self.metrics.record_storage_error();
                error!(error = %e, "business_date_resolution_failed");
            })?;

        let registration = PackageRegistration::new(
            order_id,
            station,
            seller_type,
            now,
            resolved.business_date,
            request.operator,
        );

        let registration = self.registry.insert(registration).inspect_err(|e| match e {
            DispatchError::DuplicateScan { existing } => {
                self.metrics.record_duplicate();
                warn!(
                    order_id = %existing.order_id,
                    existing_station = %existing.station_id,
                    attempted_station = %station,
                    "duplicate_scan_rejected"
                );
            }
            other => {
                self.metrics.record_storage_error();
                error!(error = %other, "registration_write_failed");
            }
        })?;

        self.aggregator.on_registration(&registration);
        self.metrics.record_registration(started.elapsed().as_micros() as u64);

        info!(
            order_id = %registration.order_id,
            station = %registration.station_id,
            seller = %registration.seller_type.map_or("unclassified", |s| s.as_str()),
            business_date = %registration.business_date,
            rolled_over = %resolved.rolled_over,
            "registration_committed"
        );

        self.live.publish(LiveEvent::NewPackage {
            station: registration.station_id,
            seller: registration.seller_type,
            order_id: registration.order_id.clone(),
            business_date: registration.business_date,
            registered_at: registration.registered_at,
        });

        Ok(CommitReceipt {
            business_day_rollover: resolved
                .rolled_over
                .then_some(BusinessDayRollover { next_business_date: resolved.business_date }),
            registration,
        })
    }

    pub fn day_status(&self) -> Result<DayStatus> {
        Ok(self.day.status(self.today())?)
    }

    /// Close the current business day and announce it
    pub fn close_day(&self) -> Result<DayClosedReport> {
        let _gate = self.day_gate.write();

        let closure = self.day.close_day(self.today()).inspect_err(|e| {
            warn!(error = %e, code = %e.code(), "close_day_rejected");
        })?;
        let total_packages = self.aggregator.total_for(closure.closed_date);
        self.metrics.record_day_closed();

        info!(
            closed_date = %closure.closed_date,
            next_business_date = %closure.next_business_date,
            total_packages = %total_packages,
            "business_day_closed"
        );

        self.live.publish(LiveEvent::DayClosed {
            date: closure.closed_date,
            next_date: closure.next_business_date,
            total_packages,
        });

        Ok(DayClosedReport {
            closed_date: closure.closed_date,
            next_business_date: closure.next_business_date,
            total_packages,
        })
    }

    pub fn reopen_day(&self) -> Result<DayStatus> {
        let _gate = self.day_gate.write();
        self.day.reopen(self.today()).inspect_err(|e| {
            warn!(error = %e, code = %e.code(), "reopen_day_rejected");
        })
    }

    /// Date new registrations are currently attributed to
    pub fn live_business_date(&self) -> Result<NaiveDate> {
        Ok(self.day.resolve_business_date(self.today())?.business_date)
    }

    pub fn goal(&self, date: NaiveDate) -> Option<DailyGoal> {
        self.goals.get(date)
    }

    pub fn set_goal(&self, goal: DailyGoal) -> Result<DailyGoal> {
        self.goals.set(goal).inspect_err(|e| {
            warn!(error = %e, "goal_rejected");
        })
    }

    /// Productivity for a business date (the live one when `date` is None)
    ///
    /// Pace is only reported for the live business date.
    pub fn productivity(&self, date: Option<NaiveDate>) -> Result<ProductivitySnapshot> {
        let live_date = self.live_business_date()?;
        let date = date.unwrap_or(live_date);
        let goal = self.goals.get(date);
        Ok(self.aggregator.snapshot(date, self.clock.now(), date == live_date, goal.as_ref()))
    }

    /// Registrations of a business date in commit order
    pub fn registrations(&self, date: NaiveDate) -> Vec<PackageRegistration> {
        self.registry.for_date(date)
    }

    /// Drop pace entries older than the trailing window
    pub fn expire_pace_windows(&self) -> usize {
        self.aggregator.prune_pace_windows(self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::clock::MockClock;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    /// Local São Paulo wall clock
    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        chrono_tz::America::Sao_Paulo
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn service_at(at: DateTime<Utc>) -> (DispatchService, MockClock) {
        let clock = MockClock::new(at);
        (DispatchService::in_memory(&Config::default(), Arc::new(clock.clone())), clock)
    }

    fn request(order: &str, station: &str) -> RegisterRequest {
        RegisterRequest {
            order_id: order.to_string(),
            station_id: station.to_string(),
            seller_type: None,
            operator: None,
        }
    }

    #[test]
    fn test_register_classifies_and_tags_date() {
        let (service, _) = service_at(local(2026, 10, 19, 10, 15));
        let receipt = service.register(request("AMZB123456789ab", "m3")).unwrap();

        assert_eq!(receipt.registration.station_id, StationId::M3);
        assert_eq!(receipt.registration.seller_type, Some(SellerType::Amazon));
        assert_eq!(receipt.registration.business_date, date(2026, 10, 19));
        assert!(receipt.business_day_rollover.is_none());
    }

    #[test]
    fn test_unclassifiable_external_id_is_stored_without_seller() {
        let (service, _) = service_at(local(2026, 10, 19, 10, 15));
        let receipt = service.register(request("PEDIDO-778", "M1")).unwrap();
        assert_eq!(receipt.registration.seller_type, None);
        assert_eq!(service.productivity(None).unwrap().unclassified, 1);
    }

    #[test]
    fn test_explicit_seller_wins() {
        let (service, _) = service_at(local(2026, 10, 19, 10, 15));
        let mut req = request("12345678901", "M1");
        req.seller_type = Some(SellerType::Shopee);
        let receipt = service.register(req).unwrap();
        assert_eq!(receipt.registration.seller_type, Some(SellerType::Shopee));
    }

    #[test]
    fn test_duplicate_is_rejected_without_counting() {
        let (service, _) = service_at(local(2026, 10, 19, 10, 15));
        service.register(request("12345678901", "M1")).unwrap();

        let err = service.register(request("12345678901", "M2")).unwrap_err();
        assert_eq!(err.code(), "duplicateScan");
        assert_eq!(err.existing_registration().unwrap().station_id, StationId::M1);

        let snap = service.productivity(None).unwrap();
        assert_eq!(snap.total_packages, 1);
        assert_eq!(snap.total_by_station[&StationId::M2], 0);
        assert_eq!(service.metrics().duplicates_total(), 1);
    }

    #[test]
    fn test_invalid_station_and_order_id() {
        let (service, _) = service_at(local(2026, 10, 19, 10, 15));
        assert_eq!(service.register(request("12345678901", "M5")).unwrap_err().code(), "invalidStation");
        assert_eq!(service.register(request("   ", "M1")).unwrap_err().code(), "invalidOrderId");
        assert!(service.registrations(date(2026, 10, 19)).is_empty());
    }

    #[test]
    fn test_close_day_rolls_subsequent_registrations() {
        // Friday
        let (service, clock) = service_at(local(2026, 10, 16, 16, 0));
        service.register(request("12345678901", "M1")).unwrap();
        service.register(request("12345678902", "M2")).unwrap();

        let mut live = service.subscribe();
        let report = service.close_day().unwrap();
        assert_eq!(
            report,
            DayClosedReport {
                closed_date: date(2026, 10, 16),
                next_business_date: date(2026, 10, 19),
                total_packages: 2,
            }
        );
        assert!(matches!(
            live.try_recv(),
            Some(LiveEvent::DayClosed { total_packages: 2, .. })
        ));

        // Same evening, after closure
        clock.advance(Duration::minutes(30));
        let receipt = service.register(request("12345678903", "M1")).unwrap();
        assert_eq!(receipt.registration.business_date, date(2026, 10, 19));
        assert_eq!(
            receipt.business_day_rollover,
            Some(BusinessDayRollover { next_business_date: date(2026, 10, 19) })
        );

        // The closed date stays frozen
        let frozen = service.productivity(Some(date(2026, 10, 16))).unwrap();
        assert_eq!(frozen.total_packages, 2);
        assert!(frozen.pace_by_station.is_none());

        // Live date is now Monday and reports pace
        let monday = service.productivity(None).unwrap();
        assert_eq!(monday.business_date, date(2026, 10, 19));
        assert_eq!(monday.total_packages, 1);
        assert!(monday.pace_by_station.is_some());

        assert_eq!(service.close_day().unwrap_err().code(), "dayAlreadyClosed");
    }

    #[test]
    fn test_reopen_returns_to_calendar_date() {
        let (service, _) = service_at(local(2026, 10, 19, 17, 0));
        service.close_day().unwrap();
        assert!(service.day_status().unwrap().closed);

        service.reopen_day().unwrap();
        let receipt = service.register(request("12345678901", "M4")).unwrap();
        assert_eq!(receipt.registration.business_date, date(2026, 10, 19));
        assert_eq!(service.reopen_day().unwrap_err().code(), "dayNotClosed");
    }

    #[test]
    fn test_local_date_not_utc_date() {
        // 22:30 in São Paulo is already the next day in UTC
        let (service, _) = service_at(local(2026, 10, 19, 22, 30));
        let receipt = service.register(request("12345678901", "M1")).unwrap();
        assert_eq!(receipt.registration.business_date, date(2026, 10, 19));
    }

    #[test]
    fn test_goal_progress_in_productivity() {
        let (service, _) = service_at(local(2026, 10, 19, 9, 0));
        assert!(service.productivity(None).unwrap().goal_progress.is_none());

        service
            .set_goal(DailyGoal {
                date: date(2026, 10, 19),
                target: crate::domain::types::GoalTarget::Aggregate { total: 4 },
                collection_times: Default::default(),
            })
            .unwrap();
        service.register(request("12345678901", "M1")).unwrap();

        let snap = service.productivity(None).unwrap();
        assert!(matches!(
            snap.goal_progress,
            Some(crate::services::aggregator::GoalProgress::Aggregate { actual: 1, goal: 4, .. })
        ));
    }
}
