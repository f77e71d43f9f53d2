//! Productivity aggregation per business date
//!
//! The tallies are a cache over the registration log: every snapshot can be
//! rebuilt by replaying the registrations of a date, and `from_registrations`
//! does exactly that on startup. Pace (ritmo) is derived at read time from
//! the trailing window, so it decays as time passes even with no new scans.

use crate::domain::types::{DailyGoal, GoalTarget, PackageRegistration, SellerType, StationId};
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

const NUM_STATIONS: usize = StationId::ALL.len();

/// Fixed clock-hour buckets spanning the operating day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourBuckets {
    first_hour: u32,
    last_hour: u32,
}

impl HourBuckets {
    /// Buckets `[first_hour, last_hour)`, one per clock hour
    pub fn new(first_hour: u32, last_hour: u32) -> Self {
        let last_hour = last_hour.min(24);
        let first_hour = first_hour.min(last_hour);
        Self { first_hour, last_hour }
    }

    pub fn len(&self) -> usize {
        (self.last_hour - self.first_hour) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bucket for a wall-clock hour, None outside the operating day
    pub fn index(&self, hour: u32) -> Option<usize> {
        (self.first_hour..self.last_hour)
            .contains(&hour)
            .then(|| (hour - self.first_hour) as usize)
    }

    pub fn start_hour(&self, index: usize) -> u32 {
        self.first_hour + index as u32
    }

    /// "07:00 às 08:00"
    pub fn label(&self, index: usize) -> String {
        let start = self.start_hour(index);
        format!("{:02}:00 às {:02}:00", start, start + 1)
    }
}

/// Running tallies for one business date
#[derive(Debug, Clone)]
struct DayTally {
    total: u64,
    by_station: [u64; NUM_STATIONS],
    by_seller: BTreeMap<SellerType, u64>,
    unclassified: u64,
    /// bucket -> station -> count
    by_hour: Vec<[u64; NUM_STATIONS]>,
    /// Registration times per station inside the trailing pace window
    recent: [VecDeque<DateTime<Utc>>; NUM_STATIONS],
}

impl DayTally {
    fn new(buckets: usize) -> Self {
        Self {
            total: 0,
            by_station: [0; NUM_STATIONS],
            by_seller: BTreeMap::new(),
            unclassified: 0,
            by_hour: vec![[0; NUM_STATIONS]; buckets],
            recent: std::array::from_fn(|_| VecDeque::new()),
        }
    }
}

/// Per-seller goal progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerProgress {
    pub actual: u64,
    pub goal: u64,
    pub percent: f64,
}

/// Progress toward the day's goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GoalProgress {
    Aggregate { actual: u64, goal: u64, percent: f64 },
    PerSeller { sellers: BTreeMap<SellerType, SellerProgress> },
}

/// One hour-bucket row of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourBucketRow {
    pub label: String,
    pub start_hour: u32,
    pub by_station: BTreeMap<StationId, u64>,
    pub total: u64,
}

/// Derived productivity view of one business date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductivitySnapshot {
    pub business_date: NaiveDate,
    /// True when the date is the live business date
    pub live: bool,
    pub total_packages: u64,
    pub total_by_station: BTreeMap<StationId, u64>,
    pub total_by_seller: BTreeMap<SellerType, u64>,
    /// Registrations stored without a seller
    pub unclassified: u64,
    pub hourly: Vec<HourBucketRow>,
    /// Packages/hour over the trailing window; None for historical dates
    pub pace_by_station: Option<BTreeMap<StationId, f64>>,
    /// Station with the strictly greatest total; None on tie or empty day
    pub leading_station: Option<StationId>,
    /// None when no goal exists for the date
    pub goal_progress: Option<GoalProgress>,
}

pub struct ProductivityAggregator {
    days: RwLock<HashMap<NaiveDate, DayTally>>,
    buckets: HourBuckets,
    pace_window: Duration,
    timezone: Tz,
}

impl ProductivityAggregator {
    pub fn new(buckets: HourBuckets, pace_window_minutes: u32, timezone: Tz) -> Self {
        Self {
            days: RwLock::new(HashMap::new()),
            buckets,
            pace_window: Duration::minutes(i64::from(pace_window_minutes.max(1))),
            timezone,
        }
    }

    /// Rebuild the cache by replaying registrations
    pub fn from_registrations<'a, I>(
        buckets: HourBuckets,
        pace_window_minutes: u32,
        timezone: Tz,
        registrations: I,
    ) -> Self
    where
        I: IntoIterator<Item = &'a PackageRegistration>,
    {
        let aggregator = Self::new(buckets, pace_window_minutes, timezone);
        for registration in registrations {
            aggregator.on_registration(registration);
        }
        aggregator
    }

    /// Fold one committed registration into its business date's tallies
    pub fn on_registration(&self, registration: &PackageRegistration) {
        let station = registration.station_id.index();
        let hour = registration.registered_at.with_timezone(&self.timezone).hour();
        let bucket = self.buckets.index(hour);

        let mut days = self.days.write();
        let tally = days
            .entry(registration.business_date)
            .or_insert_with(|| DayTally::new(self.buckets.len()));

        tally.total += 1;
        tally.by_station[station] += 1;
        match registration.seller_type {
            Some(seller) => *tally.by_seller.entry(seller).or_insert(0) += 1,
            None => tally.unclassified += 1,
        }
        if let Some(bucket) = bucket {
            tally.by_hour[bucket][station] += 1;
        }
        tally.recent[station].push_back(registration.registered_at);
    }

    pub fn total_for(&self, date: NaiveDate) -> u64 {
        self.days.read().get(&date).map_or(0, |tally| tally.total)
    }

    /// Drop pace entries that fell out of the trailing window
    pub fn prune_pace_windows(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.pace_window;
        let mut pruned = 0;
        let mut days = self.days.write();
        for tally in days.values_mut() {
            for recent in tally.recent.iter_mut() {
                let before = recent.len();
                recent.retain(|at| *at > cutoff);
                pruned += before - recent.len();
            }
        }
        pruned
    }

    /// Productivity view of a business date
    ///
    /// `live` selects whether pace is meaningful (only for the live business date).
    pub fn snapshot(
        &self,
        date: NaiveDate,
        now: DateTime<Utc>,
        live: bool,
        goal: Option<&DailyGoal>,
    ) -> ProductivitySnapshot {
        let days = self.days.read();
        let empty;
        let tally = match days.get(&date) {
            Some(tally) => tally,
            None => {
                empty = DayTally::new(self.buckets.len());
                &empty
            }
        };

        let total_by_station: BTreeMap<StationId, u64> =
            StationId::ALL.iter().map(|&s| (s, tally.by_station[s.index()])).collect();

        let total_by_seller: BTreeMap<SellerType, u64> = SellerType::ALL
            .iter()
            .map(|&seller| (seller, tally.by_seller.get(&seller).copied().unwrap_or(0)))
            .collect();

        let hourly = tally
            .by_hour
            .iter()
            .enumerate()
            .map(|(i, counts)| HourBucketRow {
                label: self.buckets.label(i),
                start_hour: self.buckets.start_hour(i),
                by_station: StationId::ALL.iter().map(|&s| (s, counts[s.index()])).collect(),
                total: counts.iter().sum(),
            })
            .collect();

        let pace_by_station = live.then(|| {
            let cutoff = now - self.pace_window;
            let scale = 60.0 / self.pace_window.num_minutes() as f64;
            StationId::ALL
                .iter()
                .map(|&s| {
                    let in_window =
                        tally.recent[s.index()].iter().filter(|at| **at > cutoff && **at <= now).count();
                    (s, in_window as f64 * scale)
                })
                .collect()
        });

        ProductivitySnapshot {
            business_date: date,
            live,
            total_packages: tally.total,
            leading_station: leading_station(&total_by_station),
            goal_progress: goal.and_then(|goal| goal_progress(goal, tally.total, &total_by_seller)),
            total_by_station,
            total_by_seller,
            unclassified: tally.unclassified,
            hourly,
            pace_by_station,
        }
    }
}

/// Station with the strictly greatest total
///
/// A tie for first place (including an empty day) yields no leader.
pub fn leading_station(totals: &BTreeMap<StationId, u64>) -> Option<StationId> {
    let max = totals.values().copied().max()?;
    let mut leaders = totals.iter().filter(|(_, &count)| count == max);
    let (&leader, _) = leaders.next()?;
    if leaders.next().is_some() {
        return None;
    }
    Some(leader)
}

/// Percent-to-goal; None when the goal has no usable target
pub fn goal_progress(
    goal: &DailyGoal,
    total: u64,
    by_seller: &BTreeMap<SellerType, u64>,
) -> Option<GoalProgress> {
    match &goal.target {
        GoalTarget::Aggregate { total: target } if *target > 0 => Some(GoalProgress::Aggregate {
            actual: total,
            goal: *target,
            percent: total as f64 / *target as f64 * 100.0,
        }),
        GoalTarget::Aggregate { .. } => None,
        GoalTarget::PerSeller { targets } => {
            let sellers: BTreeMap<SellerType, SellerProgress> = targets
                .iter()
                .filter(|(_, &target)| target > 0)
                .map(|(&seller, &target)| {
                    let actual = by_seller.get(&seller).copied().unwrap_or(0);
                    let progress = SellerProgress {
                        actual,
                        goal: target,
                        percent: actual as f64 / target as f64 * 100.0,
                    };
                    (seller, progress)
                })
                .collect();
            (!sellers.is_empty()).then_some(GoalProgress::PerSeller { sellers })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::OrderId;
    use chrono::TimeZone;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    /// Local (São Paulo, UTC-3) wall clock on the test date
    fn local(hour: u32, minute: u32) -> DateTime<Utc> {
        chrono_tz::America::Sao_Paulo
            .with_ymd_and_hms(2026, 10, 19, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn reg(n: u32, station: StationId, seller: Option<SellerType>, at: DateTime<Utc>) -> PackageRegistration {
        PackageRegistration::new(
            OrderId::parse(&format!("{:011}", n)).unwrap(),
            station,
            seller,
            at,
            date(),
            None,
        )
    }

    fn aggregator() -> ProductivityAggregator {
        ProductivityAggregator::new(HourBuckets::new(7, 19), 60, chrono_tz::America::Sao_Paulo)
    }

    #[test]
    fn test_hour_bucket_labels() {
        let buckets = HourBuckets::new(7, 19);
        assert_eq!(buckets.len(), 12);
        assert_eq!(buckets.label(0), "07:00 às 08:00");
        assert_eq!(buckets.label(11), "18:00 às 19:00");
        assert_eq!(buckets.index(6), None);
        assert_eq!(buckets.index(7), Some(0));
        assert_eq!(buckets.index(18), Some(11));
        assert_eq!(buckets.index(19), None);
    }

    #[test]
    fn test_totals_and_buckets() {
        let agg = aggregator();
        agg.on_registration(&reg(1, StationId::M1, Some(SellerType::Shopee), local(7, 30)));
        agg.on_registration(&reg(2, StationId::M1, Some(SellerType::Amazon), local(8, 5)));
        agg.on_registration(&reg(3, StationId::M3, Some(SellerType::Amazon), local(8, 59)));
        // Before the operating day: counted in totals, no bucket
        agg.on_registration(&reg(4, StationId::M2, None, local(6, 15)));

        let snap = agg.snapshot(date(), local(9, 0), false, None);
        assert_eq!(snap.total_packages, 4);
        assert_eq!(snap.total_by_station[&StationId::M1], 2);
        assert_eq!(snap.total_by_station[&StationId::M2], 1);
        assert_eq!(snap.total_by_station[&StationId::M4], 0);
        assert_eq!(snap.total_by_seller[&SellerType::Amazon], 2);
        assert_eq!(snap.total_by_seller[&SellerType::MercadoLivre], 0);
        assert_eq!(snap.unclassified, 1);

        assert_eq!(snap.hourly[0].label, "07:00 às 08:00");
        assert_eq!(snap.hourly[0].by_station[&StationId::M1], 1);
        assert_eq!(snap.hourly[1].by_station[&StationId::M1], 1);
        assert_eq!(snap.hourly[1].by_station[&StationId::M3], 1);
        let bucketed: u64 = snap.hourly.iter().map(|row| row.total).sum();
        assert_eq!(bucketed, 3);

        let station_sum: u64 = snap.total_by_station.values().sum();
        assert_eq!(station_sum, snap.total_packages);
    }

    #[test]
    fn test_pace_trailing_window() {
        let agg = aggregator();
        agg.on_registration(&reg(1, StationId::M2, None, local(9, 0)));
        agg.on_registration(&reg(2, StationId::M2, None, local(9, 40)));
        agg.on_registration(&reg(3, StationId::M2, None, local(9, 50)));

        let snap = agg.snapshot(date(), local(10, 0), true, None);
        let pace = snap.pace_by_station.unwrap();
        assert_eq!(pace[&StationId::M2], 2.0);
        assert_eq!(pace[&StationId::M1], 0.0);

        // Decays with time alone
        let snap = agg.snapshot(date(), local(10, 45), true, None);
        assert_eq!(snap.pace_by_station.unwrap()[&StationId::M2], 1.0);
    }

    #[test]
    fn test_pace_extrapolates_short_window() {
        let agg = ProductivityAggregator::new(HourBuckets::new(7, 19), 15, chrono_tz::America::Sao_Paulo);
        agg.on_registration(&reg(1, StationId::M4, None, local(9, 50)));
        agg.on_registration(&reg(2, StationId::M4, None, local(9, 55)));
        let snap = agg.snapshot(date(), local(10, 0), true, None);
        assert_eq!(snap.pace_by_station.unwrap()[&StationId::M4], 8.0);
    }

    #[test]
    fn test_historical_snapshot_has_no_pace() {
        let agg = aggregator();
        agg.on_registration(&reg(1, StationId::M1, None, local(9, 0)));
        let snap = agg.snapshot(date(), local(9, 5), false, None);
        assert!(snap.pace_by_station.is_none());
        assert!(!snap.live);
    }

    #[test]
    fn test_prune_pace_windows() {
        let agg = aggregator();
        agg.on_registration(&reg(1, StationId::M1, None, local(8, 0)));
        agg.on_registration(&reg(2, StationId::M1, None, local(9, 30)));
        assert_eq!(agg.prune_pace_windows(local(10, 0)), 1);
        // Totals are untouched by pruning
        assert_eq!(agg.total_for(date()), 2);
    }

    #[test]
    fn test_leading_station_tie_is_no_leader() {
        let mut totals: BTreeMap<StationId, u64> =
            [(StationId::M1, 5), (StationId::M2, 5), (StationId::M3, 2), (StationId::M4, 0)].into();
        assert_eq!(leading_station(&totals), None);

        totals.insert(StationId::M2, 6);
        assert_eq!(leading_station(&totals), Some(StationId::M2));

        let empty: BTreeMap<StationId, u64> = StationId::ALL.iter().map(|&s| (s, 0)).collect();
        assert_eq!(leading_station(&empty), None);
    }

    #[test]
    fn test_goal_progress() {
        let by_seller: BTreeMap<SellerType, u64> =
            [(SellerType::Shopee, 30), (SellerType::Amazon, 5)].into();

        let aggregate = DailyGoal {
            date: date(),
            target: GoalTarget::Aggregate { total: 200 },
            collection_times: BTreeMap::new(),
        };
        assert_eq!(
            goal_progress(&aggregate, 50, &by_seller),
            Some(GoalProgress::Aggregate { actual: 50, goal: 200, percent: 25.0 })
        );

        let per_seller = DailyGoal {
            date: date(),
            target: GoalTarget::PerSeller {
                targets: [(SellerType::Shopee, 60), (SellerType::MercadoLivre, 10)].into(),
            },
            collection_times: BTreeMap::new(),
        };
        let Some(GoalProgress::PerSeller { sellers }) = goal_progress(&per_seller, 35, &by_seller)
        else {
            panic!("expected per-seller progress");
        };
        assert_eq!(sellers[&SellerType::Shopee].percent, 50.0);
        assert_eq!(sellers[&SellerType::MercadoLivre].percent, 0.0);
        assert!(!sellers.contains_key(&SellerType::Amazon));
    }

    #[test]
    fn test_snapshot_without_goal_has_null_progress() {
        let agg = aggregator();
        let snap = agg.snapshot(date(), local(9, 0), true, None);
        assert!(snap.goal_progress.is_none());
        assert_eq!(snap.leading_station, None);
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json["goalProgress"].is_null());
        assert!(json["leadingStation"].is_null());
    }

    #[test]
    fn test_replay_matches_incremental() {
        let regs: Vec<_> = (0..20)
            .map(|n| reg(n, StationId::ALL[(n % 4) as usize], Some(SellerType::Shopee), local(10, n)))
            .collect();

        let incremental = aggregator();
        for r in &regs {
            incremental.on_registration(r);
        }
        let replayed = ProductivityAggregator::from_registrations(
            HourBuckets::new(7, 19),
            60,
            chrono_tz::America::Sao_Paulo,
            &regs,
        );

        let now = local(10, 30);
        assert_eq!(
            incremental.snapshot(date(), now, true, None),
            replayed.snapshot(date(), now, true, None)
        );
    }
}
