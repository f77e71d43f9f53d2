//! Shared types for the dispatch engine

use crate::domain::error::DispatchError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// Newtype wrapper for order IDs (the scanned barcode value)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub const MAX_LEN: usize = 64;

    /// Validate and normalize a raw order ID (surrounding whitespace is trimmed)
    pub fn parse(raw: &str) -> Result<Self, DispatchError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DispatchError::InvalidOrderId { reason: "order id is empty".to_string() });
        }
        if trimmed.len() > Self::MAX_LEN {
            return Err(DispatchError::InvalidOrderId {
                reason: format!("order id longer than {} characters", Self::MAX_LEN),
            });
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DispatchError::InvalidOrderId {
                reason: "order id contains whitespace or control characters".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One of the four physical dispatch stations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StationId {
    M1,
    M2,
    M3,
    M4,
}

impl StationId {
    pub const ALL: [StationId; 4] = [StationId::M1, StationId::M2, StationId::M3, StationId::M4];

    pub fn as_str(&self) -> &'static str {
        match self {
            StationId::M1 => "M1",
            StationId::M2 => "M2",
            StationId::M3 => "M3",
            StationId::M4 => "M4",
        }
    }

    /// Dense index for fixed-size per-station arrays
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for StationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StationId {
    type Err = DispatchError;

    /// Case-insensitive, must match one of the four codes exactly
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M1" => Ok(StationId::M1),
            "M2" => Ok(StationId::M2),
            "M3" => Ok(StationId::M3),
            "M4" => Ok(StationId::M4),
            _ => Err(DispatchError::InvalidStation { input: s.trim().to_string() }),
        }
    }
}

/// Marketplace a package originates from, identified by its barcode format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerType {
    MercadoLivre,
    Shopee,
    Amazon,
}

impl SellerType {
    pub const ALL: [SellerType; 3] = [SellerType::MercadoLivre, SellerType::Shopee, SellerType::Amazon];

    pub fn as_str(&self) -> &'static str {
        match self {
            SellerType::MercadoLivre => "mercado_livre",
            SellerType::Shopee => "shopee",
            SellerType::Amazon => "amazon",
        }
    }

    /// Human-facing marketplace name
    pub fn label(&self) -> &'static str {
        match self {
            SellerType::MercadoLivre => "Mercado Livre",
            SellerType::Shopee => "Shopee",
            SellerType::Amazon => "Amazon",
        }
    }
}

impl std::fmt::Display for SellerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SellerType {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mercado_livre" | "mercadolivre" | "mercado livre" | "ml" => Ok(SellerType::MercadoLivre),
            "shopee" => Ok(SellerType::Shopee),
            "amazon" => Ok(SellerType::Amazon),
            other => Err(DispatchError::InvalidGoal(format!("unknown seller '{other}'"))),
        }
    }
}

/// A committed package registration (append-only, never mutated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRegistration {
    /// UUIDv7, time-sortable
    pub id: String,
    pub order_id: OrderId,
    pub station_id: StationId,
    #[serde(default)]
    pub seller_type: Option<SellerType>,
    pub registered_at: DateTime<Utc>,
    /// Day the scan is attributed to; differs from the calendar date after a day closure
    pub business_date: NaiveDate,
    /// Acting operator (audit only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

impl PackageRegistration {
    pub fn new(
        order_id: OrderId,
        station_id: StationId,
        seller_type: Option<SellerType>,
        registered_at: DateTime<Utc>,
        business_date: NaiveDate,
        operator: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            order_id,
            station_id,
            seller_type,
            registered_at,
            business_date,
            operator,
        }
    }
}

/// Attached to a commit made while the previous business day is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessDayRollover {
    pub next_business_date: NaiveDate,
}

/// Result of a successful commit, as returned by `POST /register`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    pub registration: PackageRegistration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_day_rollover: Option<BusinessDayRollover>,
}

/// Target part of a daily goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GoalTarget {
    /// Single target for the whole floor
    Aggregate { total: u64 },
    /// Target per marketplace
    PerSeller { targets: BTreeMap<SellerType, u64> },
}

/// Production goal for one business date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyGoal {
    pub date: NaiveDate,
    pub target: GoalTarget,
    /// Carrier collection times ("HH:MM"), informational only
    #[serde(default)]
    pub collection_times: BTreeMap<SellerType, String>,
}

/// Persisted business day state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessDayState {
    pub current_business_date: NaiveDate,
    pub closed: bool,
    #[serde(default)]
    pub next_business_date: Option<NaiveDate>,
}

impl BusinessDayState {
    pub fn open(date: NaiveDate) -> Self {
        Self { current_business_date: date, closed: false, next_business_date: None }
    }
}

/// Push event fanned out to dashboards and report views
///
/// Events are low-latency hints only. Subscribers reconcile from the
/// productivity snapshot and must tolerate duplicates and reordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LiveEvent {
    #[serde(rename_all = "camelCase")]
    NewPackage {
        station: StationId,
        seller: Option<SellerType>,
        order_id: OrderId,
        business_date: NaiveDate,
        registered_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    DayClosed { date: NaiveDate, next_date: NaiveDate, total_packages: u64 },
}

impl LiveEvent {
    /// Business date the event refers to, for subscriber-side filtering
    pub fn business_date(&self) -> NaiveDate {
        match self {
            LiveEvent::NewPackage { business_date, .. } => *business_date,
            LiveEvent::DayClosed { date, .. } => *date,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LiveEvent::NewPackage { .. } => "new_package",
            LiveEvent::DayClosed { .. } => "day_closed",
        }
    }
}
