//! Error taxonomy for the dispatch engine
//!
//! Every variant reaches the operator-facing layer. Only
//! `TransientNetworkFailure` is a candidate for a bounded retry, and only
//! on the duplicate-check read.

use crate::domain::types::PackageRegistration;
use chrono::NaiveDate;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// Barcode matched none of the marketplace formats
    #[error("invalid barcode '{code}': {reason}")]
    InvalidBarcodeFormat { code: String, reason: String },

    /// Order already registered (pre-check or commit-time collision)
    #[error(
        "order {} already registered at station {} on {}",
        .existing.order_id,
        .existing.station_id,
        .existing.registered_at.to_rfc3339()
    )]
    DuplicateScan { existing: Box<PackageRegistration> },

    #[error("invalid station '{input}': expected one of M1, M2, M3, M4")]
    InvalidStation { input: String },

    #[error("invalid order id: {reason}")]
    InvalidOrderId { reason: String },

    #[error("business day {date} is already closed (next business day {next_business_date})")]
    DayAlreadyClosed { date: NaiveDate, next_business_date: NaiveDate },

    #[error("business day is not closed")]
    DayNotClosed,

    #[error("invalid goal: {0}")]
    InvalidGoal(String),

    /// Network/server failure talking to the dispatch server
    #[error("transient network failure: {0}")]
    TransientNetworkFailure(String),

    /// Registration log or state file could not be written
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl DispatchError {
    /// Stable machine-readable code used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::InvalidBarcodeFormat { .. } => "invalidBarcodeFormat",
            DispatchError::DuplicateScan { .. } => "duplicateScan",
            DispatchError::InvalidStation { .. } => "invalidStation",
            DispatchError::InvalidOrderId { .. } => "invalidOrderId",
            DispatchError::DayAlreadyClosed { .. } => "dayAlreadyClosed",
            DispatchError::DayNotClosed => "dayNotClosed",
            DispatchError::InvalidGoal(_) => "invalidGoal",
            DispatchError::TransientNetworkFailure(_) => "transientNetworkFailure",
            DispatchError::Storage(_) => "storage",
        }
    }

    pub fn duplicate(existing: PackageRegistration) -> Self {
        DispatchError::DuplicateScan { existing: Box::new(existing) }
    }

    /// Original registration for duplicate errors
    pub fn existing_registration(&self) -> Option<&PackageRegistration> {
        match self {
            DispatchError::DuplicateScan { existing } => Some(existing),
            _ => None,
        }
    }

    /// Whether the in-flight scan must be discarded (operator re-scans from zero)
    pub fn discards_scan(&self) -> bool {
        matches!(self, DispatchError::TransientNetworkFailure(_) | DispatchError::Storage(_))
    }
}
