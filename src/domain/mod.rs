//! Domain models - core dispatch types
//!
//! This module contains the canonical data types used throughout the system:
//! - `PackageRegistration` - the durable, append-only unit of work
//! - `StationId` / `SellerType` / `OrderId` - strongly typed identifiers
//! - `classifier` - pure barcode → marketplace classification
//! - `error` - the dispatch error taxonomy

pub mod classifier;
pub mod error;
pub mod types;

// Re-export commonly used types at module level
pub use classifier::{classify, Classification, ClassifiedScan, ScanCandidate};
pub use error::{DispatchError, Result};
pub use types::{
    BusinessDayRollover, BusinessDayState, CommitReceipt, DailyGoal, GoalTarget, LiveEvent,
    OrderId, PackageRegistration, SellerType, StationId,
};
