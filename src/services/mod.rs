//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `registry` - Scan registry, the per-order uniqueness guard
//! - `aggregator` - Productivity totals, hour buckets and pace
//! - `day_boundary` - Business day closure and rollover
//! - `calendar` - Next business day (weekends and holidays)
//! - `goals` - Daily goal store
//! - `dispatch` - Commit path orchestration and read side
//! - `station` - Per-workstation scan state machine with auto-commit

pub mod aggregator;
pub mod calendar;
pub mod day_boundary;
pub mod dispatch;
pub mod goals;
pub mod registry;
pub mod station;

// Re-export commonly used types
pub use aggregator::{GoalProgress, ProductivityAggregator, ProductivitySnapshot};
pub use calendar::{BusinessCalendar, WeekdayCalendar};
pub use day_boundary::{DayBoundaryManager, DayStatus};
pub use dispatch::{DayClosedReport, DispatchService, RegisterRequest};
pub use station::{AutoCommitOutcome, DispatchBackend, ScanPhase, StationController};
