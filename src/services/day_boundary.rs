//! Business day boundary management
//!
//! Maps "now" to the business date a registration is attributed to. After
//! a closure every new registration goes to the next business day until
//! an operator reopens the day or the calendar reaches that next business
//! day on its own.

use crate::domain::error::{DispatchError, Result};
use crate::domain::types::BusinessDayState;
use crate::services::calendar::BusinessCalendar;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Business date resolved for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    pub business_date: NaiveDate,
    /// True when the date comes from a closure, not from the calendar date
    pub rolled_over: bool,
}

/// Day status as reported to collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStatus {
    pub closed: bool,
    pub current_business_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_business_date: Option<NaiveDate>,
}

/// Outcome of a successful closure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayClosure {
    pub closed_date: NaiveDate,
    pub next_business_date: NaiveDate,
}

pub struct DayBoundaryManager {
    state: Mutex<BusinessDayState>,
    calendar: Arc<dyn BusinessCalendar>,
    state_path: Option<PathBuf>,
}

impl DayBoundaryManager {
    /// Volatile manager starting open on `today`
    pub fn new(calendar: Arc<dyn BusinessCalendar>, today: NaiveDate) -> Self {
        Self { state: Mutex::new(BusinessDayState::open(today)), calendar, state_path: None }
    }

    /// Manager persisted as JSON at `path`, loading the previous state if present
    pub fn open<P: AsRef<Path>>(
        calendar: Arc<dyn BusinessCalendar>,
        path: P,
        today: NaiveDate,
    ) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BusinessDayState>(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "day_state_unreadable_reset");
                    BusinessDayState::open(today)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BusinessDayState::open(today),
            Err(e) => return Err(e),
        };

        info!(
            current_business_date = %state.current_business_date,
            closed = %state.closed,
            "day_state_loaded"
        );

        let manager = Self { state: Mutex::new(state), calendar, state_path: Some(path) };
        // Apply any supersession that happened while we were down
        manager.resolve_business_date(today)?;
        Ok(manager)
    }

    /// Resolve the business date for a write happening on calendar date `today`
    ///
    /// Must be the first step of every write path.
    pub fn resolve_business_date(&self, today: NaiveDate) -> std::io::Result<ResolvedDate> {
        let mut state = self.state.lock();
        self.refresh(&mut state, today)?;

        Ok(match (state.closed, state.next_business_date) {
            (true, Some(next)) => ResolvedDate { business_date: next, rolled_over: true },
            _ => ResolvedDate { business_date: state.current_business_date, rolled_over: false },
        })
    }

    pub fn status(&self, today: NaiveDate) -> std::io::Result<DayStatus> {
        let mut state = self.state.lock();
        self.refresh(&mut state, today)?;
        Ok(Self::to_status(&state))
    }

    /// Close the current business day
    ///
    /// A second close while already closed is a conflict, never a silent no-op.
    pub fn close_day(&self, today: NaiveDate) -> Result<DayClosure> {
        let mut state = self.state.lock();
        self.refresh(&mut state, today)?;

        if state.closed {
            let next = state
                .next_business_date
                .unwrap_or_else(|| self.calendar.next_business_day(state.current_business_date));
            return Err(DispatchError::DayAlreadyClosed {
                date: state.current_business_date,
                next_business_date: next,
            });
        }

        let closed_date = state.current_business_date;
        let next_business_date = self.calendar.next_business_day(closed_date);
        let updated = BusinessDayState {
            current_business_date: closed_date,
            closed: true,
            next_business_date: Some(next_business_date),
        };
        self.persist(&updated)?;
        *state = updated;

        info!(closed_date = %closed_date, next_business_date = %next_business_date, "day_closed");
        Ok(DayClosure { closed_date, next_business_date })
    }

    /// Reopen a closed day; new registrations go to today's date again
    pub fn reopen(&self, today: NaiveDate) -> Result<DayStatus> {
        let mut state = self.state.lock();
        self.refresh(&mut state, today)?;

        if !state.closed {
            return Err(DispatchError::DayNotClosed);
        }

        let updated = BusinessDayState::open(today);
        self.persist(&updated)?;
        *state = updated;

        info!(current_business_date = %today, "day_reopened");
        Ok(Self::to_status(&state))
    }

    /// Apply calendar progression to the state
    ///
    /// An open day follows the calendar date. A closed day stays closed
    /// until the calendar reaches its next business date.
    fn refresh(&self, state: &mut BusinessDayState, today: NaiveDate) -> std::io::Result<()> {
        let updated = if state.closed {
            match state.next_business_date {
                Some(next) if today >= next => {
                    info!(next_business_date = %next, today = %today, "day_closure_superseded");
                    BusinessDayState::open(today)
                }
                Some(_) => return Ok(()),
                None => BusinessDayState::open(today),
            }
        } else if state.current_business_date != today {
            BusinessDayState::open(today)
        } else {
            return Ok(());
        };

        if updated.closed != state.closed {
            self.persist(&updated)?;
        }
        *state = updated;
        Ok(())
    }

    fn persist(&self, state: &BusinessDayState) -> std::io::Result<()> {
        let Some(ref path) = self.state_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write-then-rename so a crash never leaves a half-written state file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn to_status(state: &BusinessDayState) -> DayStatus {
        DayStatus {
            closed: state.closed,
            current_business_date: state.current_business_date,
            next_business_date: if state.closed { state.next_business_date } else { None },
        }
    }
}
