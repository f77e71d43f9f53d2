//! Business calendar - "next business day" for day closures

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeSet;

pub trait BusinessCalendar: Send + Sync {
    /// First business day strictly after `date`
    fn next_business_day(&self, date: NaiveDate) -> NaiveDate;
}

/// Monday-to-Friday calendar with a configurable holiday list
#[derive(Debug, Clone, Default)]
pub struct WeekdayCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl WeekdayCalendar {
    pub fn new<I: IntoIterator<Item = NaiveDate>>(holidays: I) -> Self {
        Self { holidays: holidays.into_iter().collect() }
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }
}

impl BusinessCalendar for WeekdayCalendar {
    fn next_business_day(&self, date: NaiveDate) -> NaiveDate {
        let mut candidate = date;
        loop {
            let Some(next) = candidate.succ_opt() else {
                return candidate;
            };
            candidate = next;
            if self.is_business_day(candidate) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_weekday_rolls_to_next_day() {
        let calendar = WeekdayCalendar::default();
        // Monday -> Tuesday
        assert_eq!(calendar.next_business_day(d(2026, 10, 19)), d(2026, 10, 20));
    }

    #[test]
    fn test_friday_skips_weekend() {
        let calendar = WeekdayCalendar::default();
        assert_eq!(calendar.next_business_day(d(2026, 10, 16)), d(2026, 10, 19));
        // Closing on a Saturday still lands on Monday
        assert_eq!(calendar.next_business_day(d(2026, 10, 17)), d(2026, 10, 19));
    }

    #[test]
    fn test_holidays_are_skipped() {
        // Finados (Mon 2 Nov 2026) followed by a bridge day
        let calendar = WeekdayCalendar::new([d(2026, 11, 2), d(2026, 11, 3)]);
        assert_eq!(calendar.next_business_day(d(2026, 10, 30)), d(2026, 11, 4));
        assert!(!calendar.is_business_day(d(2026, 11, 2)));
        assert!(calendar.is_business_day(d(2026, 11, 4)));
    }
}
