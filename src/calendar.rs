use crate::error::{LedgerError, Result};
use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthItem {
    /// Display name, e.g. "March 2025".
    pub label: String,
    /// First day of the budgeting month (the billing day, clamped to the month's length).
    pub start: NaiveDate,
    pub billing_day: u32,
}

impl MonthItem {
    pub fn start_instant(&self) -> DateTime<Utc> {
        self.start.and_time(NaiveTime::default()).and_utc()
    }
}

/// Read-only mapping from month index to its label and start date.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MonthCalendar {
    months: Vec<MonthItem>,
}

impl MonthCalendar {
    pub fn new(months: Vec<MonthItem>) -> Self {
        Self { months }
    }

    /// Consecutive budgeting months beginning at `year`/`month`, each starting on `billing_day`.
    pub fn starting(year: i32, month: u32, billing_day: u32, horizon: usize) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(LedgerError::DateError(format!(
                "Invalid start month {}: must be between 1 and 12",
                month
            )));
        }
        if !(1..=31).contains(&billing_day) {
            return Err(LedgerError::DateError(format!(
                "Invalid billing day {}: must be between 1 and 31",
                billing_day
            )));
        }

        let mut months = Vec::with_capacity(horizon);
        let (mut y, mut m) = (year, month);
        for _ in 0..horizon {
            let last = last_day_of_month(y, m)?;
            let day = billing_day.min(last.day());
            let start = NaiveDate::from_ymd_opt(y, m, day).ok_or_else(|| {
                LedgerError::DateError(format!("Invalid date {}-{:02}-{:02}", y, m, day))
            })?;
            months.push(MonthItem {
                label: start.format("%B %Y").to_string(),
                start,
                billing_day,
            });
            (y, m) = next_month(y, m);
        }

        Ok(Self { months })
    }

    pub fn get(&self, index: usize) -> Option<&MonthItem> {
        self.months.get(index)
    }

    /// Label for a month, falling back to a 1-based "Month N" when the calendar is shorter.
    pub fn label(&self, index: usize) -> String {
        self.months
            .get(index)
            .map(|m| m.label.clone())
            .unwrap_or_else(|| format!("Month {}", index + 1))
    }

    pub fn len(&self) -> usize {
        self.months.len()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    let (following_year, following_month) = next_month(year, month);

    NaiveDate::from_ymd_opt(following_year, following_month, 1)
        .and_then(|d| d.checked_sub_days(Days::new(1)))
        .ok_or_else(|| LedgerError::DateError(format!("No last day for {}-{:02}", year, month)))
}
