use chrono::{DateTime, Days, NaiveDate, Utc};

use crate::error::{AppError, Result};
use meter_core::{DayWindow, TimeRange};

/// Whole UTC days `[today - days + 1, today + 1)`.
pub fn range_for_days(today: NaiveDate, days: u32) -> Result<TimeRange> {
    if days == 0 {
        return Err(AppError::InvalidInput("days must be at least 1".to_string()));
    }
    let first = today
        .checked_sub_days(Days::new(u64::from(days - 1)))
        .ok_or_else(|| AppError::InvalidInput(format!("invalid window of {days} days")))?;
    let after = today
        .checked_add_days(Days::new(1))
        .ok_or_else(|| AppError::InvalidInput("invalid end date".to_string()))?;
    Ok(TimeRange {
        start: start_of_day(first),
        end: start_of_day(after),
    })
}

pub fn window_for_days(today: NaiveDate, days: u32) -> Result<DayWindow> {
    if days == 0 {
        return Err(AppError::InvalidInput("days must be at least 1".to_string()));
    }
    Ok(DayWindow::new(today, days))
}

/// Buckets whose period ended on or before this date are past retention.
pub fn retention_cutoff(today: NaiveDate, retention_days: u32) -> Result<NaiveDate> {
    today
        .checked_sub_days(Days::new(u64::from(retention_days)))
        .ok_or_else(|| AppError::InvalidInput(format!("invalid retention {retention_days}")))
}

pub fn parse_utc(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| AppError::InvalidInput(format!("invalid datetime: {}", err)))
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}
