//! Calendar arithmetic for simulation timestamps
//!
//! Timestamps are plain millisecond counts. Fixed-length units (seconds
//! through weeks) are added arithmetically; months and years go through
//! chrono so that "2 months" after Jan 31 lands on the last day of March
//! rather than drifting by a fixed 30-day approximation.

use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{Result, SimError};
use crate::core::types::Timestamp;

pub const MS_PER_SECOND: i64 = 1_000;
pub const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;
pub const MS_PER_WEEK: i64 = 7 * MS_PER_DAY;

/// Mean Gregorian month, used only for the fractional part of month/year quantities
const DAYS_PER_MONTH: f64 = 30.436_875;

/// Units accepted by Delay states and Age conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[serde(alias = "second")]
    Seconds,
    #[serde(alias = "minute")]
    Minutes,
    #[serde(alias = "hour")]
    Hours,
    #[serde(alias = "day")]
    Days,
    #[serde(alias = "week")]
    Weeks,
    #[serde(alias = "month")]
    Months,
    #[serde(alias = "year")]
    Years,
}

impl TimeUnit {
    /// Length in milliseconds for units that have a fixed length
    pub fn fixed_millis(self) -> Option<i64> {
        match self {
            TimeUnit::Seconds => Some(MS_PER_SECOND),
            TimeUnit::Minutes => Some(MS_PER_MINUTE),
            TimeUnit::Hours => Some(MS_PER_HOUR),
            TimeUnit::Days => Some(MS_PER_DAY),
            TimeUnit::Weeks => Some(MS_PER_WEEK),
            TimeUnit::Months | TimeUnit::Years => None,
        }
    }

    fn months_per_unit(self) -> u32 {
        match self {
            TimeUnit::Years => 12,
            _ => 1,
        }
    }
}

pub fn to_datetime(ts: Timestamp) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ts)
        .single()
        .ok_or(SimError::TimeOutOfRange(ts))
}

/// Midnight UTC on the given calendar day
pub fn timestamp(year: i32, month: u32, day: u32) -> Result<Timestamp> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| SimError::InvalidDate(format!("{:04}-{:02}-{:02}", year, month, day)))
}

pub fn year_of(ts: Timestamp) -> Result<i32> {
    Ok(to_datetime(ts)?.year())
}

/// RFC 3339 rendering for logs; falls back to the raw number
pub fn format(ts: Timestamp) -> String {
    to_datetime(ts)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|_| ts.to_string())
}

/// Move `start` forward by `quantity` units.
pub fn advance(start: Timestamp, quantity: f64, unit: TimeUnit) -> Result<Timestamp> {
    if !quantity.is_finite() || quantity < 0.0 {
        return Err(SimError::InvalidField {
            context: "duration".to_string(),
            message: format!("quantity {} must be a non-negative number", quantity),
        });
    }

    if let Some(ms) = unit.fixed_millis() {
        return offset(start, quantity * ms as f64);
    }

    let total = quantity * unit.months_per_unit() as f64;
    let whole = total.trunc();
    let fraction = total - whole;
    if whole > u32::MAX as f64 {
        return Err(SimError::TimeOutOfRange(start));
    }

    let shifted = to_datetime(start)?
        .checked_add_months(Months::new(whole as u32))
        .ok_or(SimError::TimeOutOfRange(start))?;

    offset(shifted.timestamp_millis(), fraction * DAYS_PER_MONTH * MS_PER_DAY as f64)
}

/// `start` plus a non-negative millisecond amount, failing instead of overflowing
fn offset(start: Timestamp, millis: f64) -> Result<Timestamp> {
    let millis = millis.round();
    if millis >= i64::MAX as f64 {
        return Err(SimError::TimeOutOfRange(start));
    }
    start
        .checked_add(millis as i64)
        .ok_or(SimError::TimeOutOfRange(start))
}

/// Whole units elapsed between `from` and `to` (floored), e.g. age in years.
pub fn elapsed(from: Timestamp, to: Timestamp, unit: TimeUnit) -> Result<i64> {
    if to < from {
        return Ok(-elapsed(to, from, unit)?);
    }

    if let Some(ms) = unit.fixed_millis() {
        return Ok((to - from) / ms);
    }

    let a = to_datetime(from)?;
    let b = to_datetime(to)?;
    let mut months = (b.year() - a.year()) as i64 * 12 + (b.month() as i64 - a.month() as i64);
    if months > 0 {
        let anniversary = a
            .checked_add_months(Months::new(months as u32))
            .ok_or(SimError::TimeOutOfRange(from))?;
        if anniversary > b {
            months -= 1;
        }
    }

    Ok(months / unit.months_per_unit() as i64)
}
