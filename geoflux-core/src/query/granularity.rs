//! Time bucketing

use crate::Timestamp;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SECOND: i64 = 1_000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Bucket size used to group rows, all in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One bucket for the whole query
    #[default]
    All,
    /// One bucket per distinct millisecond
    None,
    Second,
    Minute,
    FiveMinute,
    FifteenMinute,
    ThirtyMinute,
    Hour,
    SixHour,
    Day,
    /// ISO weeks starting on Monday
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    /// Start of the bucket containing `ts`
    ///
    /// `origin` stamps the single bucket of [`Granularity::All`]. A bucket
    /// that would start before `Timestamp::MIN` starts at `Timestamp::MIN`.
    pub fn bucket_start(&self, ts: Timestamp, origin: Timestamp) -> Timestamp {
        match self {
            Granularity::All => origin,
            Granularity::None => ts,
            Granularity::Second => floor(ts, SECOND),
            Granularity::Minute => floor(ts, MINUTE),
            Granularity::FiveMinute => floor(ts, 5 * MINUTE),
            Granularity::FifteenMinute => floor(ts, 15 * MINUTE),
            Granularity::ThirtyMinute => floor(ts, 30 * MINUTE),
            Granularity::Hour => floor(ts, HOUR),
            Granularity::SixHour => floor(ts, 6 * HOUR),
            Granularity::Day => floor(ts, DAY),
            Granularity::Week => {
                let day = ts.div_euclid(DAY);
                // 1970-01-01 was a Thursday
                let since_monday = (day + 3).rem_euclid(7);
                (day - since_monday).saturating_mul(DAY)
            }
            Granularity::Month => calendar_floor(ts, |d| (d.year(), d.month())),
            Granularity::Quarter => calendar_floor(ts, |d| (d.year(), (d.month() - 1) / 3 * 3 + 1)),
            Granularity::Year => calendar_floor(ts, |d| (d.year(), 1)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::All => "all",
            Granularity::None => "none",
            Granularity::Second => "second",
            Granularity::Minute => "minute",
            Granularity::FiveMinute => "five_minute",
            Granularity::FifteenMinute => "fifteen_minute",
            Granularity::ThirtyMinute => "thirty_minute",
            Granularity::Hour => "hour",
            Granularity::SixHour => "six_hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        serde_json::from_value(serde_json::Value::String(lower))
            .map_err(|_| format!("Unknown granularity: {}", s))
    }
}

fn floor(ts: Timestamp, width: i64) -> Timestamp {
    ts.saturating_sub(ts.rem_euclid(width))
}

/// First instant of the calendar period selected by `period` (year, first month)
fn calendar_floor(ts: Timestamp, period: impl Fn(&NaiveDate) -> (i32, u32)) -> Timestamp {
    let Some(dt) = DateTime::<Utc>::from_timestamp_millis(ts) else {
        return ts;
    };
    let (year, month) = period(&dt.date_naive());
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(ts, |d| d.and_utc().timestamp_millis())
}
