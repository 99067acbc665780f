//! Calendar-aligned resampling frequencies and sample-date generation.
//!
//! A [`Frequency`] names a calendar alignment, not a duration: daily means
//! midnights, weekly means Mondays, monthly means first-of-month boundaries
//! and yearly means Jan-1 boundaries, all in UTC. Sample-date generation is
//! anchored to these boundaries rather than to the raw data's first sample,
//! so two realizations spanning the same calendar period land on the same
//! grid points regardless of when exactly their simulations wrote output.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Closed set of supported calendar resampling cadences.
///
/// "No resampling" is expressed as `Option<Frequency>::None` at call sites
/// rather than as an extra variant, mirroring the on-disk encoding where a
/// raw store simply has no frequency token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Every midnight.
    Daily,
    /// Every Monday at midnight.
    Weekly,
    /// Every first of the month at midnight.
    Monthly,
    /// Every January 1st at midnight.
    Yearly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
        };
        f.write_str(token)
    }
}

/// Error returned when a frequency token is not one of the closed set.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("Unknown frequency token: {token}"))]
pub struct ParseFrequencyError {
    /// The unrecognized token.
    pub token: String,
}

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            other => Err(ParseFrequencyError {
                token: other.to_string(),
            }),
        }
    }
}

/// Convert milliseconds since the Unix epoch into a `DateTime<Utc>`.
///
/// Returns `None` for values outside chrono's representable year range.
pub fn datetime_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Convert a `DateTime<Utc>` into milliseconds since the Unix epoch.
pub fn millis_from_datetime(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Floor `dt` onto the nearest calendar boundary at or before it.
fn floor_to_boundary(freq: Frequency, dt: DateTime<Utc>) -> NaiveDate {
    let date = dt.date_naive();
    match freq {
        Frequency::Daily => date,
        Frequency::Weekly => {
            date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
        }
        Frequency::Monthly => first_of_month(date.year(), date.month()),
        Frequency::Yearly => first_of_month(date.year(), 1),
    }
}

/// Advance one calendar period from a boundary date.
fn next_boundary(freq: Frequency, date: NaiveDate) -> NaiveDate {
    match freq {
        Frequency::Daily => date + Duration::days(1),
        Frequency::Weekly => date + Duration::days(7),
        Frequency::Monthly => {
            if date.month() == 12 {
                first_of_month(date.year() + 1, 1)
            } else {
                first_of_month(date.year(), date.month() + 1)
            }
        }
        Frequency::Yearly => first_of_month(date.year() + 1, 1),
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    // Month is always 1..=12 here and day 1 exists in every month, so the
    // only failure mode is a year outside chrono's range, which the i32
    // arithmetic above cannot reach from valid input dates.
    NaiveDate::from_ymd_opt(year, month, 1).expect("first of month is a valid date")
}

/// Generate calendar-aligned sample dates covering `[min_date, max_date]`.
///
/// The returned sequence is strictly increasing, its first element is at or
/// before `min_date`, its last element is at or after `max_date`, and it is
/// never empty: when `min_date == max_date` it still contains at least one
/// point covering that instant.
pub fn normalized_sample_dates(
    min_date: DateTime<Utc>,
    max_date: DateTime<Utc>,
    freq: Frequency,
) -> Vec<DateTime<Utc>> {
    debug_assert!(
        min_date <= max_date,
        "normalized_sample_dates expects min <= max; got min={min_date:?}, max={max_date:?}"
    );

    let mut out = Vec::new();
    let mut cursor = floor_to_boundary(freq, min_date);
    loop {
        let dt = midnight_utc(cursor);
        out.push(dt);
        if dt >= max_date {
            break;
        }
        cursor = next_boundary(freq, cursor);
    }
    out
}

/// Same as [`normalized_sample_dates`] but over epoch-millisecond bounds,
/// returning epoch milliseconds.
///
/// Returns `None` when either bound is outside chrono's representable range.
pub fn normalized_sample_dates_millis(
    min_millis: i64,
    max_millis: i64,
    freq: Frequency,
) -> Option<Vec<i64>> {
    let min_dt = datetime_from_millis(min_millis)?;
    let max_dt = datetime_from_millis(max_millis)?;
    Some(
        normalized_sample_dates(min_dt, max_dt, freq)
            .into_iter()
            .map(millis_from_datetime)
            .collect(),
    )
}
