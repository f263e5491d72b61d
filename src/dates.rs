//! Day arithmetic and calendar-date bucketing in a user's time zone.
//!
//! Timestamps are UTC instants everywhere. A calendar day only exists relative
//! to an IANA zone, and [`date_key`] is the one place that turns an instant
//! into a day. Schedule buckets, cooldown hints and range queries all go
//! through it so two code paths can never disagree on a bucket.

use chrono::offset::LocalResult;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

use crate::aggregate::AllTaskAggregate;
use crate::error::RegimenError;

const DAY_MS: f64 = 86_400_000.0;

pub fn parse_time_zone(name: &str) -> Result<Tz, RegimenError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| RegimenError::InvalidTimeZone(name.to_string()))
}

pub fn parse_date(s: &str) -> Result<NaiveDate, RegimenError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| RegimenError::InvalidDate(s.to_string()))
}

/// Offset by whole days. No zone adjustment: 24h steps in UTC.
pub fn days_from(ts: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    ts + TimeDelta::days(days)
}

/// Same local wall-clock time `days` calendar days away in `tz`. Use this,
/// not [`days_from`], when the result gets bucketed by local day: a 23h or 25h
/// DST day would otherwise land it on the neighbouring date.
pub fn shift_days(ts: DateTime<Utc>, days: i64, tz: Tz) -> DateTime<Utc> {
    shift_days_into(ts, days, tz, tz)
}

/// [`shift_days`] for a copy that moves between zones: the wall-clock time
/// read in `from` is kept and re-read in `to`.
pub fn shift_days_into(ts: DateTime<Utc>, days: i64, from: Tz, to: Tz) -> DateTime<Utc> {
    resolve_local(ts.with_timezone(&from).naive_local() + TimeDelta::days(days), to)
}

/// Calendar date of `ts` as seen in `tz`.
pub fn date_key(ts: DateTime<Utc>, tz: Tz) -> NaiveDate {
    ts.with_timezone(&tz).date_naive()
}

/// Local midnight of a calendar date, as a UTC instant.
///
/// A few zones skip midnight on DST day (e.g. America/Santiago); those
/// resolve to the first valid instant of the day. Ambiguous midnights pick
/// the earlier instant.
pub fn midnight_of(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    resolve_local(date.and_time(NaiveTime::MIN), tz)
}

/// First valid instant at or after a local wall-clock time.
fn resolve_local(wall: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    let mut local = wall;
    for _ in 0..=12 {
        match tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(a, _) => return a.with_timezone(&Utc),
            LocalResult::None => local += TimeDelta::minutes(15),
        }
    }
    wall.and_utc()
}

/// Local midnight of the day `ts` falls on in `tz`.
pub fn set_to_midnight(ts: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    midnight_of(date_key(ts, tz), tz)
}

/// Whole days from `from` to `to`, rounded to the nearest day so DST shifts
/// and millisecond jitter never produce an off-by-one.
pub fn calculate_days_difference(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    ((to - from).num_milliseconds() as f64 / DAY_MS).round() as i64
}

/// Earliest and latest live `starts_at` across every aggregate entry.
/// `None` when nothing live remains.
pub fn get_min_and_max_routine_dates(
    all_tasks: &[AllTaskAggregate],
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut dates = all_tasks
        .iter()
        .flat_map(|t| t.ids.iter())
        .filter(|e| e.deleted_on.is_none())
        .map(|e| e.starts_at);
    let first = dates.next()?;
    Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
}
