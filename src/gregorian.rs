//! Calendar interval resolver.
//!
//! Windows flagged `DURATION_IS_GREGORIAN` snap to civil-time boundaries
//! instead of rolling from the first request. The request's `duration`
//! selects the interval kind: it must be one of the seven constants below,
//! anything else is rejected. All computation is UTC.
//!
//! An interval's expiration is the first instant *after* it: the start of
//! the next interval. The last millisecond inside a weekly window is
//! therefore Saturday 23:59:59.999 UTC, and the cache (which treats
//! `expire_at` as an exclusive deadline) keeps that millisecond in-window.

use crate::error::RateLimitError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

/// Duration selecting "end of current second".
pub const GREGORIAN_SECOND: i64 = 1_000;
/// Duration selecting "end of current minute".
pub const GREGORIAN_MINUTE: i64 = 60_000;
/// Duration selecting "end of current hour".
pub const GREGORIAN_HOUR: i64 = 3_600_000;
/// Duration selecting "end of current day" (UTC civil day).
pub const GREGORIAN_DAY: i64 = 86_400_000;
/// Duration selecting "end of current week" (weeks run Sunday through
/// Saturday).
pub const GREGORIAN_WEEK: i64 = 604_800_000;
/// Duration selecting "end of current month".
pub const GREGORIAN_MONTH: i64 = 2_629_800_000;
/// Duration selecting "end of current year".
pub const GREGORIAN_YEAR: i64 = 31_557_600_000;

const MILLIS_PER_DAY: i64 = 86_400_000;

fn civil(now_millis: i64) -> Result<DateTime<Utc>, RateLimitError> {
    Utc.timestamp_millis_opt(now_millis).single().ok_or_else(|| RateLimitError::Clock {
        reason: format!("timestamp {} is outside the representable range", now_millis),
    })
}

fn start_of_day_millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

fn first_of_next_month(date: NaiveDate) -> Result<NaiveDate, RateLimitError> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| RateLimitError::Clock {
        reason: format!("calendar overflow computing month after {}", date),
    })
}

fn first_of_year(year: i32) -> Result<NaiveDate, RateLimitError> {
    NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| RateLimitError::Clock {
        reason: format!("calendar overflow computing january 1 of {}", year),
    })
}

/// The instant the calendar interval containing `now_millis` expires, i.e.
/// the start of the next interval, in milliseconds since the epoch.
///
/// `duration_millis` selects the interval kind and must be one of the
/// `GREGORIAN_*` constants; anything else fails with
/// [`RateLimitError::InvalidGregorianDuration`].
pub fn gregorian_expiration(now_millis: i64, duration_millis: i64) -> Result<i64, RateLimitError> {
    match duration_millis {
        GREGORIAN_SECOND => Ok((now_millis.div_euclid(1_000) + 1) * 1_000),
        GREGORIAN_MINUTE => Ok((now_millis.div_euclid(60_000) + 1) * 60_000),
        GREGORIAN_HOUR => Ok((now_millis.div_euclid(3_600_000) + 1) * 3_600_000),
        GREGORIAN_DAY => {
            let date = civil(now_millis)?.date_naive();
            Ok(start_of_day_millis(date) + MILLIS_PER_DAY)
        }
        GREGORIAN_WEEK => {
            let date = civil(now_millis)?.date_naive();
            let into_week = i64::from(date.weekday().num_days_from_sunday());
            let next_sunday = date + Duration::days(7 - into_week);
            Ok(start_of_day_millis(next_sunday))
        }
        GREGORIAN_MONTH => {
            let date = civil(now_millis)?.date_naive();
            Ok(start_of_day_millis(first_of_next_month(date)?))
        }
        GREGORIAN_YEAR => {
            let date = civil(now_millis)?.date_naive();
            Ok(start_of_day_millis(first_of_year(date.year() + 1)?))
        }
        other => Err(RateLimitError::InvalidGregorianDuration { duration: other }),
    }
}

/// The full length in milliseconds of the calendar interval containing
/// `now_millis`.
///
/// Fixed for second through week; varies for months (28-31 days) and years
/// (365 or 366 days). The leaky bucket leaks at a rate spread over this
/// full length rather than the truncated remainder of the interval.
pub fn gregorian_duration(now_millis: i64, duration_millis: i64) -> Result<i64, RateLimitError> {
    match duration_millis {
        GREGORIAN_SECOND | GREGORIAN_MINUTE | GREGORIAN_HOUR | GREGORIAN_DAY
        | GREGORIAN_WEEK => Ok(duration_millis),
        GREGORIAN_MONTH => {
            let date = civil(now_millis)?.date_naive();
            let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).ok_or_else(|| {
                RateLimitError::Clock {
                    reason: format!("calendar overflow computing start of month for {}", date),
                }
            })?;
            let days = (first_of_next_month(date)? - first).num_days();
            Ok(days * MILLIS_PER_DAY)
        }
        GREGORIAN_YEAR => {
            let date = civil(now_millis)?.date_naive();
            let days = (first_of_year(date.year() + 1)? - first_of_year(date.year())?).num_days();
            Ok(days * MILLIS_PER_DAY)
        }
        other => Err(RateLimitError::InvalidGregorianDuration { duration: other }),
    }
}
