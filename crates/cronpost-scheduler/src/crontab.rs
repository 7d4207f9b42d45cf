//! Cron evaluation: next occurrence of a 5-field crontab in a chat's timezone.
//!
//! The `cron` crate wants second-granularity expressions and numbers weekdays
//! 1 (Sunday) … 7 (Saturday), so user crontabs are normalised first:
//! a `0` seconds field is prepended and the day-of-week field is expanded
//! into weekday names using standard crontab numbering (0 and 7 are Sunday).

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::{Result, SchedulerError};

/// Layout of every timestamp the store persists.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// One evaluated occurrence, rendered for both the store and the chat owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextRun {
    pub instant: DateTime<Utc>,
    /// `instant` in the canonical timezone; goes to `nextrun_ts`.
    pub canonical: String,
    /// `instant` in the chat's timezone; goes to `user_nextrun_ts`.
    pub user: String,
}

/// A parsed crontab.
///
/// Holds two schedules when both day-of-month and day-of-week are restricted:
/// classic cron fires when *either* matches, the `cron` crate only when both do.
#[derive(Debug, Clone)]
pub struct CronExpr {
    source: String,
    schedules: Vec<Schedule>,
}

impl CronExpr {
    pub fn parse(crontab: &str) -> Result<Self> {
        let fields: Vec<&str> = crontab.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::invalid_crontab(
                crontab,
                format!("expected 5 fields, got {}", fields.len()),
            ));
        }
        let (minute, hour, dom, month, raw_dow) =
            (fields[0], fields[1], wildcard(fields[2]), fields[3], fields[4]);
        let dow = expand_day_of_week(raw_dow)
            .map_err(|reason| SchedulerError::invalid_crontab(crontab, reason))?;

        let dom_restricted = !is_unrestricted(dom);
        let dow_restricted = !is_unrestricted(raw_dow);

        let expressions = if dom_restricted && dow_restricted {
            vec![
                format!("0 {minute} {hour} {dom} {month} *"),
                format!("0 {minute} {hour} * {month} {dow}"),
            ]
        } else {
            vec![format!("0 {minute} {hour} {dom} {month} {dow}")]
        };

        let schedules = expressions
            .iter()
            .map(|expr| {
                Schedule::from_str(expr)
                    .map_err(|e| SchedulerError::invalid_crontab(crontab, e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source: crontab.to_string(),
            schedules,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First occurrence strictly after `reference`, evaluated in `tz`.
    pub fn next_after(&self, tz: Tz, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = reference.with_timezone(&tz);
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&local).next())
            .map(|dt| dt.with_timezone(&Utc))
            .min()
    }
}

/// Compute the next run of `crontab` after `reference`.
///
/// The schedule is evaluated in the chat's timezone (`0 9 * * *` is 09:00 for
/// the chat), and the single resulting instant is rendered twice.
pub fn next_run(
    crontab: &str,
    user_tz: Tz,
    canonical_tz: Tz,
    reference: DateTime<Utc>,
) -> Result<NextRun> {
    let expr = CronExpr::parse(crontab)?;
    let instant = expr
        .next_after(user_tz, reference)
        .ok_or_else(|| SchedulerError::invalid_crontab(crontab, "no future occurrences"))?;

    Ok(NextRun {
        instant,
        canonical: format_timestamp(instant, canonical_tz),
        user: format_timestamp(instant, user_tz),
    })
}

/// Parse without evaluating.
pub fn validate(crontab: &str) -> Result<()> {
    CronExpr::parse(crontab).map(|_| ())
}

/// The next `count` occurrences after `reference`.
pub fn upcoming(
    crontab: &str,
    tz: Tz,
    reference: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>> {
    let expr = CronExpr::parse(crontab)?;
    let mut runs = Vec::with_capacity(count);
    let mut cursor = reference;
    while runs.len() < count {
        match expr.next_after(tz, cursor) {
            Some(next) => {
                runs.push(next);
                cursor = next;
            }
            None => break,
        }
    }
    Ok(runs)
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

pub fn format_timestamp(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format(TIMESTAMP_FORMAT).to_string()
}

/// Inverse of [`format_timestamp`]. Ambiguous local times resolve to the earlier instant.
pub fn parse_timestamp(value: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn wildcard(field: &str) -> &str {
    if field == "?" {
        "*"
    } else {
        field
    }
}

// classic cron treats a field as unrestricted when it starts with `*`,
// so `*/2` in day-of-week still leaves day-of-month in charge
fn is_unrestricted(field: &str) -> bool {
    field.starts_with('*') || field.starts_with('?')
}

/// Rewrite a standard day-of-week field as a list of weekday names.
fn expand_day_of_week(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" {
        return Ok("*".to_string());
    }

    let mut days = [false; 7];
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step `{step}`"))?;
                if step == 0 {
                    return Err("day-of-week step must be positive".to_string());
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" || range == "?" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (day_number(a)?, day_number(b)?)
        } else {
            let day = day_number(range)?;
            // `5/2` means "from Friday onwards, every second day"
            if step.is_some() {
                (day, 7)
            } else {
                (day, day)
            }
        };

        if start > end {
            return Err(format!("day-of-week range `{range}` runs backwards"));
        }

        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days[day % 7] = true;
        }
    }

    let names: Vec<&str> = days
        .iter()
        .zip(DAY_NAMES)
        .filter_map(|(set, name)| set.then_some(name))
        .collect();
    Ok(names.join(","))
}

fn day_number(token: &str) -> std::result::Result<usize, String> {
    if let Ok(n) = token.parse::<usize>() {
        return if n <= 7 {
            Ok(n)
        } else {
            Err(format!("day-of-week `{n}` out of range 0-7"))
        };
    }
    DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .ok_or_else(|| format!("unknown day-of-week `{token}`"))
}
