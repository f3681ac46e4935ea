//! Timezone-aware cron evaluator.
//!
//! Accepts standard 5-field expressions (minute hour day-of-month month
//! day-of-week) with `*`, `?`, lists, ranges, steps and month/weekday names,
//! plus the descriptors `@yearly`, `@annually`, `@monthly`, `@weekly`,
//! `@daily`, `@midnight`, `@hourly` and `@every <duration>`.

use std::fmt;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;

use crate::datetime::truncate_to_seconds;
use crate::{FeedmailError, Result};

/// How far ahead [`CronSchedule::next_after`] searches before giving up.
const SEARCH_HORIZON_DAYS: i64 = 5 * 366;

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

impl FieldSpec {
    const fn new(name: &'static str, min: u32, max: u32, names: &'static [&'static str]) -> Self {
        Self {
            name,
            min,
            max,
            names,
        }
    }
}

const MINUTE: FieldSpec = FieldSpec::new("minute", 0, 59, &[]);
const HOUR: FieldSpec = FieldSpec::new("hour", 0, 23, &[]);
const DAY_OF_MONTH: FieldSpec = FieldSpec::new("day of month", 1, 31, &[]);
const MONTH: FieldSpec = FieldSpec::new("month", 1, 12, MONTH_NAMES);
// 7 is accepted as an alias for Sunday.
const DAY_OF_WEEK: FieldSpec = FieldSpec::new("day of week", 0, 7, WEEKDAY_NAMES);

/// A parsed cron schedule bound to a timezone.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    spec: String,
    timezone: Tz,
    kind: Kind,
}

#[derive(Debug, Clone)]
enum Kind {
    Fields(Fields),
    Every(Duration),
}

/// One bit per allowed value.
#[derive(Debug, Clone)]
struct Fields {
    minute: u64,
    hour: u64,
    day_of_month: u64,
    month: u64,
    day_of_week: u64,
    day_of_month_star: bool,
    day_of_week_star: bool,
}

impl CronSchedule {
    /// Parse `spec`, evaluating wall-clock fields in `timezone`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a wrong field count, an out-of-range value, a
    /// zero step, an inverted range, an unknown descriptor or a bad
    /// `@every` duration.
    pub fn parse(spec: &str, timezone: Tz) -> Result<Self> {
        let trimmed = spec.trim();
        let kind = if let Some(descriptor) = trimmed.strip_prefix('@') {
            parse_descriptor(descriptor, spec)?
        } else {
            Kind::Fields(parse_fields(trimmed, spec)?)
        };
        Ok(Self {
            spec: spec.to_string(),
            timezone,
            kind,
        })
    }

    /// The expression as given.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Timezone the fields are evaluated in.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Next trigger strictly after `after`, or `None` if nothing matches
    /// within five years.
    ///
    /// Local times skipped by a DST transition never fire; a repeated local
    /// time fires at its earliest instant that is still after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            Kind::Every(interval) => truncate_to_seconds(after).checked_add_signed(*interval),
            Kind::Fields(fields) => self.next_matching(fields, after),
        }
    }

    fn next_matching(&self, fields: &Fields, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.timezone).naive_local();
        let mut candidate = local.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = local + Duration::days(SEARCH_HORIZON_DAYS);

        while candidate <= limit {
            if !has_bit(fields.month, candidate.month()) {
                candidate = first_of_next_month(candidate.date())?;
                continue;
            }
            if !fields.day_matches(candidate.date()) {
                candidate = candidate.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !has_bit(fields.hour, candidate.hour()) {
                candidate =
                    candidate.date().and_hms_opt(candidate.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !has_bit(fields.minute, candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }

            match self.timezone.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => {
                    let dt = dt.with_timezone(&Utc);
                    if dt > after {
                        return Some(dt);
                    }
                }
                LocalResult::Ambiguous(earliest, latest) => {
                    for dt in [earliest, latest] {
                        let dt = dt.with_timezone(&Utc);
                        if dt > after {
                            return Some(dt);
                        }
                    }
                }
                // Skipped by a DST gap.
                LocalResult::None => {}
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

impl Fields {
    /// When both day fields are restricted either may match; otherwise both
    /// must.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = has_bit(self.day_of_month, date.day());
        let dow = has_bit(self.day_of_week, date.weekday().num_days_from_sunday());
        if self.day_of_month_star || self.day_of_week_star {
            dom && dow
        } else {
            dom || dow
        }
    }
}

fn has_bit(bits: u64, value: u32) -> bool {
    bits & (1u64 << value) != 0
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn parse_descriptor(descriptor: &str, spec: &str) -> Result<Kind> {
    let expr = match descriptor {
        "yearly" | "annually" => "0 0 1 1 *",
        "monthly" => "0 0 1 * *",
        "weekly" => "0 0 * * 0",
        "daily" | "midnight" => "0 0 * * *",
        "hourly" => "0 * * * *",
        other => {
            if let Some(duration) = other.strip_prefix("every ") {
                return parse_every(duration.trim(), spec).map(Kind::Every);
            }
            return Err(FeedmailError::invalid_argument(format!(
                "invalid cron spec {spec:?}: unrecognized descriptor"
            )));
        }
    };
    parse_fields(expr, spec).map(Kind::Fields)
}

/// Parse a duration like `90s`, `5m` or `1h30m`.
fn parse_every(duration: &str, spec: &str) -> Result<Duration> {
    let invalid = |reason: &str| {
        FeedmailError::invalid_argument(format!("invalid cron spec {spec:?}: {reason}"))
    };

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in duration.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let amount: i64 = digits
            .parse()
            .map_err(|_| invalid("expected a number before each unit"))?;
        digits.clear();
        let part = match c {
            'h' => Duration::try_hours(amount),
            'm' => Duration::try_minutes(amount),
            's' => Duration::try_seconds(amount),
            _ => return Err(invalid("duration units are h, m and s")),
        }
        .ok_or_else(|| invalid("duration out of range"))?;
        total = total
            .checked_add(&part)
            .ok_or_else(|| invalid("duration out of range"))?;
    }
    if !digits.is_empty() {
        return Err(invalid("missing unit in duration"));
    }
    if total < Duration::seconds(1) {
        return Err(invalid("interval must be at least one second"));
    }
    Ok(total)
}

fn parse_fields(expr: &str, spec: &str) -> Result<Fields> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(FeedmailError::invalid_argument(format!(
            "invalid cron spec {spec:?}: expected 5 fields, found {}",
            parts.len()
        )));
    }

    let mut day_of_week = parse_field(parts[4], &DAY_OF_WEEK, spec)?;
    if has_bit(day_of_week, 7) {
        day_of_week = (day_of_week & !(1 << 7)) | 1;
    }

    Ok(Fields {
        minute: parse_field(parts[0], &MINUTE, spec)?,
        hour: parse_field(parts[1], &HOUR, spec)?,
        day_of_month: parse_field(parts[2], &DAY_OF_MONTH, spec)?,
        month: parse_field(parts[3], &MONTH, spec)?,
        day_of_week,
        day_of_month_star: is_star(parts[2]),
        day_of_week_star: is_star(parts[4]),
    })
}

fn is_star(field: &str) -> bool {
    field.starts_with('*') || field.starts_with('?')
}

fn parse_field(field: &str, fs: &FieldSpec, spec: &str) -> Result<u64> {
    let mut bits = 0u64;
    for part in field.split(',') {
        bits |= parse_range(part, fs, spec)?;
    }
    Ok(bits)
}

/// Parse one `*`, `n`, `a-b`, with an optional `/step`.
fn parse_range(part: &str, fs: &FieldSpec, spec: &str) -> Result<u64> {
    let invalid = |reason: String| {
        FeedmailError::invalid_argument(format!(
            "invalid cron spec {spec:?}: {} field {part:?}: {reason}",
            fs.name
        ))
    };

    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| invalid(format!("bad step {step:?}")))?;
            if step == 0 {
                return Err(invalid("step must be positive".to_string()));
            }
            (range, Some(step))
        }
        None => (part, None),
    };

    let value = |s: &str| parse_value(s, fs).ok_or_else(|| invalid(format!("bad value {s:?}")));

    let (start, end) = if range == "*" || range == "?" {
        (fs.min, fs.max)
    } else if let Some((lo, hi)) = range.split_once('-') {
        (value(lo)?, value(hi)?)
    } else {
        let value = value(range)?;
        // `n/step` runs from n to the end of the field.
        if step.is_some() {
            (value, fs.max)
        } else {
            (value, value)
        }
    };

    if start < fs.min || end > fs.max {
        return Err(invalid(format!("out of range {}-{}", fs.min, fs.max)));
    }
    if start > end {
        return Err(invalid(format!("{start} is after {end}")));
    }

    let step = step.unwrap_or(1);
    let mut bits = 0u64;
    let mut value = start;
    while value <= end {
        bits |= 1u64 << value;
        value += step;
    }
    Ok(bits)
}

fn parse_value(s: &str, fs: &FieldSpec) -> Option<u32> {
    if let Ok(n) = s.parse::<u32>() {
        return Some(n);
    }
    let lower = s.to_ascii_lowercase();
    fs.names
        .iter()
        .position(|name| *name == lower)
        .map(|i| i as u32 + fs.min)
}
