// Cron Expressions
// Classical five-field cron: minute, hour, day-of-month, month, day-of-week.
// Match granularity is one minute. When both day fields are restricted a
// matching instant may satisfy either one (union semantics).

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use gatehouse_core::{GatehouseError, Result};

/// Safety bound for `next`: a valid expression always matches within this
/// window, so anything longer is a logic error, not a search problem.
const MAX_SEARCH_DAYS: i64 = 366 * 4;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    values: BTreeSet<u8>,
    /// False iff the field was a bare `*`.
    restricted: bool,
}

impl CronField {
    fn contains(&self, value: u8) -> bool {
        self.values.contains(&value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    text: String,
    minutes: CronField,
    hours: CronField,
    days_of_month: CronField,
    months: CronField,
    days_of_week: CronField,
}

impl CronExpr {
    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(GatehouseError::Parse(format!(
                "cron expression must have 5 fields, got {}: {text:?}",
                fields.len()
            )));
        }
        Ok(Self {
            text: text.trim().to_string(),
            minutes: parse_field(fields[0], 0, 59, false)?,
            hours: parse_field(fields[1], 0, 23, false)?,
            days_of_month: parse_field(fields[2], 1, 31, false)?,
            months: parse_field(fields[3], 1, 12, false)?,
            days_of_week: parse_field(fields[4], 0, 7, true)?,
        })
    }

    /// Whether the minute containing `instant` matches. Seconds are ignored.
    pub fn matches(&self, instant: DateTime<Utc>) -> bool {
        self.minutes.contains(instant.minute() as u8)
            && self.hours.contains(instant.hour() as u8)
            && self.months.contains(instant.month() as u8)
            && self.day_matches(instant)
    }

    /// The smallest minute-aligned instant strictly greater than `after`
    /// that matches. Walks minute-by-minute with field-level fast-forward.
    pub fn next(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut t = truncate_to_minute(after) + Duration::minutes(1);
        let limit = after + Duration::days(MAX_SEARCH_DAYS);
        while t <= limit {
            if !self.months.contains(t.month() as u8) {
                t = start_of_next_month(t);
                continue;
            }
            if !self.day_matches(t) {
                t = start_of_next_day(t);
                continue;
            }
            if !self.hours.contains(t.hour() as u8) {
                t = start_of_next_hour(t);
                continue;
            }
            if !self.minutes.contains(t.minute() as u8) {
                t += Duration::minutes(1);
                continue;
            }
            return Ok(t);
        }
        Err(GatehouseError::Parse(format!(
            "cron expression {:?} has no matching instant within four years",
            self.text
        )))
    }

    fn day_matches(&self, instant: DateTime<Utc>) -> bool {
        let dom = self.days_of_month.contains(instant.day() as u8);
        let dow = self
            .days_of_week
            .contains(instant.weekday().num_days_from_sunday() as u8);
        match (self.days_of_month.restricted, self.days_of_week.restricted) {
            // Both restricted: union, the way classical cron resolves it.
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn parse_field(raw: &str, min: u8, max: u8, is_dow: bool) -> Result<CronField> {
    let mut values = BTreeSet::new();
    let mut restricted = false;
    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u8 = step
                    .parse()
                    .map_err(|_| bad_field(raw, "invalid step value"))?;
                if step == 0 {
                    return Err(bad_field(raw, "step must be positive"));
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else {
            restricted = true;
            match range.split_once('-') {
                Some((a, b)) => {
                    let lo = parse_bound(a, raw)?;
                    let hi = parse_bound(b, raw)?;
                    if lo > hi {
                        return Err(bad_field(raw, "range start exceeds range end"));
                    }
                    (lo, hi)
                }
                None => {
                    let value = parse_bound(range, raw)?;
                    (value, value)
                }
            }
        };
        if lo < min || hi > max {
            return Err(bad_field(raw, "value out of range"));
        }

        let mut v = lo;
        while v <= hi {
            // Day-of-week 7 is an alias for Sunday.
            let normalized = if is_dow && v == 7 { 0 } else { v };
            values.insert(normalized);
            v = match v.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
    }
    Ok(CronField { values, restricted })
}

fn parse_bound(raw: &str, field: &str) -> Result<u8> {
    raw.parse()
        .map_err(|_| bad_field(field, "invalid numeric value"))
}

fn bad_field(field: &str, reason: &str) -> GatehouseError {
    GatehouseError::Parse(format!("invalid cron field {field:?}: {reason}"))
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), t.hour(), t.minute(), 0)
        .single()
        .unwrap_or(t)
}

fn at_hour_start(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn start_of_next_month(t: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    at_hour_start(year, month, 1, 0)
}

fn start_of_next_day(t: DateTime<Utc>) -> DateTime<Utc> {
    let next = t.date_naive() + chrono::Days::new(1);
    at_hour_start(next.year(), next.month(), next.day(), 0)
}

fn start_of_next_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    at_hour_start(t.year(), t.month(), t.day(), t.hour()) + Duration::hours(1)
}
