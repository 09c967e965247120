//! Cadence expressions for recurring check jobs.
//!
//! Accepted forms:
//! - presets: `hourly`, `daily`, `weekly`, `monthly` (optionally prefixed with `@`)
//! - `every N minutes` / `every N hours`
//! - `daily at HH:MM`
//! - `weekly on <weekday>[,<weekday>...] at HH:MM` (only the first weekday is used)
//! - five-field cron subset: `M H * * *`, `M H * * D`, `*/N * * * *`, `M */N * * *`
//!
//! [`Cadence::parse`] never fails: anything it cannot read becomes `hourly`, with a
//! warning. Use [`Cadence::try_parse`] to validate input up front.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::{Error, Result};

const HOURLY: &str = "0 0 * * * *";

/// Longest accepted interval (one year).
pub const MAX_INTERVAL: Duration = Duration::from_secs(366 * 24 * 3600);

/// How a cadence computes its next firing.
#[derive(Debug, Clone)]
pub enum CadenceKind {
    /// Fixed period measured from the previous firing.
    Interval(Duration),
    /// Wall-clock schedule (seconds-resolution cron, UTC).
    Cron(cron::Schedule),
}

/// A parsed cadence expression.
#[derive(Debug, Clone)]
pub struct Cadence {
    expression: String,
    kind: CadenceKind,
    fell_back: bool,
}

impl Cadence {
    /// Fixed interval cadence, used for the default job.
    ///
    /// Intervals longer than [`MAX_INTERVAL`] fall back to hourly.
    pub fn every_minutes(minutes: u64) -> Self {
        let minutes = minutes.max(1);
        let expression = format!("every {} minutes", minutes);
        match minutes.checked_mul(60).map(Duration::from_secs) {
            Some(period) if period <= MAX_INTERVAL => Self {
                expression,
                kind: CadenceKind::Interval(period),
                fell_back: false,
            },
            _ => {
                warn!(minutes, "Interval too long, falling back to hourly");
                Self {
                    expression,
                    kind: CadenceKind::Interval(Duration::from_secs(3600)),
                    fell_back: true,
                }
            }
        }
    }

    /// Parse an expression, degrading to hourly when it is not understood.
    pub fn parse(expression: &str) -> Self {
        match Self::try_parse(expression) {
            Ok(cadence) => cadence,
            Err(e) => {
                warn!(expression = %expression, error = %e, "Unparseable cadence, falling back to hourly");
                Self {
                    expression: expression.trim().to_string(),
                    kind: CadenceKind::Cron(hourly_schedule()),
                    fell_back: true,
                }
            }
        }
    }

    /// Parse an expression strictly.
    pub fn try_parse(expression: &str) -> Result<Self> {
        let normalized = expression.trim().to_ascii_lowercase();
        let normalized = normalized.trim_start_matches('@');
        if normalized.is_empty() {
            return Err(Error::validation("empty cadence expression"));
        }

        if let Some(rest) = normalized.strip_prefix("every ") {
            let interval = parse_every(rest)?;
            return Ok(Self {
                expression: expression.trim().to_string(),
                kind: CadenceKind::Interval(interval),
                fell_back: false,
            });
        }

        let cron_expr = match normalized {
            "hourly" => HOURLY.to_string(),
            "daily" => "0 0 0 * * *".to_string(),
            "weekly" => "0 0 0 * * Sun".to_string(),
            "monthly" => "0 0 0 1 * *".to_string(),
            other => {
                if let Some(rest) = other.strip_prefix("daily at ") {
                    let (hour, minute) = parse_hh_mm(rest)?;
                    format!("0 {} {} * * *", minute, hour)
                } else if let Some(rest) = other.strip_prefix("weekly on ") {
                    parse_weekly(rest)?
                } else {
                    parse_five_field(other)?
                }
            }
        };

        let schedule = cron::Schedule::from_str(&cron_expr)
            .map_err(|e| Error::validation(format!("invalid cadence '{}': {}", expression, e)))?;

        Ok(Self {
            expression: expression.trim().to_string(),
            kind: CadenceKind::Cron(schedule),
            fell_back: false,
        })
    }

    /// The original expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn kind(&self) -> &CadenceKind {
        &self.kind
    }

    /// Whether parsing failed and the hourly default is in use.
    pub fn fell_back(&self) -> bool {
        self.fell_back
    }

    /// The next firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            CadenceKind::Interval(period) => {
                chrono::Duration::from_std(*period)
                    .ok()
                    .and_then(|d| after.checked_add_signed(d))
            }
            CadenceKind::Cron(schedule) => schedule.after(&after).next(),
        }
    }

    /// Interval period, if this is an interval cadence.
    pub fn interval(&self) -> Option<Duration> {
        match &self.kind {
            CadenceKind::Interval(period) => Some(*period),
            CadenceKind::Cron(_) => None,
        }
    }

    pub fn summary(&self) -> CadenceSummary {
        CadenceSummary {
            expression: self.expression.clone(),
            fell_back: self.fell_back,
        }
    }
}

/// Serializable view of a cadence for status reports.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CadenceSummary {
    pub expression: String,
    pub fell_back: bool,
}

fn hourly_schedule() -> cron::Schedule {
    cron::Schedule::from_str(HOURLY).expect("hourly cron expression is valid")
}

fn parse_every(rest: &str) -> Result<Duration> {
    let mut parts = rest.split_whitespace();
    let (Some(count), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::validation(format!("invalid interval '{}'", rest)));
    };
    let count: u64 = count
        .parse()
        .map_err(|_| Error::validation(format!("invalid interval count '{}'", count)))?;
    if count == 0 {
        return Err(Error::validation("interval must be positive"));
    }
    let unit_secs: u64 = match unit {
        "minute" | "minutes" | "min" | "mins" => 60,
        "hour" | "hours" => 3600,
        other => return Err(Error::validation(format!("unknown interval unit '{}'", other))),
    };
    count
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .filter(|period| *period <= MAX_INTERVAL)
        .ok_or_else(|| Error::validation(format!("interval too long '{}'", rest)))
}

fn parse_hh_mm(value: &str) -> Result<(u32, u32)> {
    let (h, m) = value
        .trim()
        .split_once(':')
        .ok_or_else(|| Error::validation(format!("expected HH:MM, got '{}'", value)))?;
    let hour: u32 = h
        .parse()
        .map_err(|_| Error::validation(format!("invalid hour '{}'", h)))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| Error::validation(format!("invalid minute '{}'", m)))?;
    if hour > 23 || minute > 59 {
        return Err(Error::validation(format!("time out of range '{}'", value)));
    }
    Ok((hour, minute))
}

fn parse_weekday(value: &str) -> Result<&'static str> {
    let day = match value.trim() {
        "0" | "7" | "sun" | "sunday" => "Sun",
        "1" | "mon" | "monday" => "Mon",
        "2" | "tue" | "tues" | "tuesday" => "Tue",
        "3" | "wed" | "wednesday" => "Wed",
        "4" | "thu" | "thur" | "thurs" | "thursday" => "Thu",
        "5" | "fri" | "friday" => "Fri",
        "6" | "sat" | "saturday" => "Sat",
        other => return Err(Error::validation(format!("invalid weekday '{}'", other))),
    };
    Ok(day)
}

/// `<days> at HH:MM`; multiple days collapse to the first one.
fn parse_weekly(rest: &str) -> Result<String> {
    let (days, time) = rest
        .split_once(" at ")
        .ok_or_else(|| Error::validation(format!("expected '<weekday> at HH:MM', got '{}'", rest)))?;
    let mut listed = days.split(',').map(str::trim).filter(|d| !d.is_empty());
    let first = listed
        .next()
        .ok_or_else(|| Error::validation("weekly cadence without a weekday"))?;
    let day = parse_weekday(first)?;
    let ignored: Vec<&str> = listed.collect();
    if !ignored.is_empty() {
        warn!(
            first = %first,
            ignored = ?ignored,
            "Weekly cadence lists several weekdays; only the first is scheduled"
        );
    }
    let (hour, minute) = parse_hh_mm(time)?;
    Ok(format!("0 {} {} * * {}", minute, hour, day))
}

fn parse_step(field: &str, max: u32) -> Result<u32> {
    let step: u32 = field
        .strip_prefix("*/")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::validation(format!("invalid step '{}'", field)))?;
    if step == 0 || step > max {
        return Err(Error::validation(format!("step out of range '{}'", field)));
    }
    Ok(step)
}

fn parse_bounded(field: &str, max: u32, what: &str) -> Result<u32> {
    let value: u32 = field
        .parse()
        .map_err(|_| Error::validation(format!("invalid {} '{}'", what, field)))?;
    if value > max {
        return Err(Error::validation(format!("{} out of range '{}'", what, field)));
    }
    Ok(value)
}

/// Translate the supported five-field subset into a six-field (seconds-first) expression.
fn parse_five_field(expr: &str) -> Result<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = fields.as_slice() else {
        return Err(Error::validation(format!("unsupported cadence '{}'", expr)));
    };
    if *dom != "*" || *month != "*" {
        return Err(Error::validation(format!(
            "day-of-month and month must be '*' in '{}'",
            expr
        )));
    }

    // */N * * * *
    if minute.starts_with("*/") {
        if *hour != "*" || *dow != "*" {
            return Err(Error::validation(format!("unsupported minute step '{}'", expr)));
        }
        let step = parse_step(minute, 59)?;
        return Ok(format!("0 0/{} * * * *", step));
    }

    let minute = parse_bounded(minute, 59, "minute")?;

    // M */N * * *
    if hour.starts_with("*/") {
        if *dow != "*" {
            return Err(Error::validation(format!("unsupported hour step '{}'", expr)));
        }
        let step = parse_step(hour, 23)?;
        return Ok(format!("0 {} 0/{} * * *", minute, step));
    }

    let hour = parse_bounded(hour, 23, "hour")?;
    if *dow == "*" {
        Ok(format!("0 {} {} * * *", minute, hour))
    } else {
        let day = parse_weekday(dow)?;
        Ok(format!("0 {} {} * * {}", minute, hour, day))
    }
}
