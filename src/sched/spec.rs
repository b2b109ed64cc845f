//! # Cron entry grammar.
//!
//! Persisted crontab text is a semicolon-separated list of
//! `<time-or-tag>!<action>` entries:
//!
//! ```text
//! WD:H:M:S!system heartbeat;  *:12:30:0!led toggle;  1-4:8:0:0!oled clock
//! sunrise!led on;             sunset-30!led off
//! ```
//!
//! - `WD` is a weekday (0=Monday..6=Sunday), `*`, or an inclusive range
//!   `a-b` that may wrap across the week end (`5-1` covers {5,6,0,1});
//! - `H:M:S` are exact integers or `*`;
//! - `sunrise` / `sunset` tags take an optional signed minute offset
//!   (`sunrise+30`, `sunset-15`) and leave the weekday wildcarded.

use std::fmt;

use crate::error::ExecError;

/// Weekday field of a time spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeekdayField {
    /// Every weekday.
    Any,
    /// One weekday, 0=Monday..6=Sunday.
    Exact(u8),
    /// Inclusive range, wrapping across the week when `start > end`.
    Range(u8, u8),
}

impl WeekdayField {
    /// True if `weekday` (0..=6) falls in this field.
    pub fn matches(&self, weekday: u8) -> bool {
        match *self {
            WeekdayField::Any => true,
            WeekdayField::Exact(day) => day == weekday,
            WeekdayField::Range(start, end) => {
                if start <= end {
                    (start..=end).contains(&weekday)
                } else {
                    weekday >= start || weekday <= end
                }
            }
        }
    }
}

impl fmt::Display for WeekdayField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeekdayField::Any => write!(f, "*"),
            WeekdayField::Exact(d) => write!(f, "{d}"),
            WeekdayField::Range(a, b) => write!(f, "{a}-{b}"),
        }
    }
}

/// Hour/minute/second field of a time spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeField {
    /// Follow the current time component.
    Any,
    /// Exact value.
    Exact(u32),
}

/// Named solar time reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolarTag {
    /// Today's sunrise.
    Sunrise,
    /// Today's sunset.
    Sunset,
}

impl fmt::Display for SolarTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolarTag::Sunrise => write!(f, "sunrise"),
            SolarTag::Sunset => write!(f, "sunset"),
        }
    }
}

/// When one cron entry is due.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CronWhen {
    /// Literal clock time spec.
    Clock {
        /// Weekday field.
        weekday: WeekdayField,
        /// Hour field (0..=23).
        hour: TimeField,
        /// Minute field (0..=59).
        minute: TimeField,
        /// Second field (0..=59).
        second: TimeField,
    },
    /// Solar tag with a signed minute offset, weekday wildcarded.
    Solar {
        /// Which solar reference.
        tag: SolarTag,
        /// Signed offset in minutes, applied with midnight wrap.
        offset_min: i32,
    },
}

/// One parsed user crontab entry.
#[derive(Clone, Debug, PartialEq)]
pub struct CronRule {
    /// Time spec or solar tag.
    pub when: CronWhen,
    /// Command pipe fired on match.
    pub action: String,
}

/// Parses a `<time-or-tag>` spec.
pub fn parse_when(raw: &str) -> Result<CronWhen, ExecError> {
    let raw = raw.trim();
    for tag in [SolarTag::Sunrise, SolarTag::Sunset] {
        let name = tag.to_string();
        if let Some(rest) = raw.strip_prefix(name.as_str()) {
            let rest = rest.trim();
            let offset_min = if rest.is_empty() {
                0
            } else {
                rest.parse::<i32>().map_err(|_| {
                    ExecError::Parse(format!("bad solar offset '{rest}' in '{raw}'"))
                })?
            };
            return Ok(CronWhen::Solar { tag, offset_min });
        }
    }

    let fields: Vec<&str> = raw.split(':').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(ExecError::Parse(format!(
            "expected WD:H:M:S or solar tag, got '{raw}'"
        )));
    }
    Ok(CronWhen::Clock {
        weekday: parse_weekday(fields[0])?,
        hour: parse_time_field(fields[1], 23, "hour")?,
        minute: parse_time_field(fields[2], 59, "minute")?,
        second: parse_time_field(fields[3], 59, "second")?,
    })
}

fn parse_weekday(field: &str) -> Result<WeekdayField, ExecError> {
    if field == "*" {
        return Ok(WeekdayField::Any);
    }
    if let Some((start, end)) = field.split_once('-') {
        let start = parse_bounded(start, 6, "weekday")?;
        let end = parse_bounded(end, 6, "weekday")?;
        return Ok(WeekdayField::Range(start as u8, end as u8));
    }
    Ok(WeekdayField::Exact(parse_bounded(field, 6, "weekday")? as u8))
}

fn parse_time_field(field: &str, max: u32, what: &str) -> Result<TimeField, ExecError> {
    if field == "*" {
        return Ok(TimeField::Any);
    }
    Ok(TimeField::Exact(parse_bounded(field, max, what)?))
}

fn parse_bounded(field: &str, max: u32, what: &str) -> Result<u32, ExecError> {
    let value: u32 = field
        .trim()
        .parse()
        .map_err(|_| ExecError::Parse(format!("bad {what} '{field}'")))?;
    if value > max {
        return Err(ExecError::Parse(format!("{what} {value} out of range")));
    }
    Ok(value)
}

/// Parses a full crontab string into rules.
///
/// Malformed entries are reported back individually; valid ones still load,
/// so one typo does not disarm the whole schedule.
pub fn parse_crontab(raw: &str) -> (Vec<CronRule>, Vec<ExecError>) {
    let mut rules = Vec::new();
    let mut errors = Vec::new();
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("n/a") {
        return (rules, errors);
    }
    for entry in raw.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once('!') {
            Some((when, action)) if !action.trim().is_empty() => match parse_when(when) {
                Ok(when) => rules.push(CronRule {
                    when,
                    action: action.trim().to_string(),
                }),
                Err(e) => errors.push(e),
            },
            _ => errors.push(ExecError::Parse(format!(
                "expected '<time>!<action>', got '{entry}'"
            ))),
        }
    }
    (rules, errors)
}
