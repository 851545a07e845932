//! The standard 5-field cron grammar: minute, hour, day of month, month and day of week.
//!
//! Each field accepts `*`, single values, ranges (`1-5`), steps (`*/15`, `0-30/10`, `5/10`) and
//! comma separated lists of those. Months and week days may also be written as three letter
//! names (`JAN`, `MON`). Day of week runs from 0 (Sunday) to 6, with 7 also meaning Sunday.
//! The shortcuts `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`, `@midnight` and
//! `@hourly` are accepted too.
//!
//! When both the day of month and the day of week are restricted, a day matches if either one
//! matches.

use std::str::FromStr;

use time::{Date, Duration, Month, OffsetDateTime, UtcOffset};

use crate::Error;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// How many years ahead [CronSchedule::next_after] looks before giving up.
const SEARCH_YEARS: i32 = 5;

/// A set of allowed values of one field, bit `n` standing for value `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(&self, value: u8) -> bool {
        self.0 & (1 << value) != 0
    }
}

struct FieldSpec {
    name: &'static str,
    min: u8,
    max: u8,
    names: &'static [&'static str],
    names_start: u8,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    names_start: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    names_start: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day of month",
    min: 1,
    max: 31,
    names: &[],
    names_start: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    names_start: 1,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day of week",
    min: 0,
    max: 7,
    names: &WEEKDAY_NAMES,
    names_start: 0,
};

impl FieldSpec {
    fn value(&self, text: &str) -> Result<u8, String> {
        if let Ok(value) = text.parse::<u8>() {
            if value < self.min || value > self.max {
                return Err(format!(
                    "{} value {value} is outside {}-{}",
                    self.name, self.min, self.max
                ));
            }
            return Ok(value);
        }

        let lower = text.to_ascii_lowercase();
        self.names
            .iter()
            .position(|name| *name == lower)
            .map(|index| index as u8 + self.names_start)
            .ok_or_else(|| format!("invalid {} value \"{text}\"", self.name))
    }

    fn parse(&self, field: &str) -> Result<FieldSet, String> {
        let mut set = 0_u64;

        for part in field.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u8 = step
                        .parse()
                        .ok()
                        .filter(|step| *step > 0)
                        .ok_or_else(|| format!("invalid {} step \"{step}\"", self.name))?;
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if range == "*" {
                (self.min, self.max)
            } else if let Some((start, end)) = range.split_once('-') {
                let start = self.value(start)?;
                let end = self.value(end)?;
                if start > end {
                    return Err(format!("{} range {range} is backwards", self.name));
                }
                (start, end)
            } else {
                let value = self.value(range)?;
                match step {
                    Some(_) => (value, self.max),
                    None => (value, value),
                }
            };

            let step = step.unwrap_or(1);
            let mut value = start;
            while value <= end {
                set |= 1 << value;
                value = match value.checked_add(step) {
                    Some(next) => next,
                    None => break,
                };
            }
        }

        Ok(FieldSet(set))
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
}

impl CronSchedule {
    /// Parse a 5-field expression or one of the `@` shortcuts.
    ///
    /// # Errors
    /// Returns [Error::InvalidCronExpression] describing the first bad field.
    pub fn parse(expression: &str) -> Result<Self, Error> {
        let invalid = |reason: String| Error::InvalidCronExpression {
            expression: expression.to_owned(),
            reason,
        };

        let expanded = match expression.trim() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, day_of_month, month, day_of_week] = fields.as_slice() else {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        };

        let mut days_of_week = DAY_OF_WEEK.parse(day_of_week).map_err(invalid)?;
        if days_of_week.contains(7) {
            days_of_week = FieldSet((days_of_week.0 | 1) & !(1 << 7));
        }

        Ok(Self {
            expression: expression.trim().to_owned(),
            minutes: MINUTE.parse(minute).map_err(invalid)?,
            hours: HOUR.parse(hour).map_err(invalid)?,
            days_of_month: DAY_OF_MONTH.parse(day_of_month).map_err(invalid)?,
            months: MONTH.parse(month).map_err(invalid)?,
            days_of_week,
            day_of_month_restricted: !day_of_month.starts_with('*'),
            day_of_week_restricted: !day_of_week.starts_with('*'),
        })
    }

    /// The expression the schedule was parsed from.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn day_matches(&self, date: Date) -> bool {
        let day_of_month = self.days_of_month.contains(date.day());
        let day_of_week = self
            .days_of_week
            .contains(date.weekday().number_days_from_sunday());

        if self.day_of_month_restricted && self.day_of_week_restricted {
            day_of_month || day_of_week
        } else {
            day_of_month && day_of_week
        }
    }

    /// Whether the schedule fires in the minute containing `timestamp`, read in UTC.
    pub fn matches(&self, timestamp: OffsetDateTime) -> bool {
        let timestamp = timestamp.to_offset(UtcOffset::UTC);

        self.minutes.contains(timestamp.minute())
            && self.hours.contains(timestamp.hour())
            && self.months.contains(u8::from(timestamp.month()))
            && self.day_matches(timestamp.date())
    }

    /// The first minute strictly after `after` at which the schedule fires, in UTC.
    ///
    /// Returns `None` if the schedule does not fire within the next few years, e.g. for
    /// `0 0 30 2 *`.
    pub fn next_after(&self, after: OffsetDateTime) -> Option<OffsetDateTime> {
        let after = after.to_offset(UtcOffset::UTC);
        let mut candidate = after
            .replace_second(0)
            .ok()?
            .replace_nanosecond(0)
            .ok()?
            + Duration::MINUTE;
        let last_year = after.year() + SEARCH_YEARS;

        while candidate.year() <= last_year {
            if !self.months.contains(u8::from(candidate.month())) {
                let (year, month) = match candidate.month() {
                    Month::December => (candidate.year() + 1, Month::January),
                    month => (candidate.year(), month.next()),
                };
                candidate = Date::from_calendar_date(year, month, 1)
                    .ok()?
                    .midnight()
                    .assume_utc();
                continue;
            }

            if !self.day_matches(candidate.date()) {
                candidate = candidate.date().next_day()?.midnight().assume_utc();
                continue;
            }

            if !self.hours.contains(candidate.hour()) {
                candidate = candidate.replace_minute(0).ok()? + Duration::HOUR;
                continue;
            }

            if !self.minutes.contains(candidate.minute()) {
                candidate += Duration::MINUTE;
                continue;
            }

            return Some(candidate);
        }

        None
    }
}

impl FromStr for CronSchedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronSchedule::parse(s)
    }
}

/// Check that `expression` follows the 5-field cron grammar.
///
/// # Errors
/// Returns [Error::InvalidCronExpression] if it does not.
pub fn validate_cron_expression(expression: &str) -> Result<(), Error> {
    CronSchedule::parse(expression).map(|_| ())
}
