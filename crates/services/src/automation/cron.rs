//! 5-field cron schedules, evaluated in UTC.
//!
//! Supported per field: `*`, single values, ranges `a-b`, steps `*/n` and
//! `a-b/n`, and comma lists. Day-of-month and day-of-week follow the
//! classic rule: when both are restricted, a day matching either fires.

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("malformed field `{0}`")]
    Malformed(String),

    #[error("value {value} outside {min}..={max} in field `{field}`")]
    OutOfRange { field: String, value: u32, min: u32, max: u32 },
}

/// Parsed schedule. Sets are bitmasks over the field's domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl Schedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        Ok(Self {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)? as u32,
            days_of_month: parse_field(fields[2], 1, 31)? as u32,
            months: parse_field(fields[3], 1, 12)? as u16,
            // 7 is accepted as an alias for Sunday.
            days_of_week: fold_sunday(parse_field(fields[4], 0, 7)?),
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    /// First fire time strictly after `after`, or `None` when no day
    /// matches within a four-year horizon (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut at = (after + Duration::minutes(1))
            .duration_trunc(Duration::minutes(1))
            .expect("minute truncation cannot fail");
        let horizon = after + Duration::days(4 * 366);

        while at <= horizon {
            if !self.month_matches(at) || !self.day_matches(at) {
                at = (at + Duration::days(1))
                    .duration_trunc(Duration::days(1))
                    .expect("day truncation cannot fail");
                continue;
            }
            if self.hours & (1 << at.hour()) == 0 {
                at = (at + Duration::hours(1))
                    .duration_trunc(Duration::hours(1))
                    .expect("hour truncation cannot fail");
                continue;
            }
            if self.minutes & (1 << at.minute()) == 0 {
                at += Duration::minutes(1);
                continue;
            }
            return Some(at);
        }
        None
    }

    fn month_matches(&self, at: DateTime<Utc>) -> bool {
        self.months & (1 << (at.month() - 1)) != 0
    }

    fn day_matches(&self, at: DateTime<Utc>) -> bool {
        let dom = self.days_of_month & (1 << (at.day() - 1)) != 0;
        let dow = self.days_of_week & (1 << at.weekday().num_days_from_sunday()) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

/// Parses one field into a bitmask where bit `n - min` represents value
/// `n`.
fn parse_field(field: &str, min: u32, max: u32) -> Result<u64, CronError> {
    if field.is_empty() {
        return Err(CronError::Malformed(field.to_owned()));
    }

    let mut mask = 0u64;
    for segment in field.split(',') {
        let (range, step) = match segment.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .ok()
                    .filter(|&s| s > 0)
                    .ok_or_else(|| CronError::Malformed(segment.to_owned()))?;
                (range, step)
            }
            None => (segment, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let a = parse_value(a, range, min, max)?;
            let b = parse_value(b, range, min, max)?;
            if a > b {
                return Err(CronError::Malformed(segment.to_owned()));
            }
            (a, b)
        } else {
            let value = parse_value(range, range, min, max)?;
            (value, value)
        };

        let mut value = start;
        while value <= end {
            mask |= 1 << (value - min);
            value += step;
        }
    }
    Ok(mask)
}

fn parse_value(raw: &str, segment: &str, min: u32, max: u32) -> Result<u32, CronError> {
    let value: u32 = raw.parse().map_err(|_| CronError::Malformed(segment.to_owned()))?;
    if value < min || value > max {
        return Err(CronError::OutOfRange { field: segment.to_owned(), value, min, max });
    }
    Ok(value)
}

fn fold_sunday(mask: u64) -> u8 {
    // Bit 7 (the `7` alias) folds onto bit 0 (Sunday).
    ((mask & 0x7f) | (mask >> 7 & 1)) as u8
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn hourly_on_the_hour() {
        let schedule = Schedule::parse("0 * * * *").unwrap();
        assert_eq!(schedule.next_after(at(2024, 3, 1, 10, 15)), Some(at(2024, 3, 1, 11, 0)));
        assert_eq!(schedule.next_after(at(2024, 3, 1, 10, 0)), Some(at(2024, 3, 1, 11, 0)));
    }

    #[test]
    fn every_fifteen_minutes() {
        let schedule = Schedule::parse("*/15 * * * *").unwrap();
        assert_eq!(schedule.next_after(at(2024, 3, 1, 10, 1)), Some(at(2024, 3, 1, 10, 15)));
        assert_eq!(schedule.next_after(at(2024, 3, 1, 10, 45)), Some(at(2024, 3, 1, 11, 0)));
    }

    #[test]
    fn weekly_monday_morning() {
        // 2024-03-01 is a Friday; the next Monday is 03-04.
        let schedule = Schedule::parse("30 2 * * 1").unwrap();
        assert_eq!(schedule.next_after(at(2024, 3, 1, 0, 0)), Some(at(2024, 3, 4, 2, 30)));
    }

    #[test]
    fn sunday_alias_folds() {
        let via_zero = Schedule::parse("0 0 * * 0").unwrap();
        let via_seven = Schedule::parse("0 0 * * 7").unwrap();
        assert_eq!(
            via_zero.next_after(at(2024, 3, 1, 0, 0)),
            via_seven.next_after(at(2024, 3, 1, 0, 0))
        );
    }

    #[test]
    fn dom_and_dow_fire_on_either() {
        // The 15th or any Friday, whichever comes first.
        let schedule = Schedule::parse("0 0 15 * 5").unwrap();
        assert_eq!(schedule.next_after(at(2024, 3, 9, 0, 0)), Some(at(2024, 3, 15, 0, 0)));
        assert_eq!(schedule.next_after(at(2024, 3, 16, 0, 0)), Some(at(2024, 3, 22, 0, 0)));
    }

    #[test]
    fn yearly_new_year() {
        let schedule = Schedule::parse("0 0 1 1 *").unwrap();
        assert_eq!(schedule.next_after(at(2024, 6, 1, 0, 0)), Some(at(2025, 1, 1, 0, 0)));
    }

    #[test]
    fn ranges_and_lists() {
        let schedule = Schedule::parse("0 9-17/4 * * 1,3,5").unwrap();
        // 2024-03-04 is a Monday.
        assert_eq!(schedule.next_after(at(2024, 3, 4, 9, 0)), Some(at(2024, 3, 4, 13, 0)));
        assert_eq!(schedule.next_after(at(2024, 3, 4, 18, 0)), Some(at(2024, 3, 6, 9, 0)));
    }

    #[test]
    fn impossible_dates_return_none() {
        let schedule = Schedule::parse("0 0 30 2 *").unwrap();
        assert_eq!(schedule.next_after(at(2024, 3, 1, 0, 0)), None);
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(matches!(Schedule::parse("0 * * *"), Err(CronError::FieldCount(4))));
        assert!(matches!(Schedule::parse("61 * * * *"), Err(CronError::OutOfRange { .. })));
        assert!(matches!(Schedule::parse("a * * * *"), Err(CronError::Malformed(_))));
        assert!(matches!(Schedule::parse("*/0 * * * *"), Err(CronError::Malformed(_))));
        assert!(matches!(Schedule::parse("5-2 * * * *"), Err(CronError::Malformed(_))));
    }
}
