//! Cron expression evaluation in a fixed timezone.
//!
//! Standard crontab syntax (`minute hour day-of-month month day-of-week`) is
//! accepted, with an optional leading seconds field. Day-of-week follows the
//! crontab convention (0 and 7 are Sunday) and is rewritten to day names before
//! being handed to the `cron` crate, which numbers days from 1.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::collections::BTreeSet;
use std::str::FromStr;
use crate::application::errors::CronError;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Parses expressions against the process-wide timezone
#[derive(Debug, Clone, Copy)]
pub struct CronEvaluator {
    tz: Tz,
}

impl CronEvaluator {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn from_name(tz_name: &str) -> Result<Self, CronError> {
        let tz = Tz::from_str(tz_name).map_err(|_| CronError::InvalidTimezone(tz_name.to_string()))?;
        Ok(Self::new(tz))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn parse(&self, expr: &str) -> Result<CronSchedule, CronError> {
        let normalized = normalize_expression(expr)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| CronError::InvalidExpression {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;
        Ok(CronSchedule {
            expr: expr.trim().to_string(),
            schedule,
            tz: self.tz,
        })
    }

    /// Next firing instant strictly after `after`.
    pub fn next_after(&self, expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        self.parse(expr)?
            .next_after(after)
            .ok_or_else(|| CronError::NoOccurrence(expr.to_string()))
    }
}

/// A parsed expression bound to a timezone
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: Schedule,
    tz: Tz,
}

impl CronSchedule {
    pub fn expression(&self) -> &str {
        &self.expr
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.tz);
        self.schedule
            .after(&local)
            .map(|t| t.with_timezone(&Utc))
            .find(|t| *t > after)
    }
}

fn normalize_expression(expr: &str) -> Result<String, CronError> {
    let invalid = |reason: String| CronError::InvalidExpression {
        expr: expr.to_string(),
        reason,
    };

    let fields: Vec<&str> = expr.split_whitespace().collect();
    let (seconds, rest) = match fields.len() {
        5 => ("0", &fields[..]),
        6 => (fields[0], &fields[1..]),
        n => return Err(invalid(format!("expected 5 fields, got {}", n))),
    };

    let dow = normalize_day_of_week(rest[4]).map_err(invalid)?;
    Ok(format!("{} {} {} {} {} {}", seconds, rest[0], rest[1], rest[2], rest[3], dow))
}

fn normalize_day_of_week(field: &str) -> Result<String, String> {
    let mut items = Vec::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s.parse().map_err(|_| format!("invalid step '{}'", s))?;
                if step == 0 {
                    return Err("step must be > 0".to_string());
                }
                (r, Some(step))
            }
            None => (item, None),
        };

        if range == "?" || (range == "*" && step.is_none()) {
            items.push(range.to_string());
            continue;
        }
        if range != "*" && !range.chars().any(|c| c.is_ascii_digit()) {
            items.push(item.to_string());
            continue;
        }

        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_day(a)?, parse_day(b)?)
        } else {
            let a = parse_day(range)?;
            (a, if step.is_some() { 6 } else { a })
        };
        if start > end {
            return Err(format!("day-of-week range {}-{} is reversed", start, end));
        }

        let days: BTreeSet<usize> = (start..=end)
            .step_by(step.unwrap_or(1) as usize)
            .map(|d| (d % 7) as usize)
            .collect();
        items.extend(days.into_iter().map(|d| DAY_NAMES[d].to_string()));
    }

    Ok(items.join(","))
}

fn parse_day(s: &str) -> Result<u32, String> {
    let day: u32 = s.parse().map_err(|_| format!("invalid day-of-week '{}'", s))?;
    if day > 7 {
        return Err(format!("day-of-week {} out of range", day));
    }
    Ok(day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lagos() -> CronEvaluator {
        CronEvaluator::from_name("Africa/Lagos").unwrap()
    }

    #[test]
    fn test_every_minute_fires_on_next_minute_boundary() {
        let from = Utc.with_ymd_and_hms(2026, 2, 16, 12, 0, 30).unwrap();
        let next = lagos().next_after("* * * * *", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 16, 12, 1, 0).unwrap());
    }

    #[test]
    fn test_next_is_strictly_after_reference() {
        let from = Utc.with_ymd_and_hms(2026, 2, 16, 12, 1, 0).unwrap();
        let next = lagos().next_after("* * * * *", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 16, 12, 2, 0).unwrap());
    }

    #[test]
    fn test_evaluates_in_configured_timezone() {
        // 2026-02-16 is a Monday; Lagos is UTC+1 year-round
        let from = Utc.with_ymd_and_hms(2026, 2, 16, 0, 0, 0).unwrap();
        let next = lagos().next_after("0 9 * * 1", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 16, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_crontab_sunday_numbering() {
        let from = Utc.with_ymd_and_hms(2026, 2, 16, 0, 0, 0).unwrap();
        let sunday = Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 0).unwrap();
        assert_eq!(lagos().next_after("0 9 * * 0", from).unwrap(), sunday);
        assert_eq!(lagos().next_after("0 9 * * 7", from).unwrap(), sunday);
    }

    #[test]
    fn test_day_of_week_normalization() {
        assert_eq!(normalize_day_of_week("*").unwrap(), "*");
        assert_eq!(normalize_day_of_week("1-5").unwrap(), "MON,TUE,WED,THU,FRI");
        assert_eq!(normalize_day_of_week("*/2").unwrap(), "SUN,TUE,THU,SAT");
        assert_eq!(normalize_day_of_week("MON-FRI").unwrap(), "MON-FRI");
        assert_eq!(normalize_day_of_week("5-7").unwrap(), "SUN,FRI,SAT");
        assert!(normalize_day_of_week("8").is_err());
        assert!(normalize_day_of_week("5-2").is_err());
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        let eval = lagos();
        assert!(matches!(eval.parse("* * *"), Err(CronError::InvalidExpression { .. })));
        assert!(matches!(eval.parse("61 * * * *"), Err(CronError::InvalidExpression { .. })));
        assert!(matches!(eval.parse("every minute"), Err(CronError::InvalidExpression { .. })));
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        assert!(matches!(
            CronEvaluator::from_name("Atlantis/Capital"),
            Err(CronError::InvalidTimezone(_))
        ));
    }
}
