use std::str::FromStr;

use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};

use crate::types::error::BackupError;
use crate::types::{Schedule, ScheduleType};

const CRON_FIELDS: usize = 5;
const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// When a schedule fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Every N minutes from the previous fire.
    Interval(u64),
    Cron(Box<cron::Schedule>),
}

impl Trigger {
    pub fn from_schedule(schedule: &Schedule) -> Result<Self, BackupError> {
        match schedule.schedule_type {
            ScheduleType::Interval => Ok(Trigger::Interval(schedule.interval_minutes()?)),
            ScheduleType::Cron => parse_cron_expression(&schedule.interval)
                .map(|cron| Trigger::Cron(Box::new(cron)))
                .map_err(BackupError::InvalidSchedule),
        }
    }

    pub fn next_fire_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Trigger::Interval(minutes) => i64::try_from(*minutes)
                .ok()
                .and_then(TimeDelta::try_minutes)
                .and_then(|delta| after.clone().checked_add_signed(delta)),
            Trigger::Cron(schedule) => schedule.after(after).next(),
        }
    }

    /// Next fire time from now, evaluated in the local timezone.
    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_after(&Local::now())
            .map(|next| next.with_timezone(&Utc))
    }
}

/// Parses a standard 5-field cron expression (`minute hour day month weekday`).
///
/// Weekdays accept `0-7` with both `0` and `7` meaning Sunday, or day names.
pub fn parse_cron_expression(expression: &str) -> Result<cron::Schedule, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != CRON_FIELDS {
        return Err(format!(
            "cron expression must have {CRON_FIELDS} fields: {expression}"
        ));
    }

    let day_of_week = convert_day_of_week(fields[4])?;
    let normalized = format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    );

    cron::Schedule::from_str(&normalized)
        .map_err(|e| format!("invalid cron expression {expression}: {e}"))
}

fn convert_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let parts = field
        .split(',')
        .map(convert_day_of_week_part)
        .collect::<Result<Vec<String>, String>>()?;
    Ok(parts.join(","))
}

fn convert_day_of_week_part(part: &str) -> Result<String, String> {
    if part.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(part.to_ascii_uppercase());
    }

    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (
            range,
            step.parse::<u32>()
                .ok()
                .filter(|step| *step > 0)
                .ok_or_else(|| format!("invalid day of week step: {part}"))?,
        ),
        None => (part, 1),
    };

    let (start, end) = if range == "*" {
        (0, 6)
    } else if let Some((start, end)) = range.split_once('-') {
        (parse_day_number(start)?, parse_day_number(end)?)
    } else {
        let day = parse_day_number(range)?;
        (day, if part.contains('/') { 6 } else { day })
    };

    if start > end {
        return Err(format!("invalid day of week range: {part}"));
    }

    let mut days: Vec<u32> = (start..=end)
        .step_by(step as usize)
        .map(|day| day % 7)
        .collect();
    days.sort_unstable();
    days.dedup();

    Ok(days
        .iter()
        .map(|day| DAY_NAMES[*day as usize])
        .collect::<Vec<&str>>()
        .join(","))
}

fn parse_day_number(value: &str) -> Result<u32, String> {
    value
        .parse::<u32>()
        .ok()
        .filter(|day| *day <= 7)
        .ok_or_else(|| format!("invalid day of week: {value}"))
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike, Weekday};

    use super::*;

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn interval_trigger() {
        init_dummy_tracing_subscriber();

        let schedule = Schedule::new("s", ScheduleType::Interval, "15", "alice");
        let trigger = Trigger::from_schedule(&schedule).unwrap();

        let now = at(2026, 3, 10, 12, 0);
        assert_eq!(trigger.next_fire_after(&now), Some(at(2026, 3, 10, 12, 15)));

        let next = trigger.next_fire_time().unwrap();
        let expected = Utc::now() + TimeDelta::minutes(15);
        assert!((next - expected).num_seconds().abs() <= 5);
    }

    #[test]
    fn cron_trigger_next_occurrence() {
        init_dummy_tracing_subscriber();

        let schedule = Schedule::new("s", ScheduleType::Cron, "0 2 * * *", "alice");
        let trigger = Trigger::from_schedule(&schedule).unwrap();

        assert_eq!(
            trigger.next_fire_after(&at(2026, 3, 10, 12, 0)),
            Some(at(2026, 3, 11, 2, 0))
        );
        assert_eq!(
            trigger.next_fire_after(&at(2026, 3, 10, 1, 30)),
            Some(at(2026, 3, 10, 2, 0))
        );

        let next = trigger.next_fire_time().unwrap().with_timezone(&Local);
        assert_eq!((next.hour(), next.minute()), (2, 0));
        assert!(next > Local::now());
    }

    #[test]
    fn cron_numeric_weekdays() {
        init_dummy_tracing_subscriber();

        // 2026-03-14 is a Saturday.
        let saturday = at(2026, 3, 14, 12, 0);

        let weekdays = parse_cron_expression("0 9 * * 1-5").unwrap();
        let next = weekdays.after(&saturday).next().unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next, at(2026, 3, 16, 9, 0));

        for sunday in ["0", "7"] {
            let cron = parse_cron_expression(&format!("30 3 * * {sunday}")).unwrap();
            assert_eq!(cron.after(&saturday).next(), Some(at(2026, 3, 15, 3, 30)));
        }

        let weekend = parse_cron_expression("0 0 * * 5-7").unwrap();
        let fires: Vec<Weekday> = weekend
            .after(&saturday)
            .take(3)
            .map(|next| next.weekday())
            .collect();
        assert_eq!(fires, vec![Weekday::Sun, Weekday::Fri, Weekday::Sat]);

        parse_cron_expression("0 0 * * MON-FRI").unwrap();
        parse_cron_expression("0 0 * * 1,3,5").unwrap();
        parse_cron_expression("0 0 * * */2").unwrap();
    }

    #[test]
    fn day_of_week_conversion() {
        init_dummy_tracing_subscriber();

        assert_eq!(convert_day_of_week("*").unwrap(), "*");
        assert_eq!(convert_day_of_week("0").unwrap(), "SUN");
        assert_eq!(convert_day_of_week("7").unwrap(), "SUN");
        assert_eq!(convert_day_of_week("1-3").unwrap(), "MON,TUE,WED");
        assert_eq!(convert_day_of_week("6-7").unwrap(), "SUN,SAT");
        assert_eq!(convert_day_of_week("*/3").unwrap(), "SUN,WED,SAT");
        assert_eq!(convert_day_of_week("1,5").unwrap(), "MON,FRI");
        assert_eq!(convert_day_of_week("mon-fri").unwrap(), "MON-FRI");

        assert!(convert_day_of_week("8").is_err());
        assert!(convert_day_of_week("5-2").is_err());
        assert!(convert_day_of_week("*/0").is_err());
    }

    #[test]
    fn invalid_cron_expressions() {
        init_dummy_tracing_subscriber();

        assert!(parse_cron_expression("0 2 * *").is_err());
        assert!(parse_cron_expression("0 0 2 * * *").is_err());
        assert!(parse_cron_expression("61 2 * * *").is_err());
        assert!(parse_cron_expression("0 25 * * *").is_err());
        assert!(parse_cron_expression("").is_err());

        let schedule = Schedule::new("s", ScheduleType::Cron, "bad", "alice");
        assert!(matches!(
            Trigger::from_schedule(&schedule),
            Err(BackupError::InvalidSchedule(_))
        ));
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
