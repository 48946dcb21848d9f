use crate::scheduler::trigger::parse_cron_expression;

const INVALID_INTERVAL: &str = "interval must be a positive number of minutes.";

pub fn check_interval_minutes(value: &str) -> Result<String, String> {
    match value.trim().parse::<u64>() {
        Ok(minutes) if minutes > 0 => Ok(value.trim().to_string()),
        _ => Err(INVALID_INTERVAL.to_string()),
    }
}

/// 5-field cron expression (minute hour day-of-month month day-of-week).
pub fn check_cron_expression(value: &str) -> Result<String, String> {
    parse_cron_expression(value)?;
    Ok(value.trim().to_string())
}
