use std::fmt;

use chrono::{DateTime, Utc};

use crate::scheduler::trigger::parse_cron_expression;
use crate::types::error::BackupError;

const MINUTES_PER_HOUR: u64 = 60;
const MINUTES_PER_DAY: u64 = 24 * MINUTES_PER_HOUR;
const MINUTES_PER_WEEK: u64 = 7 * MINUTES_PER_DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleType {
    Interval,
    Cron,
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleType::Interval => write!(f, "interval"),
            ScheduleType::Cron => write!(f, "cron"),
        }
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interval" => Ok(ScheduleType::Interval),
            "cron" => Ok(ScheduleType::Cron),
            other => Err(format!("unknown schedule type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub schedule_type: ScheduleType,
    /// Minutes for interval schedules, a 5-field expression for cron schedules.
    pub interval: String,
    pub enabled: bool,
    pub categories: Option<Vec<String>>,
    pub extensions: Option<Vec<String>>,
    pub subdirectory: Option<String>,
    pub user_id: String,
    pub config_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Partial update applied by `SchedulerService::update_schedule`.
#[derive(Debug, Clone, Default)]
pub struct SchedulePatch {
    pub name: Option<String>,
    pub schedule_type: Option<ScheduleType>,
    pub interval: Option<String>,
    pub enabled: Option<bool>,
    pub categories: Option<Option<Vec<String>>>,
    pub extensions: Option<Option<Vec<String>>>,
    pub subdirectory: Option<Option<String>>,
    pub config_id: Option<Option<String>>,
}

pub fn generate_schedule_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("schedule_{}", &uuid[..8])
}

impl Schedule {
    pub fn new(name: &str, schedule_type: ScheduleType, interval: &str, user_id: &str) -> Self {
        Self {
            id: generate_schedule_id(),
            name: name.to_string(),
            schedule_type,
            interval: interval.to_string(),
            enabled: true,
            categories: None,
            extensions: None,
            subdirectory: None,
            user_id: user_id.to_string(),
            config_id: None,
            created_at: Utc::now(),
            last_run: None,
            next_run: None,
        }
    }

    pub fn validate(&mut self) -> Result<(), BackupError> {
        if self.name.trim().is_empty() {
            return Err(BackupError::InvalidSchedule(
                "schedule name is required".to_string(),
            ));
        }

        if self.interval.trim().is_empty() {
            return Err(BackupError::InvalidSchedule(
                "schedule interval is required".to_string(),
            ));
        }

        match self.schedule_type {
            ScheduleType::Interval => {
                self.interval_minutes()?;
            }
            ScheduleType::Cron => {
                parse_cron_expression(&self.interval).map_err(BackupError::InvalidSchedule)?;
            }
        }

        self.categories = self.categories.take().map(trim_list);
        self.extensions = self.extensions.take().map(trim_list);

        Ok(())
    }

    pub fn interval_minutes(&self) -> Result<u64, BackupError> {
        match self.interval.trim().parse::<u64>() {
            Ok(minutes) if minutes > 0 => Ok(minutes),
            _ => Err(BackupError::InvalidSchedule(
                "interval must be a positive integer".to_string(),
            )),
        }
    }

    pub fn interval_display(&self) -> String {
        if self.schedule_type == ScheduleType::Cron {
            return format!("Cron: {}", self.interval);
        }

        let Ok(minutes) = self.interval_minutes() else {
            return format!("Invalid interval: {}", self.interval);
        };

        let (value, unit) = if minutes % MINUTES_PER_WEEK == 0 {
            (minutes / MINUTES_PER_WEEK, "week")
        } else if minutes % MINUTES_PER_DAY == 0 {
            (minutes / MINUTES_PER_DAY, "day")
        } else if minutes % MINUTES_PER_HOUR == 0 {
            (minutes / MINUTES_PER_HOUR, "hour")
        } else {
            (minutes, "minute")
        };

        format!("Every {value} {unit}{}", if value > 1 { "s" } else { "" })
    }

    pub fn apply(&mut self, patch: SchedulePatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(schedule_type) = patch.schedule_type {
            self.schedule_type = schedule_type;
        }
        if let Some(interval) = patch.interval {
            self.interval = interval;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(categories) = patch.categories {
            self.categories = categories;
        }
        if let Some(extensions) = patch.extensions {
            self.extensions = extensions;
        }
        if let Some(subdirectory) = patch.subdirectory {
            self.subdirectory = subdirectory;
        }
        if let Some(config_id) = patch.config_id {
            self.config_id = config_id;
        }
    }
}

fn trim_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}
