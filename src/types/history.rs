use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveTime, TimeZone, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{status}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncHistoryEntry {
    pub id: String,
    pub schedule_id: String,
    pub schedule_name: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub files_processed: u64,
    pub files_uploaded: u64,
    pub files_failed: u64,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
    pub duration: Option<Duration>,
    pub error: Option<String>,
}

/// Terminal update of a history entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RunUpdate {
    pub status: RunStatus,
    pub files_processed: u64,
    pub files_uploaded: u64,
    pub files_failed: u64,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
    pub duration: Duration,
    pub error: Option<String>,
}

impl RunUpdate {
    pub fn failed(error: &str, duration: Duration) -> Self {
        Self {
            status: RunStatus::Failed,
            files_processed: 0,
            files_uploaded: 0,
            files_failed: 0,
            total_bytes: 0,
            uploaded_bytes: 0,
            duration,
            error: Some(error.to_string()),
        }
    }
}

pub fn generate_history_id(schedule_id: &str, start_time: &DateTime<Utc>) -> String {
    format!(
        "{schedule_id}_{}",
        start_time.with_timezone(&Local).format("%Y%m%d_%H%M%S")
    )
}

impl SyncHistoryEntry {
    pub fn new(id: &str, schedule_id: &str, schedule_name: &str, user_id: &str) -> Self {
        Self {
            id: id.to_string(),
            schedule_id: schedule_id.to_string(),
            schedule_name: schedule_name.to_string(),
            user_id: user_id.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            files_processed: 0,
            files_uploaded: 0,
            files_failed: 0,
            total_bytes: 0,
            uploaded_bytes: 0,
            duration: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_successful(&self) -> bool {
        self.status == RunStatus::Completed && self.files_failed == 0
    }

    pub fn apply(&mut self, update: RunUpdate) {
        self.status = update.status;
        self.files_processed = update.files_processed;
        self.files_uploaded = update.files_uploaded;
        self.files_failed = update.files_failed;
        self.total_bytes = update.total_bytes;
        self.uploaded_bytes = update.uploaded_bytes;
        self.duration = Some(update.duration);
        self.error = update.error;
        self.end_time = Some(Utc::now());
    }

    pub fn success_rate(&self) -> f64 {
        if self.files_processed == 0 {
            return 0.0;
        }
        self.files_uploaded as f64 / self.files_processed as f64 * 100.0
    }

    pub fn duration_display(&self) -> String {
        let secs = self.duration.unwrap_or_default().as_secs_f64();
        if secs < 60.0 {
            format!("{secs:.1}s")
        } else if secs < 3600.0 {
            format!("{}m {}s", (secs / 60.0) as u64, (secs % 60.0) as u64)
        } else {
            format!(
                "{}h {}m",
                (secs / 3600.0) as u64,
                ((secs % 3600.0) / 60.0) as u64
            )
        }
    }

    pub fn summary(&self) -> String {
        match self.status {
            RunStatus::Running => format!("Running - {} files processed", self.files_processed),
            RunStatus::Completed => format!(
                "Completed - {}/{} files uploaded",
                self.files_uploaded, self.files_processed
            ),
            RunStatus::Failed => format!(
                "Failed - {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
            RunStatus::Cancelled => "Cancelled".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPeriod {
    All,
    Today,
    /// Since Monday of the current week.
    Week,
    Month,
}

impl std::str::FromStr for HistoryPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(HistoryPeriod::All),
            "today" => Ok(HistoryPeriod::Today),
            "week" => Ok(HistoryPeriod::Week),
            "month" => Ok(HistoryPeriod::Month),
            other => Err(format!("unknown history period: {other}")),
        }
    }
}

impl HistoryPeriod {
    /// Inclusive lower bound of the period, relative to `now` in the timezone of `now`.
    pub fn start_from<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
        let date = now.date_naive();
        let start_date = match self {
            HistoryPeriod::All => return None,
            HistoryPeriod::Today => date,
            HistoryPeriod::Week => {
                date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            HistoryPeriod::Month => date.with_day(1)?,
        };

        now.timezone()
            .from_local_datetime(&start_date.and_time(NaiveTime::MIN))
            .earliest()
            .map(|start| start.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub success_rate: f64,
    pub total_files_uploaded: u64,
    pub total_bytes_uploaded: u64,
    pub average_duration: Duration,
    pub last_run: Option<SyncHistoryEntry>,
}

impl ScheduleStats {
    pub fn from_entries(entries: &[SyncHistoryEntry]) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }

        let completed: Vec<&SyncHistoryEntry> = entries
            .iter()
            .filter(|entry| entry.status == RunStatus::Completed)
            .collect();
        let failed_runs = entries
            .iter()
            .filter(|entry| entry.status == RunStatus::Failed)
            .count() as u64;

        let total_duration: Duration = completed
            .iter()
            .map(|entry| entry.duration.unwrap_or_default())
            .sum();
        let average_duration = if completed.is_empty() {
            Duration::ZERO
        } else {
            total_duration / completed.len() as u32
        };

        Some(Self {
            total_runs: entries.len() as u64,
            successful_runs: completed.len() as u64,
            failed_runs,
            success_rate: completed.len() as f64 / entries.len() as f64 * 100.0,
            total_files_uploaded: completed.iter().map(|entry| entry.files_uploaded).sum(),
            total_bytes_uploaded: completed.iter().map(|entry| entry.uploaded_bytes).sum(),
            average_duration,
            last_run: entries.last().cloned(),
        })
    }
}
