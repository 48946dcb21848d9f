use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum BackupError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("source directory not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("connectivity error: {0}")]
    Connectivity(String),
    #[error("upload statistics have not been initialized")]
    StatisticsNotInitialized,
    #[error("an upload is already running for user {0}")]
    RunAlreadyActive(String),
    #[error("cancelled")]
    Cancelled,
    #[error("watchdog timeout")]
    WatchdogTimeout,
    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

pub fn is_cancelled_error(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<BackupError>(), Some(BackupError::Cancelled))
}

pub fn is_run_already_active_error(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<BackupError>(),
        Some(BackupError::RunAlreadyActive(_))
    )
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn downcast_backup_errors() {
        init_dummy_tracing_subscriber();

        assert!(is_cancelled_error(&anyhow!(BackupError::Cancelled)));
        assert!(!is_cancelled_error(&anyhow!(BackupError::WatchdogTimeout)));
        assert!(!is_cancelled_error(&anyhow!("cancelled")));

        assert!(is_run_already_active_error(&anyhow!(
            BackupError::RunAlreadyActive("alice".to_string())
        )));
        assert!(!is_run_already_active_error(&anyhow!(BackupError::Cancelled)));
    }

    #[test]
    fn error_messages() {
        init_dummy_tracing_subscriber();

        assert_eq!(
            BackupError::Configuration("S3_SECRET_KEY is required".to_string()).to_string(),
            "configuration error: S3_SECRET_KEY is required"
        );
        assert_eq!(BackupError::WatchdogTimeout.to_string(), "watchdog timeout");
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
