use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Live statistics of one upload run.
///
/// Shared between the scanner, the upload workers and any number of progress readers.
/// Every read-modify-write goes through the single inner mutex.
#[derive(Debug, Default)]
pub struct UploadStatistics {
    state: Mutex<StatisticsState>,
}

#[derive(Debug, Default, Clone)]
struct StatisticsState {
    user_id: String,
    storage_class: Option<String>,
    total_files: u64,
    total_bytes: u64,
    successful: u64,
    failed: u64,
    cancelled: u64,
    skipped_existing: u64,
    skipped_time: u64,
    skipped_size: u64,
    uploaded_bytes: u64,
    file_start_times: HashMap<String, DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    start_instant: Option<Instant>,
    is_running: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsSnapshot {
    pub user_id: String,
    pub storage_class: Option<String>,
    pub total_files: u64,
    pub total_bytes: u64,
    pub successful: u64,
    pub failed: u64,
    /// Subset of `failed` that was never attempted or interrupted by a stop request.
    pub cancelled: u64,
    pub skipped_existing: u64,
    pub skipped_time: u64,
    pub skipped_size: u64,
    pub uploaded_bytes: u64,
    pub file_start_times: HashMap<String, DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed: Duration,
    pub is_running: bool,
    pub taken_at: DateTime<Utc>,
}

impl UploadStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatisticsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clears every counter and marks the start of a new run.
    pub fn reset(&self, user_id: &str, storage_class: Option<String>) {
        let mut state = self.lock();
        *state = StatisticsState {
            user_id: user_id.to_string(),
            storage_class,
            started_at: Some(Utc::now()),
            start_instant: Some(Instant::now()),
            is_running: true,
            ..Default::default()
        };
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().start_instant.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running
    }

    pub fn set_running(&self, running: bool) {
        self.lock().is_running = running;
    }

    pub fn set_totals(&self, total_files: u64, total_bytes: u64) {
        let mut state = self.lock();
        state.total_files = total_files;
        state.total_bytes = total_bytes;
    }

    pub fn set_skipped(&self, skipped_existing: u64, skipped_time: u64, skipped_size: u64) {
        let mut state = self.lock();
        state.skipped_existing = skipped_existing;
        state.skipped_time = skipped_time;
        state.skipped_size = skipped_size;
    }

    pub fn mark_file_started(&self, key: &str) {
        self.lock()
            .file_start_times
            .insert(key.to_string(), Utc::now());
    }

    pub fn record_success(&self, key: &str, bytes: u64) {
        let mut state = self.lock();
        state.successful += 1;
        state.uploaded_bytes += bytes;
        state.file_start_times.remove(key);
    }

    pub fn record_failure(&self, key: &str) {
        let mut state = self.lock();
        state.failed += 1;
        state.file_start_times.remove(key);
    }

    pub fn record_cancelled(&self, count: u64) {
        let mut state = self.lock();
        state.failed += count;
        state.cancelled += count;
    }

    pub fn clear_file_start_times(&self) {
        self.lock().file_start_times.clear();
    }

    pub fn user_id(&self) -> String {
        self.lock().user_id.clone()
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let state = self.lock().clone();
        StatisticsSnapshot {
            elapsed: state
                .start_instant
                .map(|instant| instant.elapsed())
                .unwrap_or_default(),
            user_id: state.user_id,
            storage_class: state.storage_class,
            total_files: state.total_files,
            total_bytes: state.total_bytes,
            successful: state.successful,
            failed: state.failed,
            cancelled: state.cancelled,
            skipped_existing: state.skipped_existing,
            skipped_time: state.skipped_time,
            skipped_size: state.skipped_size,
            uploaded_bytes: state.uploaded_bytes,
            file_start_times: state.file_start_times,
            started_at: state.started_at,
            is_running: state.is_running,
            taken_at: Utc::now(),
        }
    }
}

impl StatisticsSnapshot {
    pub fn processed(&self) -> u64 {
        self.successful + self.failed
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.processed() as f64 / self.total_files as f64 * 100.0
    }

    pub fn upload_speed(&self) -> f64 {
        let elapsed = self.elapsed.as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.uploaded_bytes as f64 / elapsed
    }

    pub fn remaining_files(&self) -> u64 {
        self.total_files.saturating_sub(self.processed())
    }

    pub fn success_rate(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            return 0.0;
        }
        self.successful as f64 / processed as f64 * 100.0
    }

    /// Keys of in-flight files that started more than `threshold` before the snapshot.
    pub fn stalled_files(&self, threshold: Duration) -> Vec<String> {
        let Ok(threshold) = chrono::Duration::from_std(threshold) else {
            return vec![];
        };

        let mut stalled: Vec<String> = self
            .file_start_times
            .iter()
            .filter(|(_, started)| self.taken_at - **started > threshold)
            .map(|(key, _)| key.clone())
            .collect();
        stalled.sort();
        stalled
    }
}
