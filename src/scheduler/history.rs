use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::types::history::generate_history_id;
use crate::types::{HistoryPeriod, RunUpdate, SyncHistoryEntry};

pub const MAX_HISTORY_ENTRIES: usize = 100;

/// Records the outcome of every run.
///
/// `create_run` is called exactly once per run, `update_run` at most once with the
/// terminal status.
pub trait HistorySink {
    fn create_run(&self, schedule_id: &str, schedule_name: &str, user_id: &str) -> String;
    fn update_run(&self, run_id: &str, update: RunUpdate) -> Result<()>;
    fn entry(&self, run_id: &str) -> Option<SyncHistoryEntry>;
    /// Oldest first.
    fn entries(&self) -> Vec<SyncHistoryEntry>;
}

pub type History = Arc<dyn HistorySink + Send + Sync>;

#[derive(Debug)]
pub struct InMemoryHistory {
    entries: Mutex<VecDeque<SyncHistoryEntry>>,
    capacity: usize,
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::with_capacity(MAX_HISTORY_ENTRIES)
    }
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SyncHistoryEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HistorySink for InMemoryHistory {
    fn create_run(&self, schedule_id: &str, schedule_name: &str, user_id: &str) -> String {
        let mut entries = self.lock();

        let base_id = generate_history_id(schedule_id, &Utc::now());
        let mut run_id = base_id.clone();
        let mut suffix = 2;
        while entries.iter().any(|entry| entry.id == run_id) {
            run_id = format!("{base_id}_{suffix}");
            suffix += 1;
        }

        entries.push_back(SyncHistoryEntry::new(
            &run_id,
            schedule_id,
            schedule_name,
            user_id,
        ));
        while entries.len() > self.capacity {
            entries.pop_front();
        }

        debug!(run_id = run_id, "history entry has been created.");
        run_id
    }

    fn update_run(&self, run_id: &str, update: RunUpdate) -> Result<()> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == run_id)
            .ok_or_else(|| anyhow!("history entry not found: {run_id}"))?;

        if entry.is_terminal() {
            return Err(anyhow!("history entry is already terminal: {run_id}"));
        }
        entry.apply(update);

        debug!(run_id = run_id, status = entry.status.to_string(), "history entry has been updated.");
        Ok(())
    }

    fn entry(&self, run_id: &str) -> Option<SyncHistoryEntry> {
        self.lock().iter().find(|entry| entry.id == run_id).cloned()
    }

    fn entries(&self) -> Vec<SyncHistoryEntry> {
        self.lock().iter().cloned().collect()
    }
}

/// Entries of one schedule (or all) within a period, keeping the `limit` most recent.
pub fn filter_history<Tz: TimeZone>(
    entries: Vec<SyncHistoryEntry>,
    schedule_id: Option<&str>,
    period: HistoryPeriod,
    limit: Option<usize>,
    now: &DateTime<Tz>,
) -> Vec<SyncHistoryEntry> {
    let start = period.start_from(now);
    let filtered: Vec<SyncHistoryEntry> = entries
        .into_iter()
        .filter(|entry| schedule_id.is_none_or(|schedule_id| entry.schedule_id == schedule_id))
        .filter(|entry| start.is_none_or(|start| entry.start_time >= start))
        .collect();

    match limit {
        Some(limit) if filtered.len() > limit => filtered[filtered.len() - limit..].to_vec(),
        _ => filtered,
    }
}
