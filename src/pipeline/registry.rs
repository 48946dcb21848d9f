use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::pipeline::control::UploadControl;
use crate::types::UploadStatistics;
use crate::types::error::BackupError;

#[derive(Debug)]
struct RunEntry {
    stats: Arc<UploadStatistics>,
    control: Arc<UploadControl>,
    active: bool,
}

/// Statistics and stop control of every user, at most one active run per user.
///
/// Statistics of the last run stay readable after the run has finished.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, RunEntry>>,
}

/// Active run slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct RunGuard {
    registry: Arc<RunRegistry>,
    user_id: String,
    pub stats: Arc<UploadStatistics>,
    pub control: Arc<UploadControl>,
}

impl RunGuard {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.stats.set_running(false);
        self.registry.release(&self.user_id);
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunEntry>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn acquire(self: &Arc<Self>, user_id: &str) -> Result<RunGuard, BackupError> {
        let mut runs = self.lock();
        if runs.get(user_id).is_some_and(|entry| entry.active) {
            return Err(BackupError::RunAlreadyActive(user_id.to_string()));
        }

        let stats = Arc::new(UploadStatistics::new());
        let control = runs
            .get(user_id)
            .map_or_else(|| Arc::new(UploadControl::new()), |entry| entry.control.clone());
        control.reset();
        runs.insert(
            user_id.to_string(),
            RunEntry {
                stats: stats.clone(),
                control: control.clone(),
                active: true,
            },
        );
        debug!(user_id = user_id, "run slot has been acquired.");

        Ok(RunGuard {
            registry: self.clone(),
            user_id: user_id.to_string(),
            stats,
            control,
        })
    }

    fn release(&self, user_id: &str) {
        if let Some(entry) = self.lock().get_mut(user_id) {
            entry.active = false;
        }
        debug!(user_id = user_id, "run slot has been released.");
    }

    pub fn is_active(&self, user_id: &str) -> bool {
        self.lock().get(user_id).is_some_and(|entry| entry.active)
    }

    pub fn active_users(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, entry)| entry.active)
            .map(|(user_id, _)| user_id.clone())
            .collect()
    }

    pub fn statistics(&self, user_id: &str) -> Option<Arc<UploadStatistics>> {
        self.lock().get(user_id).map(|entry| entry.stats.clone())
    }

    /// Control of the active run only.
    pub fn control(&self, user_id: &str) -> Option<Arc<UploadControl>> {
        self.lock()
            .get(user_id)
            .filter(|entry| entry.active)
            .map(|entry| entry.control.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_active_run_per_user() {
        init_dummy_tracing_subscriber();

        let registry = Arc::new(RunRegistry::new());
        let guard = registry.acquire("alice").unwrap();

        assert_eq!(
            registry.acquire("alice").unwrap_err(),
            BackupError::RunAlreadyActive("alice".to_string())
        );
        let other = registry.acquire("bob").unwrap();
        assert!(registry.is_active("alice"));
        assert!(registry.is_active("bob"));

        drop(guard);
        assert!(!registry.is_active("alice"));
        assert!(registry.control("alice").is_none());
        registry.acquire("alice").unwrap();

        assert_eq!(registry.active_users(), vec!["bob".to_string()]);
        drop(other);
    }

    #[test]
    fn statistics_survive_release() {
        init_dummy_tracing_subscriber();

        let registry = Arc::new(RunRegistry::new());
        assert!(registry.statistics("alice").is_none());

        let guard = registry.acquire("alice").unwrap();
        guard.stats.reset("alice", None);
        guard.stats.record_success("full/a.vbk", 10);
        assert!(registry.control("alice").is_some());
        drop(guard);

        let stats = registry.statistics("alice").unwrap();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.successful, 1);
        assert!(!snapshot.is_running);
    }

    #[test]
    fn stop_of_previous_run_is_cleared() {
        init_dummy_tracing_subscriber();

        let registry = Arc::new(RunRegistry::new());
        let guard = registry.acquire("alice").unwrap();
        registry.control("alice").unwrap().request_stop(false);
        assert!(guard.control.force_stop());
        drop(guard);

        let guard = registry.acquire("alice").unwrap();
        assert!(!guard.control.stop_requested());
        assert!(!guard.control.force_stop());

        guard.control.request_stop(true);
        assert!(registry.control("alice").unwrap().stop_requested());
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
