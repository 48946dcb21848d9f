use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::{BackupConfig, ConfigSource};
use crate::pipeline::registry::{RunGuard, RunRegistry};
use crate::pipeline::{ProgressReporter, UploadEngine, UploadOptions, UploadOutcome};
use crate::scanner::FileScanner;
use crate::scheduler::history::History;
use crate::scheduler::job_scheduler::JobScheduler;
use crate::scheduler::store::ScheduleRepository;
use crate::scheduler::trigger::Trigger;
use crate::storage::{Store, StoreConnector};
use crate::types::error::BackupError;
use crate::types::{
    FileCandidate, MANUAL_SCHEDULE_ID, MANUAL_SCHEDULE_NAME, RunStatus, RunUpdate, Schedule,
    SyncHistoryEntry, UploadMode, total_bytes,
};

pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_secs(5);
const STALLED_FILE_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// What a run should upload and on whose behalf.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub user_id: String,
    pub schedule: Option<Schedule>,
    pub mode: UploadMode,
    pub files: Option<Vec<FileCandidate>>,
    pub storage_class: Option<String>,
}

impl RunRequest {
    pub fn scheduled(schedule: Schedule) -> Self {
        Self {
            user_id: schedule.user_id.clone(),
            schedule: Some(schedule),
            mode: UploadMode::Auto,
            files: None,
            storage_class: None,
        }
    }

    pub fn upload(
        user_id: &str,
        files: Option<Vec<FileCandidate>>,
        mode: UploadMode,
        storage_class: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            schedule: None,
            mode,
            files,
            storage_class,
        }
    }

    fn schedule_id(&self) -> &str {
        self.schedule
            .as_ref()
            .map_or(MANUAL_SCHEDULE_ID, |schedule| schedule.id.as_str())
    }

    fn schedule_name(&self) -> &str {
        self.schedule
            .as_ref()
            .map_or(MANUAL_SCHEDULE_NAME, |schedule| schedule.name.as_str())
    }

    fn config_id(&self) -> Option<&str> {
        self.schedule
            .as_ref()
            .and_then(|schedule| schedule.config_id.as_deref())
    }
}

/// A run whose slot is claimed and whose preconditions have been checked.
pub struct PreparedRun {
    guard: RunGuard,
    request: RunRequest,
    config: Option<BackupConfig>,
}

/// Executes one upload run end to end and records its outcome.
#[derive(Clone)]
pub struct SyncRunner {
    config_source: ConfigSource,
    connector: StoreConnector,
    history: History,
    schedules: ScheduleRepository,
    registry: Arc<RunRegistry>,
    scheduler: Option<Weak<JobScheduler>>,
    progress: Option<ProgressReporter>,
    watchdog_timeout: Duration,
}

impl SyncRunner {
    pub fn new(
        config_source: ConfigSource,
        connector: StoreConnector,
        history: History,
        schedules: ScheduleRepository,
        registry: Arc<RunRegistry>,
    ) -> Self {
        Self {
            config_source,
            connector,
            history,
            schedules,
            registry,
            scheduler: None,
            progress: None,
            watchdog_timeout: WATCHDOG_TIMEOUT,
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_watchdog_timeout(mut self, watchdog_timeout: Duration) -> Self {
        self.watchdog_timeout = watchdog_timeout;
        self
    }

    /// `next_run` of a finished scheduled run is read from this scheduler's timers.
    pub fn with_scheduler(mut self, scheduler: &Arc<JobScheduler>) -> Self {
        self.scheduler = Some(Arc::downgrade(scheduler));
        self
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Claims the user's run slot and loads and validates the configuration.
    ///
    /// Fails without touching the history or the object store.
    pub async fn prepare(&self, request: RunRequest) -> Result<PreparedRun> {
        if request.mode == UploadMode::Manual && request.files.is_none() {
            return Err(anyhow!(BackupError::Configuration(
                "manual upload requires a file list".to_string()
            )));
        }

        let guard = self.registry.acquire(&request.user_id)?;
        let config = self.load_config(&request).await?;

        Ok(PreparedRun {
            guard,
            request,
            config: Some(config),
        })
    }

    /// Scheduled entry point. Configuration errors end up in the history entry.
    pub async fn run(&self, request: RunRequest) -> Result<SyncHistoryEntry> {
        let guard = self.registry.acquire(&request.user_id)?;
        Ok(self
            .execute(PreparedRun {
                guard,
                request,
                config: None,
            })
            .await)
    }

    pub async fn execute(&self, prepared: PreparedRun) -> SyncHistoryEntry {
        let PreparedRun {
            guard,
            request,
            config,
        } = prepared;

        let run_id = self.history.create_run(
            request.schedule_id(),
            request.schedule_name(),
            &request.user_id,
        );
        let started = Instant::now();

        info!(
            run_id = run_id,
            user_id = request.user_id,
            schedule_id = request.schedule_id(),
            "run has started."
        );

        let update = match self.execute_steps(&guard, &request, config).await {
            Ok(update) => update,
            Err(e) => {
                error!(
                    run_id = run_id,
                    user_id = request.user_id,
                    error = format!("{e:#}"),
                    "run has failed."
                );
                self.failed_update(&guard, &e, started.elapsed())
            }
        };

        let mut entry = SyncHistoryEntry::new(
            &run_id,
            request.schedule_id(),
            request.schedule_name(),
            &request.user_id,
        );
        entry.apply(update.clone());

        if let Err(e) = self.history.update_run(&run_id, update) {
            warn!(run_id = run_id, error = e.to_string(), "history update failed.");
        }

        if let Some(schedule) = &request.schedule {
            self.refresh_schedule(&schedule.id);
        }

        guard.stats.set_running(false);
        drop(guard);

        info!(
            run_id = run_id,
            status = entry.status.to_string(),
            uploaded = entry.files_uploaded,
            failed = entry.files_failed,
            duration = entry.duration_display(),
            "run has finished."
        );

        self.history.entry(&run_id).unwrap_or(entry)
    }

    async fn load_config(&self, request: &RunRequest) -> Result<BackupConfig> {
        let config = self
            .config_source
            .get_config(&request.user_id, request.config_id())
            .await?;
        config.validate()?;
        Ok(config)
    }

    async fn execute_steps(
        &self,
        guard: &RunGuard,
        request: &RunRequest,
        config: Option<BackupConfig>,
    ) -> Result<RunUpdate> {
        let started = Instant::now();
        let config = match config {
            Some(config) => config,
            None => self.load_config(request).await?,
        };
        let storage_class = request
            .storage_class
            .clone()
            .unwrap_or_else(|| config.storage_class.clone());
        guard
            .stats
            .reset(&request.user_id, Some(storage_class.clone()));

        let store = self.connector.connect(&request.user_id, &config).await?;
        if !store.test_connection().await {
            return Err(anyhow!(BackupError::Connectivity(format!(
                "cannot connect to {}",
                config.s3_endpoint
            ))));
        }

        let existing_keys = store
            .list_existing_keys()
            .await
            .context("list_existing_keys() failed.")?;

        let candidates = match request.mode {
            UploadMode::Auto => {
                FileScanner::new(guard.stats.clone(), guard.control.clone())
                    .scan_async(
                        &config.nfs_path,
                        Arc::new(existing_keys),
                        config.scan_filters(request.schedule.as_ref()),
                    )
                    .await?
            }
            UploadMode::Manual => {
                let files = request.files.clone().unwrap_or_default();
                let (existing, candidates): (Vec<FileCandidate>, Vec<FileCandidate>) = files
                    .into_iter()
                    .partition(|file| existing_keys.contains(&file.destination_key()));
                guard.stats.set_skipped(existing.len() as u64, 0, 0);
                candidates
            }
        };

        if candidates.is_empty() {
            info!(user_id = request.user_id, "no files to upload.");
            return Ok(self.terminal_update(guard, UploadOutcome::default(), started.elapsed()));
        }

        if guard.control.stop_requested() {
            info!(
                user_id = request.user_id,
                files = candidates.len(),
                "run has been stopped before the upload."
            );
            guard
                .stats
                .set_totals(candidates.len() as u64, total_bytes(&candidates));
            guard.stats.record_cancelled(candidates.len() as u64);
            let outcome = UploadOutcome {
                successful: 0,
                failed: candidates.len() as u64,
            };
            return Ok(self.terminal_update(guard, outcome, started.elapsed()));
        }

        let store_for_reset = store.clone();
        let engine = UploadEngine::new(
            store,
            guard.stats.clone(),
            guard.control.clone(),
            self.progress.clone(),
        );
        let options = UploadOptions::from_config(&config, Some(&storage_class));

        let outcome = self
            .upload_with_watchdog(guard, engine, candidates, &options, store_for_reset)
            .await?;

        Ok(self.terminal_update(guard, outcome, started.elapsed()))
    }

    async fn upload_with_watchdog(
        &self,
        guard: &RunGuard,
        engine: UploadEngine,
        candidates: Vec<FileCandidate>,
        options: &UploadOptions,
        store: Store,
    ) -> Result<UploadOutcome> {
        let upload = engine.upload(candidates, options);
        tokio::pin!(upload);

        let watchdog = tokio::time::sleep(self.watchdog_timeout);
        tokio::pin!(watchdog);

        let mut poll = tokio::time::interval_at(
            tokio::time::Instant::now() + WATCHDOG_POLL_INTERVAL,
            WATCHDOG_POLL_INTERVAL,
        );

        loop {
            tokio::select! {
                result = &mut upload => return result,
                _ = &mut watchdog => {
                    warn!(
                        user_id = guard.user_id(),
                        timeout_seconds = self.watchdog_timeout.as_secs(),
                        "watchdog timeout. run is terminated."
                    );
                    guard.control.request_stop(false);
                    store.reset_connection();
                    return Err(anyhow!(BackupError::WatchdogTimeout));
                },
                _ = poll.tick() => {
                    let snapshot = guard.stats.snapshot();
                    debug!(
                        user_id = guard.user_id(),
                        processed = snapshot.processed(),
                        total = snapshot.total_files,
                        "waiting for upload completion."
                    );
                    let stalled = snapshot.stalled_files(STALLED_FILE_THRESHOLD);
                    if !stalled.is_empty() {
                        warn!(
                            user_id = guard.user_id(),
                            stalled = stalled.join(", "),
                            "uploads are taking longer than expected."
                        );
                    }
                },
            }
        }
    }

    fn terminal_update(
        &self,
        guard: &RunGuard,
        outcome: UploadOutcome,
        duration: Duration,
    ) -> RunUpdate {
        let snapshot = guard.stats.snapshot();
        let (status, error) = if guard.control.force_stop() {
            (RunStatus::Cancelled, Some("force stopped by user".to_string()))
        } else if guard.control.stop_requested() {
            (RunStatus::Cancelled, Some("stopped by user".to_string()))
        } else {
            (RunStatus::Completed, None)
        };

        RunUpdate {
            status,
            files_processed: outcome.total(),
            files_uploaded: outcome.successful,
            files_failed: outcome.failed,
            total_bytes: snapshot.total_bytes,
            uploaded_bytes: snapshot.uploaded_bytes,
            duration,
            error,
        }
    }

    fn failed_update(&self, guard: &RunGuard, e: &anyhow::Error, duration: Duration) -> RunUpdate {
        let snapshot = guard.stats.snapshot();
        let mut update = RunUpdate::failed(&e.to_string(), duration);
        update.files_processed = snapshot.total_files;
        update.files_uploaded = snapshot.successful.min(snapshot.total_files);
        update.files_failed = update.files_processed - update.files_uploaded;
        update.total_bytes = snapshot.total_bytes;
        update.uploaded_bytes = snapshot.uploaded_bytes;
        update
    }

    fn refresh_schedule(&self, schedule_id: &str) {
        let mut schedule = match self.schedules.get(schedule_id) {
            Ok(Some(schedule)) => schedule,
            Ok(None) => {
                debug!(schedule_id = schedule_id, "schedule has been deleted during the run.");
                return;
            }
            Err(e) => {
                warn!(schedule_id = schedule_id, error = e.to_string(), "schedule lookup failed.");
                return;
            }
        };

        schedule.last_run = Some(Utc::now());
        schedule.next_run = if schedule.enabled {
            self.scheduled_next_run(schedule_id).or_else(|| {
                Trigger::from_schedule(&schedule)
                    .ok()
                    .and_then(|trigger| trigger.next_fire_time())
            })
        } else {
            None
        };

        if let Err(e) = self.schedules.save(&schedule) {
            warn!(schedule_id = schedule_id, error = e.to_string(), "schedule update failed.");
        }
    }

    /// Falls back to the trigger when the job has no live timer.
    fn scheduled_next_run(&self, schedule_id: &str) -> Option<DateTime<Utc>> {
        self.scheduler
            .as_ref()
            .and_then(Weak::upgrade)
            .and_then(|scheduler| scheduler.next_run_time(schedule_id))
    }
}
