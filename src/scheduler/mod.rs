use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Local;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConfigSource;
use crate::pipeline::ProgressReporter;
use crate::pipeline::registry::RunRegistry;
use crate::scheduler::history::{History, filter_history};
use crate::scheduler::job_scheduler::{JobCallback, JobScheduler};
use crate::scheduler::runner::{RunRequest, SyncRunner};
use crate::scheduler::store::ScheduleRepository;
use crate::scheduler::trigger::Trigger;
use crate::storage::StoreConnector;
use crate::types::error::{BackupError, is_run_already_active_error};
use crate::types::{
    FileCandidate, HistoryPeriod, Schedule, SchedulePatch, ScheduleStats, StatisticsSnapshot,
    StopMode, SyncHistoryEntry, UploadMode,
};

pub mod history;
pub mod job_scheduler;
pub mod runner;
pub mod store;
pub mod trigger;

/// Handle of a spawned run.
pub struct RunHandle {
    user_id: String,
    handle: JoinHandle<SyncHistoryEntry>,
}

impl RunHandle {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the terminal history entry of the run.
    pub async fn wait(self) -> Result<SyncHistoryEntry> {
        self.handle
            .await
            .map_err(|e| anyhow!("run task failed: {e}"))
    }
}

/// Public surface of the backup service: uploads, stop requests, statistics, schedules and
/// history.
pub struct SchedulerService {
    runner: SyncRunner,
    scheduler: Arc<JobScheduler>,
    schedules: ScheduleRepository,
    history: History,
}

impl SchedulerService {
    pub fn new(
        config_source: ConfigSource,
        connector: StoreConnector,
        history: History,
        schedules: ScheduleRepository,
    ) -> Self {
        let scheduler = Arc::new(JobScheduler::new());
        let runner = SyncRunner::new(
            config_source,
            connector,
            history.clone(),
            schedules.clone(),
            Arc::new(RunRegistry::new()),
        )
        .with_scheduler(&scheduler);

        Self {
            runner,
            scheduler,
            schedules,
            history,
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.runner = self.runner.with_progress(progress);
        self
    }

    pub fn with_watchdog_timeout(mut self, watchdog_timeout: Duration) -> Self {
        self.runner = self.runner.with_watchdog_timeout(watchdog_timeout);
        self
    }

    /// Schedules every enabled stored schedule and starts the timers.
    /// Returns the number of restored schedules.
    pub fn start(&self) -> Result<usize> {
        let mut restored = 0;
        for schedule in self.schedules.load()? {
            if !schedule.enabled {
                continue;
            }
            match self.schedule(&schedule) {
                Ok(()) => restored += 1,
                Err(e) => {
                    warn!(
                        schedule_id = schedule.id,
                        error = e.to_string(),
                        "stored schedule cannot be restored."
                    );
                }
            }
        }

        self.scheduler.start();
        info!(restored, "scheduler service has started.");
        Ok(restored)
    }

    pub fn is_started(&self) -> bool {
        self.scheduler.is_started()
    }

    /// Stops the timers. Active runs are not affected.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        info!("scheduler service has been shut down.");
    }

    pub async fn start_upload(
        &self,
        user_id: &str,
        files: Option<Vec<FileCandidate>>,
        mode: UploadMode,
        storage_class: Option<String>,
    ) -> Result<RunHandle> {
        let prepared = self
            .runner
            .prepare(RunRequest::upload(user_id, files, mode, storage_class))
            .await?;

        let runner = self.runner.clone();
        Ok(RunHandle {
            user_id: user_id.to_string(),
            handle: tokio::spawn(async move { runner.execute(prepared).await }),
        })
    }

    /// Returns false if the user has no active run.
    pub fn request_stop(&self, user_id: &str, mode: StopMode) -> bool {
        match self.runner.registry().control(user_id) {
            Some(control) => {
                control.request_stop(mode.finish_current());
                true
            }
            None => {
                debug!(user_id = user_id, "no active run to stop.");
                false
            }
        }
    }

    /// Requests a stop of every active run.
    pub fn request_stop_all(&self, mode: StopMode) -> usize {
        self.runner
            .registry()
            .active_users()
            .iter()
            .filter(|user_id| self.request_stop(user_id, mode))
            .count()
    }

    pub fn get_statistics(&self, user_id: &str) -> Option<StatisticsSnapshot> {
        self.runner
            .registry()
            .statistics(user_id)
            .map(|stats| stats.snapshot())
    }

    pub fn is_running(&self, user_id: &str) -> bool {
        self.runner.registry().is_active(user_id)
    }

    pub fn add_schedule(&self, mut schedule: Schedule) -> Result<Schedule> {
        schedule.validate()?;
        let trigger = Trigger::from_schedule(&schedule)?;
        schedule.next_run = schedule
            .enabled
            .then(|| trigger.next_fire_time())
            .flatten();

        self.schedules.save(&schedule)?;
        if schedule.enabled {
            self.scheduler
                .schedule_job(&schedule.id, trigger, self.job_callback());
        }

        info!(
            schedule_id = schedule.id,
            name = schedule.name,
            interval = schedule.interval_display(),
            "schedule has been added."
        );
        Ok(schedule)
    }

    pub fn update_schedule(&self, schedule_id: &str, patch: SchedulePatch) -> Result<Schedule> {
        let mut schedule = self.get_schedule(schedule_id)?;
        schedule.apply(patch);
        schedule.validate()?;
        let trigger = Trigger::from_schedule(&schedule)?;

        if schedule.enabled {
            schedule.next_run = trigger.next_fire_time();
            self.scheduler
                .schedule_job(&schedule.id, trigger, self.job_callback());
        } else {
            schedule.next_run = None;
            self.scheduler.unschedule_job(&schedule.id);
        }
        self.schedules.save(&schedule)?;

        info!(schedule_id = schedule_id, "schedule has been updated.");
        Ok(schedule)
    }

    pub fn delete_schedule(&self, schedule_id: &str) -> Result<()> {
        self.scheduler.unschedule_job(schedule_id);
        if !self.schedules.delete(schedule_id)? {
            return Err(anyhow!(BackupError::ScheduleNotFound(
                schedule_id.to_string()
            )));
        }

        info!(schedule_id = schedule_id, "schedule has been deleted.");
        Ok(())
    }

    pub fn get_schedule(&self, schedule_id: &str) -> Result<Schedule> {
        self.schedules
            .get(schedule_id)?
            .ok_or_else(|| anyhow!(BackupError::ScheduleNotFound(schedule_id.to_string())))
    }

    pub fn list_schedules(&self, user_id: Option<&str>) -> Result<Vec<Schedule>> {
        Ok(self
            .schedules
            .load()?
            .into_iter()
            .filter(|schedule| user_id.is_none_or(|user_id| schedule.user_id == user_id))
            .collect())
    }

    /// Starts the schedule's run immediately, outside of its timer.
    pub async fn run_now(&self, schedule_id: &str) -> Result<RunHandle> {
        let schedule = self.get_schedule(schedule_id)?;
        let user_id = schedule.user_id.clone();
        let prepared = self
            .runner
            .prepare(RunRequest::scheduled(schedule))
            .await?;

        let runner = self.runner.clone();
        Ok(RunHandle {
            user_id,
            handle: tokio::spawn(async move { runner.execute(prepared).await }),
        })
    }

    pub fn next_run_time(&self, schedule_id: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.scheduler.next_run_time(schedule_id)
    }

    pub fn get_history(
        &self,
        schedule_id: Option<&str>,
        period: HistoryPeriod,
        limit: Option<usize>,
    ) -> Vec<SyncHistoryEntry> {
        filter_history(
            self.history.entries(),
            schedule_id,
            period,
            limit,
            &Local::now(),
        )
    }

    pub fn get_schedule_stats(&self, schedule_id: &str) -> Option<ScheduleStats> {
        let entries: Vec<SyncHistoryEntry> = self
            .history
            .entries()
            .into_iter()
            .filter(|entry| entry.schedule_id == schedule_id && entry.is_terminal())
            .collect();
        ScheduleStats::from_entries(&entries)
    }

    fn schedule(&self, schedule: &Schedule) -> Result<()> {
        let trigger = Trigger::from_schedule(schedule)?;
        self.scheduler
            .schedule_job(&schedule.id, trigger, self.job_callback());
        Ok(())
    }

    fn job_callback(&self) -> JobCallback {
        let runner = self.runner.clone();
        let schedules = self.schedules.clone();

        Arc::new(move |schedule_id: String| {
            let runner = runner.clone();
            let schedules = schedules.clone();
            Box::pin(async move {
                let schedule = match schedules.get(&schedule_id) {
                    Ok(Some(schedule)) if schedule.enabled => schedule,
                    Ok(_) => {
                        debug!(schedule_id = schedule_id, "schedule is gone or disabled. fire is ignored.");
                        return;
                    }
                    Err(e) => {
                        error!(schedule_id = schedule_id, error = e.to_string(), "schedule lookup failed.");
                        return;
                    }
                };

                match runner.run(RunRequest::scheduled(schedule)).await {
                    Ok(entry) => {
                        info!(
                            schedule_id = schedule_id,
                            status = entry.status.to_string(),
                            summary = entry.summary(),
                            "scheduled run has finished."
                        );
                    }
                    Err(e) if is_run_already_active_error(&e) => {
                        warn!(
                            schedule_id = schedule_id,
                            "previous run of the user is still active. scheduled run is skipped."
                        );
                    }
                    Err(e) => {
                        error!(schedule_id = schedule_id, error = e.to_string(), "scheduled run failed.");
                    }
                }
            })
        })
    }
}
