use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, Utc};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::scheduler::trigger::Trigger;

/// Called with the job id on every fire.
pub type JobCallback = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

type NextRun = Arc<Mutex<Option<DateTime<Utc>>>>;

struct ScheduledJob {
    trigger: Trigger,
    callback: JobCallback,
    handle: Option<JoinHandle<()>>,
    next_run: NextRun,
}

impl ScheduledJob {
    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    jobs: HashMap<String, ScheduledJob>,
    started: bool,
}

/// One timer task per job id.
///
/// Fires run as their own tasks, so a long run never delays the next fire time computation
/// of any job.
#[derive(Default)]
pub struct JobScheduler {
    state: Mutex<SchedulerState>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds or replaces the job with this id.
    pub fn schedule_job(&self, job_id: &str, trigger: Trigger, callback: JobCallback) {
        let mut state = self.lock();
        if let Some(mut previous) = state.jobs.remove(job_id) {
            previous.abort();
            debug!(job_id = job_id, "previous job has been replaced.");
        }

        let mut job = ScheduledJob {
            next_run: Arc::new(Mutex::new(trigger.next_fire_time())),
            trigger,
            callback,
            handle: None,
        };
        if state.started {
            job.handle = Some(spawn_job(job_id, &job));
        }
        state.jobs.insert(job_id.to_string(), job);

        info!(job_id = job_id, "job has been scheduled.");
    }

    pub fn unschedule_job(&self, job_id: &str) -> bool {
        match self.lock().jobs.remove(job_id) {
            Some(mut job) => {
                job.abort();
                info!(job_id = job_id, "job has been unscheduled.");
                true
            }
            None => false,
        }
    }

    pub fn next_run_time(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .jobs
            .get(job_id)
            .and_then(|job| *job.next_run.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn start(&self) {
        let mut state = self.lock();
        if state.started {
            return;
        }
        state.started = true;

        for (job_id, job) in state.jobs.iter_mut() {
            job.handle = Some(spawn_job(job_id, job));
        }
        info!(jobs = state.jobs.len(), "job scheduler has started.");
    }

    /// Stops every timer. Jobs stay registered and are spawned again by the next `start()`.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        if !state.started {
            return;
        }
        state.started = false;

        for job in state.jobs.values_mut() {
            job.abort();
        }
        info!("job scheduler has been shut down.");
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        for job in self.lock().jobs.values_mut() {
            job.abort();
        }
    }
}

fn spawn_job(job_id: &str, job: &ScheduledJob) -> JoinHandle<()> {
    let job_id = job_id.to_string();
    let trigger = job.trigger.clone();
    let callback = job.callback.clone();
    let next_run = job.next_run.clone();

    tokio::spawn(async move {
        loop {
            let now = Local::now();
            let Some(next) = trigger.next_fire_after(&now) else {
                warn!(job_id = job_id, "no next fire time. job is stopped.");
                *next_run.lock().unwrap_or_else(|e| e.into_inner()) = None;
                return;
            };
            *next_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(next.with_timezone(&Utc));

            let wait = (next - now).to_std().unwrap_or_default();
            trace!(job_id = job_id, wait_seconds = wait.as_secs(), "waiting for next fire.");
            tokio::time::sleep(wait).await;

            debug!(job_id = job_id, "job has been fired.");
            tokio::spawn(callback(job_id.clone()));
        }
    })
}
