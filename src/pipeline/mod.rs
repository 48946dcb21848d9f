use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::BackupConfig;
use crate::pipeline::control::UploadControl;
use crate::pipeline::worker::{UploadResult, UploadWorker};
use crate::storage::Store;
use crate::types::error::BackupError;
use crate::types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
use crate::types::{
    FileCandidate, S3BACKUP_LAST_MODIFIED_METADATA_KEY, StatisticsSnapshot, UploadStatistics,
    total_bytes,
};

pub mod control;
pub mod registry;
mod worker;

const PROGRESS_SUMMARY_INTERVAL: Duration = Duration::from_secs(30);
const PROBE_BATCH_MAX_WORKERS: u16 = 3;

/// Receives a statistics snapshot after every finished file.
pub trait ProgressSink {
    fn on_progress(&self, snapshot: &StatisticsSnapshot);
}

pub type ProgressReporter = Arc<dyn ProgressSink + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    pub max_workers: u16,
    /// Attempts after the first one.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub storage_class: String,
    /// `0` disables the probe batch.
    pub probe_batch_size: usize,
    pub put_last_modified_metadata: bool,
}

impl UploadOptions {
    pub fn from_config(config: &BackupConfig, storage_class: Option<&str>) -> Self {
        Self {
            max_workers: config.max_threads,
            max_retries: config.upload_retries,
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            storage_class: storage_class
                .unwrap_or(config.storage_class.as_str())
                .to_string(),
            probe_batch_size: config.probe_batch_size,
            put_last_modified_metadata: config.put_last_modified_metadata,
        }
    }

    fn metadata(&self, candidate: &FileCandidate) -> Option<HashMap<String, String>> {
        if !self.put_last_modified_metadata {
            return None;
        }
        Some(HashMap::from([(
            S3BACKUP_LAST_MODIFIED_METADATA_KEY.to_string(),
            candidate.modified.to_rfc3339(),
        )]))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    pub successful: u64,
    pub failed: u64,
}

impl UploadOutcome {
    pub fn total(&self) -> u64 {
        self.successful + self.failed
    }

    fn merge(&mut self, other: UploadOutcome) {
        self.successful += other.successful;
        self.failed += other.failed;
    }
}

/// Uploads a list of candidates with a pool of worker tasks.
pub struct UploadEngine {
    store: Store,
    stats: Arc<UploadStatistics>,
    control: Arc<UploadControl>,
    progress: Option<ProgressReporter>,
}

impl UploadEngine {
    pub fn new(
        store: Store,
        stats: Arc<UploadStatistics>,
        control: Arc<UploadControl>,
        progress: Option<ProgressReporter>,
    ) -> Self {
        Self {
            store,
            stats,
            control,
            progress,
        }
    }

    /// Every candidate ends up either successful or failed.
    /// Files that were never attempted because of a stop request count as failed.
    pub async fn upload(
        &self,
        candidates: Vec<FileCandidate>,
        options: &UploadOptions,
    ) -> Result<UploadOutcome> {
        if !self.stats.is_initialized() {
            error!("upload statistics have not been initialized.");
            return Err(anyhow!(BackupError::StatisticsNotInitialized));
        }

        self.stats
            .set_totals(candidates.len() as u64, total_bytes(&candidates));

        if candidates.is_empty() {
            debug!("no upload candidates.");
            return Ok(UploadOutcome::default());
        }

        if self.control.stop_requested() {
            info!(
                files = candidates.len(),
                "stop has been requested before the upload. no file is uploaded."
            );
            return Ok(self.fail_unsubmitted(candidates.len() as u64));
        }

        let cancellation_token = create_pipeline_cancellation_token();
        self.control.register_executor(cancellation_token.clone());

        info!(
            files = candidates.len(),
            max_workers = options.max_workers,
            storage_class = options.storage_class,
            "upload has started."
        );

        let outcome = self
            .upload_with_probe(&candidates, options, &cancellation_token)
            .await;

        self.control.clear_executor();
        self.stats.clear_file_start_times();

        info!(
            successful = outcome.successful,
            failed = outcome.failed,
            "upload has been completed."
        );

        Ok(outcome)
    }

    async fn upload_with_probe(
        &self,
        candidates: &[FileCandidate],
        options: &UploadOptions,
        cancellation_token: &PipelineCancellationToken,
    ) -> UploadOutcome {
        let max_workers = options.max_workers.max(1);
        if options.probe_batch_size == 0 {
            return self
                .upload_batch(candidates, max_workers, options, cancellation_token)
                .await;
        }

        let probe_size = options.probe_batch_size.min(candidates.len());
        let (probe, remaining) = candidates.split_at(probe_size);

        let mut outcome = self
            .upload_batch(
                probe,
                max_workers.min(PROBE_BATCH_MAX_WORKERS),
                options,
                cancellation_token,
            )
            .await;

        if remaining.is_empty() {
            return outcome;
        }

        if self.control.stop_requested() {
            info!(
                remaining = remaining.len(),
                "upload stopped before the main batch."
            );
            outcome.merge(self.fail_unsubmitted(remaining.len() as u64));
            return outcome;
        }

        if outcome.successful == 0 {
            warn!(
                remaining = remaining.len(),
                "no file of the probe batch has been uploaded. remaining files are skipped."
            );
            outcome.merge(self.fail_unsubmitted(remaining.len() as u64));
            return outcome;
        }

        debug!("probe batch has succeeded. proceeding with all files.");
        outcome.merge(
            self.upload_batch(remaining, max_workers, options, cancellation_token)
                .await,
        );

        outcome
    }

    async fn upload_batch(
        &self,
        candidates: &[FileCandidate],
        workers: u16,
        options: &UploadOptions,
        cancellation_token: &PipelineCancellationToken,
    ) -> UploadOutcome {
        let (sender, receiver) = async_channel::bounded::<FileCandidate>(workers as usize);
        let (result_sender, result_receiver) = async_channel::unbounded::<UploadResult>();

        let mut worker_handles = Vec::with_capacity(workers as usize);
        for worker_index in 0..workers {
            let worker = UploadWorker::new(
                worker_index,
                self.store.clone(),
                self.stats.clone(),
                self.control.clone(),
                options.clone(),
                receiver.clone(),
                result_sender.clone(),
                cancellation_token.clone(),
            );
            worker_handles.push(tokio::spawn(async move { worker.run().await }));
        }
        drop(receiver);
        drop(result_sender);

        let control = self.control.clone();
        let feeder_token = cancellation_token.clone();
        let batch = candidates.to_vec();
        let feeder = tokio::spawn(async move {
            let mut submitted = 0;
            for candidate in batch {
                if control.stop_requested() {
                    info!("stop requested. remaining files are not submitted.");
                    break;
                }
                tokio::select! {
                    send_result = sender.send(candidate) => {
                        if send_result.is_err() {
                            break;
                        }
                        submitted += 1;
                    },
                    _ = feeder_token.cancelled() => break,
                }
            }
            trace!(submitted, "feeder has been completed.");
            submitted
        });

        let mut outcome = self
            .drain_results(&result_receiver, cancellation_token)
            .await;

        if cancellation_token.is_cancelled() {
            feeder.abort();
            for handle in &worker_handles {
                handle.abort();
            }
            self.store.reset_connection();
            warn!("upload workers have been aborted by force stop.");

            while let Ok(result) = result_receiver.try_recv() {
                self.record(result, &mut outcome);
            }
        } else {
            self.join_workers(worker_handles).await;
            if let Err(e) = feeder.await {
                error!(error = e.to_string(), "feeder task failed.");
            }
        }

        let unfinished = (candidates.len() as u64).saturating_sub(outcome.total());
        if unfinished > 0 {
            outcome.merge(self.fail_unsubmitted(unfinished));
        }

        outcome
    }

    async fn drain_results(
        &self,
        result_receiver: &Receiver<UploadResult>,
        cancellation_token: &PipelineCancellationToken,
    ) -> UploadOutcome {
        let mut outcome = UploadOutcome::default();
        let mut summary = tokio::time::interval_at(
            tokio::time::Instant::now() + PROGRESS_SUMMARY_INTERVAL,
            PROGRESS_SUMMARY_INTERVAL,
        );

        loop {
            tokio::select! {
                recv_result = result_receiver.recv() => {
                    match recv_result {
                        Ok(result) => self.record(result, &mut outcome),
                        Err(_) => break,
                    }
                },
                _ = cancellation_token.cancelled() => break,
                _ = summary.tick() => self.log_progress_summary(),
            }
        }

        outcome
    }

    async fn join_workers(&self, worker_handles: Vec<JoinHandle<Result<()>>>) {
        for handle in worker_handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = e.to_string(), "upload worker failed.");
                }
                Err(e) => {
                    error!(error = e.to_string(), "upload worker panicked.");
                }
            }
        }
    }

    fn record(&self, result: UploadResult, outcome: &mut UploadOutcome) {
        match result {
            UploadResult::Uploaded { key, bytes } => {
                self.stats.record_success(&key, bytes);
                outcome.successful += 1;
            }
            UploadResult::Failed { key } => {
                self.stats.record_failure(&key);
                outcome.failed += 1;
            }
            UploadResult::Cancelled { key } => {
                debug!(key = key, "upload has been cancelled.");
                self.stats.record_cancelled(1);
                outcome.failed += 1;
            }
        }

        if let Some(progress) = &self.progress {
            progress.on_progress(&self.stats.snapshot());
        }
    }

    fn fail_unsubmitted(&self, count: u64) -> UploadOutcome {
        info!(count, "files not uploaded because of a stop request are counted as failed.");
        self.stats.record_cancelled(count);
        UploadOutcome {
            successful: 0,
            failed: count,
        }
    }

    fn log_progress_summary(&self) {
        let snapshot = self.stats.snapshot();
        info!(
            processed = snapshot.processed(),
            total = snapshot.total_files,
            successful = snapshot.successful,
            failed = snapshot.failed,
            uploaded_bytes = snapshot.uploaded_bytes,
            "upload progress."
        );
    }
}
