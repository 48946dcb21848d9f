use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::time::Instant;
use tracing::{error, info, trace, warn};

use s3backup::Config;
use s3backup::config::StaticConfigProvider;
use s3backup::pipeline::control::UploadControl;
use s3backup::scanner::FileScanner;
use s3backup::scheduler::SchedulerService;
use s3backup::scheduler::history::InMemoryHistory;
use s3backup::scheduler::store::InMemoryScheduleStore;
use s3backup::storage::StoreFactory;
use s3backup::storage::s3::S3StoreFactory;
use s3backup::types::error::BackupError;
use s3backup::types::token::create_pipeline_cancellation_token;
use s3backup::types::{RunStatus, Schedule, SyncHistoryEntry, UploadMode, UploadStatistics};

mod ctrl_c_handler;
mod indicator;
mod ui_config;

#[allow(dead_code)]
const EXIT_CODE_SUCCESS: i32 = 0;
#[allow(dead_code)]
const EXIT_CODE_ERROR: i32 = 1;
const EXIT_CODE_WARNING: i32 = 3;

const CLI_SCHEDULE_NAME: &str = "cli";
const ACTIVE_RUN_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run(config: Config) -> Result<()> {
    if config.dry_run {
        return dry_run(&config).await;
    }

    let service = Arc::new(build_service(&config));

    if config.schedule.is_some() {
        return run_scheduler(config, service).await;
    }

    let exit_with_warning = {
        let start_time = Instant::now();
        trace!("upload start.");

        let handle = service
            .start_upload(&config.user_id, None, UploadMode::Auto, None)
            .await?;

        let cancellation_token = create_pipeline_cancellation_token();
        let ctrl_c_join_handle =
            ctrl_c_handler::spawn_ctrl_c_handler(service.clone(), cancellation_token.clone());
        let indicator_join_handle = indicator::show_indicator(
            service.clone(),
            config.user_id.clone(),
            ui_config::is_progress_indicator_needed(&config),
            cancellation_token.clone(),
        );

        let entry = handle.wait().await;
        cancellation_token.cancel();
        indicator_join_handle.await?;
        drop(ctrl_c_join_handle);

        let entry = entry?;
        let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());
        if entry.status == RunStatus::Failed {
            error!(
                duration_sec = duration_sec,
                error = entry.error.as_deref().unwrap_or_default(),
                "s3backup failed."
            );

            return Err(anyhow!("s3backup failed."));
        }

        show_run_summary(&entry);
        trace!(duration_sec = duration_sec, "s3backup has been completed.");

        has_warning(&entry)
    };

    if exit_with_warning {
        std::process::exit(EXIT_CODE_WARNING);
    }

    Ok(())
}

fn build_service(config: &Config) -> SchedulerService {
    SchedulerService::new(
        Arc::new(
            StaticConfigProvider::new().with_config(&config.user_id, config.backup_config.clone()),
        ),
        Arc::new(S3StoreFactory::default()),
        Arc::new(InMemoryHistory::new()),
        Arc::new(InMemoryScheduleStore::new()),
    )
}

fn has_warning(entry: &SyncHistoryEntry) -> bool {
    entry.status == RunStatus::Cancelled || entry.files_failed > 0
}

async fn run_scheduler(config: Config, service: Arc<SchedulerService>) -> Result<()> {
    let Some(schedule_config) = config.schedule.as_ref() else {
        return Ok(());
    };

    config.backup_config.validate()?;

    let schedule = service.add_schedule(Schedule::new(
        CLI_SCHEDULE_NAME,
        schedule_config.schedule_type,
        &schedule_config.interval,
        &config.user_id,
    ))?;
    service.start()?;

    info!(
        schedule_id = schedule.id,
        interval = schedule.interval_display(),
        next_run = schedule.next_run.map(|next_run| next_run.to_rfc3339()),
        "waiting for the next scheduled run. press ctrl-c to stop."
    );

    let cancellation_token = create_pipeline_cancellation_token();
    let _ctrl_c_join_handle =
        ctrl_c_handler::spawn_ctrl_c_handler(service.clone(), cancellation_token.clone());

    cancellation_token.cancelled().await;

    while service.is_running(&config.user_id) {
        tokio::time::sleep(ACTIVE_RUN_POLL_INTERVAL).await;
    }

    let stats = service.get_schedule_stats(&schedule.id);
    if let Some(stats) = stats {
        info!(
            total_runs = stats.total_runs,
            successful_runs = stats.successful_runs,
            failed_runs = stats.failed_runs,
            total_files_uploaded = stats.total_files_uploaded,
            "scheduler has been stopped."
        );
    }

    Ok(())
}

async fn dry_run(config: &Config) -> Result<()> {
    let backup_config = &config.backup_config;
    backup_config.validate()?;

    let store = S3StoreFactory::default()
        .connect(&config.user_id, backup_config)
        .await?;
    if !store.test_connection().await {
        return Err(anyhow!(BackupError::Connectivity(format!(
            "cannot connect to {}",
            backup_config.s3_endpoint
        ))));
    }
    let existing_keys = store
        .list_existing_keys()
        .await
        .context("list_existing_keys() failed.")?;

    let stats = Arc::new(UploadStatistics::new());
    stats.reset(&config.user_id, Some(backup_config.storage_class.clone()));
    let candidates = FileScanner::new(stats.clone(), Arc::new(UploadControl::new()))
        .scan_async(
            &backup_config.nfs_path,
            Arc::new(existing_keys),
            backup_config.scan_filters(None),
        )
        .await?;

    for candidate in &candidates {
        info!(
            key = candidate.destination_key(),
            category = candidate.category,
            size = candidate.size,
            "[dry-run] upload skipped."
        );
    }

    let snapshot = stats.snapshot();
    info!(
        candidates = snapshot.total_files,
        total_bytes = snapshot.total_bytes,
        skipped_existing = snapshot.skipped_existing,
        skipped_time = snapshot.skipped_time,
        skipped_size = snapshot.skipped_size,
        "[dry-run] scan summary."
    );

    Ok(())
}

fn show_run_summary(entry: &SyncHistoryEntry) {
    if has_warning(entry) {
        warn!(
            status = entry.status.to_string(),
            uploaded = entry.files_uploaded,
            failed = entry.files_failed,
            error = entry.error.as_deref(),
            "upload finished with warnings."
        );
        return;
    }

    info!(
        status = entry.status.to_string(),
        uploaded = entry.files_uploaded,
        uploaded_bytes = entry.uploaded_bytes,
        duration = entry.duration_display(),
        "upload summary."
    );
}
