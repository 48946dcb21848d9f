use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};
use s3backup::scheduler::SchedulerService;
use s3backup::types::StatisticsSnapshot;
use s3backup::types::token::PipelineCancellationToken;
use simple_moving_average::{SMA, SumTreeSMA};
use tokio::task::JoinHandle;

const MOVING_AVERAGE_PERIOD_SECS: usize = 10;
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Polls the user's statistics once per second until `cancellation_token` is cancelled.
pub fn show_indicator(
    service: Arc<SchedulerService>,
    user_id: String,
    show_progress: bool,
    cancellation_token: PipelineCancellationToken,
) -> JoinHandle<()> {
    let progress_text = ProgressBar::new(0);
    progress_text.set_style(
        ProgressStyle::with_template("{wide_msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    tokio::spawn(async move {
        let mut ma_uploaded_bytes = SumTreeSMA::<_, u64, MOVING_AVERAGE_PERIOD_SECS>::new();
        let mut last_uploaded_bytes: u64 = 0;
        let mut interval = tokio::time::interval(REFRESH_INTERVAL);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let Some(snapshot) = service.get_statistics(&user_id) else {
                continue;
            };

            ma_uploaded_bytes.add_sample(snapshot.uploaded_bytes.saturating_sub(last_uploaded_bytes));
            last_uploaded_bytes = snapshot.uploaded_bytes;

            if show_progress {
                progress_text.set_message(progress_message(&snapshot, ma_uploaded_bytes.get_average()));
            }
        }

        if !show_progress {
            return;
        }

        match service.get_statistics(&user_id) {
            Some(snapshot) => {
                progress_text.set_style(
                    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                progress_text.finish_with_message(result_message(&snapshot));
                println!();
                let _ = io::stdout().flush();
            }
            None => progress_text.finish_and_clear(),
        }
    })
}

fn progress_message(snapshot: &StatisticsSnapshot, bytes_per_sec: u64) -> String {
    format!(
        "{:>3} | {:>3}/sec,  uploaded {}/{} files ({:.1}%),  failed {} files,  skipped {} files,  elapsed {}",
        HumanBytes(snapshot.uploaded_bytes),
        HumanBytes(bytes_per_sec),
        snapshot.successful,
        snapshot.total_files,
        snapshot.progress_percent(),
        snapshot.failed,
        snapshot.skipped_existing + snapshot.skipped_time + snapshot.skipped_size,
        HumanDuration(snapshot.elapsed),
    )
}

fn result_message(snapshot: &StatisticsSnapshot) -> String {
    format!(
        "{:>3} | {:>3}/sec,  uploaded {} files,  failed {} files,  cancelled {} files,  skipped {} files,  duration {}",
        HumanBytes(snapshot.uploaded_bytes),
        HumanBytes(snapshot.upload_speed() as u64),
        snapshot.successful,
        snapshot.failed,
        snapshot.cancelled,
        snapshot.skipped_existing + snapshot.skipped_time + snapshot.skipped_size,
        HumanDuration(snapshot.elapsed),
    )
}
