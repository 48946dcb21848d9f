use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::{select, signal};
use tracing::{debug, error, warn};

use s3backup::scheduler::SchedulerService;
use s3backup::types::StopMode;
use s3backup::types::token::PipelineCancellationToken;

/// The first ctrl-c cancels `cancellation_token`, shuts the scheduler down and asks every
/// active run to stop gracefully. The second one force stops them.
pub fn spawn_ctrl_c_handler(
    service: Arc<SchedulerService>,
    cancellation_token: PipelineCancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        select! {
            _ = cancellation_token.cancelled() => {
                debug!("cancellation_token canceled.");
                return;
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("failed to listen for ctrl-c signal: {e}");
                    return;
                }
            }
        }

        warn!("ctrl-c received, stopping after the current uploads. press ctrl-c again to force stop.");
        cancellation_token.cancel();
        service.shutdown();
        service.request_stop_all(StopMode::Graceful);

        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("ctrl-c received again, cancelling the current uploads.");
                service.request_stop_all(StopMode::Force);
            }
            Err(e) => {
                error!("failed to listen for ctrl-c signal: {e}");
            }
        }
    })
}
