use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tracing::{error, info, trace, warn};

use crate::pipeline::UploadOptions;
use crate::pipeline::control::UploadControl;
use crate::storage::Store;
use crate::types::token::PipelineCancellationToken;
use crate::types::{FileCandidate, UploadStatistics};

const RETRY_WAIT_STEP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UploadResult {
    Uploaded { key: String, bytes: u64 },
    Failed { key: String },
    Cancelled { key: String },
}

pub(crate) struct UploadWorker {
    worker_index: u16,
    store: Store,
    stats: Arc<UploadStatistics>,
    control: Arc<UploadControl>,
    options: UploadOptions,
    receiver: Receiver<FileCandidate>,
    sender: Sender<UploadResult>,
    cancellation_token: PipelineCancellationToken,
}

impl UploadWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_index: u16,
        store: Store,
        stats: Arc<UploadStatistics>,
        control: Arc<UploadControl>,
        options: UploadOptions,
        receiver: Receiver<FileCandidate>,
        sender: Sender<UploadResult>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            worker_index,
            store,
            stats,
            control,
            options,
            receiver,
            sender,
            cancellation_token,
        }
    }

    pub async fn run(&self) -> Result<()> {
        trace!(worker_index = self.worker_index, "upload worker has started.");

        loop {
            tokio::select! {
                recv_result = self.receiver.recv() => {
                    match recv_result {
                        Ok(candidate) => {
                            let result = self.upload_with_retry(&candidate).await;
                            if self.sender.send(result).await.is_err() {
                                trace!(worker_index = self.worker_index, "result channel has been closed.");
                                break;
                            }
                        },
                        Err(_) => {
                            // normal shutdown
                            trace!(worker_index = self.worker_index, "upload worker has been completed.");
                            break;
                        }
                    }
                },
                _ = self.cancellation_token.cancelled() => {
                    info!(worker_index = self.worker_index, "upload worker has been cancelled.");
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    async fn upload_with_retry(&self, candidate: &FileCandidate) -> UploadResult {
        let key = candidate.destination_key();
        if self.control.force_stop() {
            return UploadResult::Cancelled { key };
        }

        self.stats.mark_file_started(&key);
        let metadata = self.options.metadata(candidate);

        for attempt in 0..=self.options.max_retries {
            if self.control.force_stop() {
                return UploadResult::Cancelled { key };
            }

            let put = self.store.put(
                &candidate.path,
                &key,
                &self.options.storage_class,
                metadata.clone(),
            );
            let result = tokio::select! {
                result = put => result,
                _ = self.cancellation_token.cancelled() => {
                    info!(worker_index = self.worker_index, key = key, "upload has been interrupted by force stop.");
                    return UploadResult::Cancelled { key };
                }
            };

            match result {
                Ok(true) => {
                    info!(
                        worker_index = self.worker_index,
                        key = key,
                        size = candidate.size,
                        "file has been uploaded."
                    );
                    return UploadResult::Uploaded {
                        key,
                        bytes: candidate.size,
                    };
                }
                Ok(false) => {
                    warn!(
                        worker_index = self.worker_index,
                        key = key,
                        attempt = attempt + 1,
                        "upload attempt failed."
                    );
                }
                Err(e) => {
                    warn!(
                        worker_index = self.worker_index,
                        key = key,
                        attempt = attempt + 1,
                        error = e.to_string(),
                        source = e.source(),
                        "upload attempt failed."
                    );
                }
            }

            if attempt < self.options.max_retries && !self.wait_retry_delay().await {
                info!(
                    worker_index = self.worker_index,
                    key = key,
                    "retry has been abandoned by stop request."
                );
                return UploadResult::Cancelled { key };
            }
        }

        error!(
            worker_index = self.worker_index,
            key = key,
            path = candidate.path.display().to_string(),
            "upload failed after all attempts."
        );
        UploadResult::Failed { key }
    }

    /// Returns false if a stop was requested while waiting.
    async fn wait_retry_delay(&self) -> bool {
        let mut remaining = self.options.retry_delay;
        loop {
            if self.control.stop_requested() {
                return false;
            }
            if remaining.is_zero() {
                return true;
            }

            let step = remaining.min(RETRY_WAIT_STEP);
            tokio::select! {
                _ = tokio::time::sleep(step) => {},
                _ = self.cancellation_token.cancelled() => return false,
            }
            remaining -= step;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::pipeline::tests::{MockStore, candidates};
    use crate::types::token::create_pipeline_cancellation_token;

    use super::*;

    fn worker(
        store: MockStore,
        control: Arc<UploadControl>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> (UploadWorker, Sender<FileCandidate>, Receiver<UploadResult>) {
        let (sender, receiver) = async_channel::bounded(10);
        let (result_sender, result_receiver) = async_channel::unbounded();
        let stats = Arc::new(UploadStatistics::new());
        stats.reset("alice", None);
        let worker = UploadWorker::new(
            0,
            Box::new(store),
            stats,
            control,
            UploadOptions {
                max_workers: 1,
                max_retries,
                retry_delay,
                storage_class: "STANDARD".to_string(),
                probe_batch_size: 0,
                put_last_modified_metadata: false,
            },
            receiver,
            result_sender,
            create_pipeline_cancellation_token(),
        );
        (worker, sender, result_receiver)
    }

    #[tokio::test]
    async fn upload_and_complete_on_closed_channel() {
        init_dummy_tracing_subscriber();

        let (worker, sender, results) = worker(
            MockStore::default(),
            Arc::new(UploadControl::new()),
            0,
            Duration::ZERO,
        );
        for candidate in candidates(2) {
            sender.send(candidate).await.unwrap();
        }
        drop(sender);

        worker.run().await.unwrap();

        assert_eq!(
            results.recv().await.unwrap(),
            UploadResult::Uploaded {
                key: "full/job/file0.vbk".to_string(),
                bytes: 100
            }
        );
        assert!(matches!(
            results.recv().await.unwrap(),
            UploadResult::Uploaded { .. }
        ));
    }

    #[tokio::test]
    async fn force_stop_skips_io() {
        init_dummy_tracing_subscriber();

        let store = MockStore::default();
        let control = Arc::new(UploadControl::new());
        control.request_stop(false);
        let (worker, _, _) = worker(store.clone(), control, 0, Duration::ZERO);

        let result = worker.upload_with_retry(&candidates(1)[0]).await;

        assert!(matches!(result, UploadResult::Cancelled { .. }));
        assert_eq!(store.put_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_during_retry_delay() {
        init_dummy_tracing_subscriber();

        let store = MockStore {
            fail_all: true,
            ..Default::default()
        };
        let control = Arc::new(UploadControl::new());
        let (worker, _, _) = worker(store.clone(), control.clone(), 3, Duration::from_secs(60));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            control.request_stop(true);
        });

        let started = std::time::Instant::now();
        let result = worker.upload_with_retry(&candidates(1)[0]).await;

        assert!(matches!(result, UploadResult::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(store.put_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_with_fixed_delay() {
        init_dummy_tracing_subscriber();

        let store = MockStore {
            fail_all: true,
            ..Default::default()
        };
        let (worker, _, _) = worker(
            store.clone(),
            Arc::new(UploadControl::new()),
            2,
            Duration::from_millis(10),
        );

        let result = worker.upload_with_retry(&candidates(1)[0]).await;

        assert_eq!(
            result,
            UploadResult::Failed {
                key: "full/job/file0.vbk".to_string()
            }
        );
        assert_eq!(store.put_calls.load(Ordering::SeqCst), 3);
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
