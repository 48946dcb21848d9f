use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use crate::types::token::PipelineCancellationToken;

#[derive(Debug, Default)]
struct ControlState {
    stop_requested: bool,
    force_stop: bool,
    executor: Option<PipelineCancellationToken>,
}

/// Stop state of one upload run.
///
/// Shared by every worker of the run and the caller issuing the stop request. The
/// registered executor token belongs to the live worker pool; a force stop cancels it.
#[derive(Debug, Default)]
pub struct UploadControl {
    state: Mutex<ControlState>,
}

impl UploadControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clears both flags. The registered executor, if any, is kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.stop_requested = false;
        state.force_stop = false;
    }

    pub fn register_executor(&self, executor: PipelineCancellationToken) {
        let mut state = self.lock();
        if state.force_stop {
            debug!("force stop is pending, executor cancelled on registration.");
            executor.cancel();
        }
        state.executor = Some(executor);
    }

    pub fn clear_executor(&self) {
        self.lock().executor = None;
    }

    pub fn executor(&self) -> Option<PipelineCancellationToken> {
        self.lock().executor.clone()
    }

    pub fn request_stop(&self, finish_current: bool) {
        let mut state = self.lock();
        state.stop_requested = true;
        if finish_current && state.force_stop {
            debug!("force stop already requested, graceful request ignored.");
            return;
        }
        state.force_stop = !finish_current;

        if state.force_stop {
            if let Some(executor) = &state.executor {
                executor.cancel();
            }
            info!("force stop has been requested.");
        } else {
            info!("graceful stop has been requested.");
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    pub fn force_stop(&self) -> bool {
        self.lock().force_stop
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::types::token::create_pipeline_cancellation_token;

    use super::*;

    #[test]
    fn graceful_stop() {
        init_dummy_tracing_subscriber();

        let control = UploadControl::new();
        let executor = create_pipeline_cancellation_token();
        control.register_executor(executor.clone());

        control.request_stop(true);

        assert!(control.stop_requested());
        assert!(!control.force_stop());
        assert!(!executor.is_cancelled());
    }

    #[test]
    fn force_stop_cancels_registered_executor() {
        init_dummy_tracing_subscriber();

        let control = UploadControl::new();
        let executor = create_pipeline_cancellation_token();
        control.register_executor(executor.clone());

        control.request_stop(false);

        assert!(control.stop_requested());
        assert!(control.force_stop());
        assert!(executor.is_cancelled());
    }

    #[test]
    fn force_stop_before_registration() {
        init_dummy_tracing_subscriber();

        let control = UploadControl::new();
        control.request_stop(false);

        let executor = create_pipeline_cancellation_token();
        control.register_executor(executor.clone());

        assert!(executor.is_cancelled());
    }

    #[test]
    fn reset_and_clear_executor() {
        init_dummy_tracing_subscriber();

        let control = UploadControl::new();
        control.request_stop(false);
        control.reset();

        assert!(!control.stop_requested());
        assert!(!control.force_stop());

        let executor = create_pipeline_cancellation_token();
        control.register_executor(executor.clone());
        assert!(!executor.is_cancelled());
        assert!(control.executor().is_some());

        control.clear_executor();
        assert!(control.executor().is_none());

        control.request_stop(false);
        assert!(!executor.is_cancelled());
    }

    #[test]
    fn concurrent_stop_requests() {
        init_dummy_tracing_subscriber();

        let control = Arc::new(UploadControl::new());
        let executor = create_pipeline_cancellation_token();
        control.register_executor(executor.clone());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let control = control.clone();
                std::thread::spawn(move || {
                    control.request_stop(i % 2 == 0);
                    control.stop_requested()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert!(control.stop_requested());
        assert!(control.force_stop());
        assert!(executor.is_cancelled());
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
