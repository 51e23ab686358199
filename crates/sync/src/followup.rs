use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinSet;
use tracing::{error, warn};

use dialsync_core::errors::ApplicationError;

/// Runs post-ingest work off the request path. Failures are logged and never
/// reach the caller that scheduled them.
#[derive(Default)]
pub struct FollowUpRunner {
    tasks: Mutex<JoinSet<()>>,
}

impl FollowUpRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, job: &'static str, correlation_id: String, work: F)
    where
        F: Future<Output = Result<(), ApplicationError>> + Send + 'static,
    {
        let mut tasks = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while let Some(finished) = tasks.try_join_next() {
            log_join_failure(finished);
        }

        tasks.spawn(async move {
            if let Err(failure) = work.await {
                warn!(
                    event_name = "followup.job.failed",
                    job,
                    correlation_id = %correlation_id,
                    error = %failure,
                    "follow-up job failed"
                );
            }
        });
    }

    pub fn pending(&self) -> usize {
        match self.tasks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Waits for every scheduled job. Used on shutdown and in tests.
    pub async fn drain(&self) {
        let mut tasks = {
            let mut guard = match self.tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };
        while let Some(finished) = tasks.join_next().await {
            log_join_failure(finished);
        }
    }
}

fn log_join_failure(result: Result<(), tokio::task::JoinError>) {
    if let Err(join_error) = result {
        error!(
            event_name = "followup.job.panicked",
            error = %join_error,
            "follow-up job did not complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use dialsync_core::errors::ApplicationError;

    use super::FollowUpRunner;

    #[tokio::test]
    async fn failures_are_contained_and_drain_waits_for_all_jobs() {
        let runner = FollowUpRunner::new();
        let done = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let done = done.clone();
            runner.spawn("count", "req-1".to_string(), async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        runner.spawn("fail", "req-1".to_string(), async {
            Err(ApplicationError::Persistence("disk full".to_string()))
        });
        runner.spawn("panic", "req-1".to_string(), async {
            Option::<()>::None.expect("job exploded");
            Ok(())
        });

        runner.drain().await;

        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(runner.pending(), 0);
    }
}
