use crate::{context::AppContext, error::CmsResult, metrics};
use std::{future::Future, sync::Arc, time::Instant};
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        // Spawn consistency tasks
        tokio::spawn(Self::orphan_sweep_job(Arc::clone(&self)));
        tokio::spawn(Self::reference_reconcile_job(Arc::clone(&self)));

        // Spawn monitoring tasks
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));
        tokio::spawn(Self::uptime_job());

        info!("Background jobs started");
    }

    fn consistency_interval(&self) -> Duration {
        Duration::from_secs(self.context.config.jobs.orphan_sweep_interval_secs.max(60))
    }

    /// Remove orphaned blob files (default every 6 hours)
    async fn orphan_sweep_job(scheduler: Arc<Self>) {
        let mut interval = interval(scheduler.consistency_interval());

        loop {
            interval.tick().await;
            info!("Running orphan blob sweep");

            match timed("orphan_sweep", tasks::sweep_orphan_blobs(&scheduler.context)).await {
                Ok(count) => {
                    if count == 0 {
                        info!("Orphan sweep: no orphaned blobs found");
                    }
                }
                Err(e) => error!("Failed to sweep orphaned blobs: {}", e),
            }
        }
    }

    /// Recompute reference counts (same cadence as the sweep)
    async fn reference_reconcile_job(scheduler: Arc<Self>) {
        let mut interval = interval(scheduler.consistency_interval());

        loop {
            interval.tick().await;
            info!("Running reference count reconciliation");

            if let Err(e) = timed(
                "reference_reconcile",
                tasks::reconcile_reference_counts(&scheduler.context),
            )
            .await
            {
                error!("Failed to reconcile reference counts: {}", e);
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300)); // Every 5 minutes

        loop {
            interval.tick().await;

            match timed("health_check", tasks::health_check(&scheduler.context)).await {
                Ok(_) => {
                    // Silent success - health is good
                }
                Err(e) => error!("Health check failed: {}", e),
            }
        }
    }

    /// Keep the uptime gauge current
    async fn uptime_job() {
        let started = Instant::now();
        let mut interval = interval(Duration::from_secs(15));

        loop {
            interval.tick().await;
            metrics::UPTIME_SECONDS.set(started.elapsed().as_secs_f64());
        }
    }
}

/// Run a job body and record its outcome and duration
async fn timed<T, F>(job_type: &str, job: F) -> CmsResult<T>
where
    F: Future<Output = CmsResult<T>>,
{
    let start = Instant::now();
    let result = job.await;
    let status = if result.is_ok() { "success" } else { "failure" };
    metrics::record_background_job(job_type, status, start.elapsed().as_secs_f64());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CmsError;

    #[tokio::test]
    async fn test_timed_records_outcome() {
        let ok = timed("test_job", async { Ok::<_, CmsError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let failed = timed("test_job", async {
            Err::<(), _>(CmsError::Internal("boom".to_string()))
        })
        .await;
        assert!(failed.is_err());

        assert_eq!(
            metrics::BACKGROUND_JOBS_TOTAL
                .with_label_values(&["test_job", "failure"])
                .get(),
            1
        );
    }
}
