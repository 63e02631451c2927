use crate::job_registry::JobRegistry;
use crate::storage;
use crate::util::{try_to_extract_panic_info, with_sentry_transaction};
use anyhow::anyhow;
use futures_util::FutureExt;
use rand::Rng;
use serde_json::Value;
use sqlx::SqlitePool;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info_span, trace, warn};

pub(crate) struct Worker<Context> {
    pub(crate) connection_pool: SqlitePool,
    pub(crate) context: Context,
    pub(crate) job_registry: Arc<JobRegistry<Context>>,
    pub(crate) shutdown_when_queue_empty: bool,
    pub(crate) poll_interval: Duration,
    pub(crate) jitter: Duration,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl<Context: Clone + Send + Sync + 'static> Worker<Context> {
    /// Calculate the sleep duration with random jitter applied.
    fn sleep_duration_with_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.poll_interval;
        }

        let jitter_millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let random_jitter = rand::thread_rng().gen_range(0..=jitter_millis);
        self.poll_interval + Duration::from_millis(random_jitter)
    }

    /// Sleeps for one poll interval. Returns `true` if shutdown was requested meanwhile.
    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let duration = self.sleep_duration_with_jitter();
        tokio::select! {
            () = sleep(duration) => false,
            Ok(()) = shutdown.changed() => *shutdown.borrow(),
        }
    }

    /// Run background jobs until shutdown is requested, or until the queue is
    /// empty if `shutdown_when_queue_empty` is set.
    #[allow(clippy::cognitive_complexity)]
    pub(crate) async fn run(&self) {
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                debug!("Shutdown requested. Stopping the worker…");
                break;
            }

            match self.run_next_job().await {
                Ok(Some(_)) => {}
                Ok(None) if self.shutdown_when_queue_empty => {
                    debug!("No pending background worker jobs found. Shutting down the worker…");
                    break;
                }
                Ok(None) => {
                    trace!("No pending background worker jobs found. Polling again…");
                    if self.idle(&mut shutdown).await {
                        debug!("Shutdown requested. Stopping the worker…");
                        break;
                    }
                }
                Err(error) => {
                    error!("Failed to fetch job: {error}");
                    if self.idle(&mut shutdown).await {
                        break;
                    }
                }
            }
        }
    }

    /// Run the next job in the queue, if there is one.
    ///
    /// Returns:
    /// - `Ok(Some(job_id))` if a job was taken off the queue, whether or not it succeeded
    /// - `Ok(None)` if no jobs were waiting
    /// - `Err(...)` if there was an error retrieving the job
    #[allow(clippy::cognitive_complexity)]
    async fn run_next_job(&self) -> anyhow::Result<Option<i64>> {
        let context = self.context.clone();
        let job_registry = self.job_registry.clone();
        let pool = &self.connection_pool;

        let job_types = job_registry.job_types();

        trace!("Looking for next background worker job…");

        let Some(job) = storage::dequeue_next_job(pool, &job_types).await? else {
            return Ok(None);
        };

        let span = info_span!("job", job.id = %job.id, job.type = %job.job_type);

        let job_id = job.id;
        let job_type = job.job_type;
        let raw_data = job.data;
        let run_task_fn = job_registry.get(&job_type);
        debug!(parent: &span, "Running job…");

        let unknown_type = job_type.clone();
        let future = with_sentry_transaction(&job_type, || async move {
            let run_task_fn =
                run_task_fn.ok_or_else(|| anyhow!("Unknown job type {unknown_type}"))?;
            let data: Value = serde_json::from_str(&raw_data)?;

            AssertUnwindSafe(run_task_fn(context, data))
                .catch_unwind()
                .await
                .map_err(|e| try_to_extract_panic_info(&*e))
                .and_then(std::convert::identity)
        });

        let result = future.instrument(span.clone()).await;

        let _enter = span.enter();
        match result {
            Ok(()) => debug!("Job completed"),
            // Delivery is at most once, so the job is gone either way
            Err(error) => warn!("Failed to run job, dropping it: {error:#}"),
        }

        Ok(Some(job_id))
    }
}
