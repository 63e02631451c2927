use crate::errors::EnqueueError;
use crate::storage;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use std::future::Future;
use tracing::instrument;

/// Trait for defining background jobs that can be enqueued and executed asynchronously.
pub trait BackgroundJob: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name of the task.
    ///
    /// This MUST be unique for the whole application.
    const JOB_TYPE: &'static str;

    /// The application data provided to this job at runtime.
    type Context: Clone + Send + 'static;

    /// Execute the task. This method should define its logic.
    ///
    /// Jobs are delivered at most once: an error or panic is logged by the
    /// worker and the job is dropped.
    fn run(&self, ctx: Self::Context) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Enqueue this job for background execution.
    ///
    /// Returns the queue id of the inserted row.
    #[instrument(name = "workers.enqueue", skip(self, pool), fields(message = Self::JOB_TYPE))]
    fn enqueue<'a>(&'a self, pool: &'a SqlitePool) -> BoxFuture<'a, Result<i64, EnqueueError>> {
        let data = match serde_json::to_string(self) {
            Ok(data) => data,
            Err(err) => return async move { Err(EnqueueError::SerializationError(err)) }.boxed(),
        };

        async move { Ok(storage::insert_job(pool, Self::JOB_TYPE, &data).await?) }.boxed()
    }
}
