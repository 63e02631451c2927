use crate::BackgroundJob;
use crate::job_registry::JobRegistry;
use crate::worker::Worker;
use futures_util::future::join_all;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, info_span, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_JITTER: Duration = Duration::from_millis(100);

/// Marker for a runner or queue with at least one job type registered
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Configured;
/// Marker for a runner or queue with nothing registered yet
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Unconfigured;

/// A set of job types served by its own pool of workers.
///
/// Workers only dequeue the job types registered on their queue, so a slow
/// job type can be given its own queue without starving the others.
#[derive(Debug)]
pub struct Queue<Context: Clone + Send + Sync + 'static, State = Unconfigured> {
    job_registry: JobRegistry<Context>,
    num_workers: usize,
    poll_interval: Duration,
    jitter: Duration,
    _state: PhantomData<State>,
}

impl<Context: Clone + Send + Sync + 'static> Default for Queue<Context, Unconfigured> {
    fn default() -> Self {
        Self {
            job_registry: JobRegistry::default(),
            num_workers: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
            jitter: DEFAULT_JITTER,
            _state: PhantomData,
        }
    }
}

impl<Context: Clone + Send + Sync + 'static, State> Queue<Context, State> {
    /// Number of concurrent workers. Zero is treated as one.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    /// How long an idle worker sleeps before looking for work again.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Upper bound of the random delay added to every idle sleep, so that
    /// workers started together do not poll in lockstep.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Serve jobs of type `J` from this queue.
    pub fn register<J: BackgroundJob<Context = Context>>(mut self) -> Queue<Context, Configured> {
        self.job_registry.register::<J>();
        Queue {
            job_registry: self.job_registry,
            num_workers: self.num_workers,
            poll_interval: self.poll_interval,
            jitter: self.jitter,
            _state: PhantomData,
        }
    }
}

/// Owns the queue configuration and starts the workers.
pub struct Runner<Context: Clone + Send + Sync + 'static, State = Unconfigured> {
    connection_pool: SqlitePool,
    queues: BTreeMap<String, Queue<Context, Configured>>,
    context: Context,
    shutdown_when_queue_empty: bool,
    _state: PhantomData<State>,
}

impl<Context: Clone + Sync + Send, State> std::fmt::Debug for Runner<Context, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("queues", &self.queues.keys().collect::<Vec<_>>())
            .field("shutdown_when_queue_empty", &self.shutdown_when_queue_empty)
            .finish_non_exhaustive()
    }
}

impl<Context: Clone + Send + Sync + 'static> Runner<Context> {
    /// A runner dequeuing from `connection_pool` and handing `context` to
    /// every job it runs.
    pub fn new(connection_pool: SqlitePool, context: Context) -> Self {
        Self {
            connection_pool,
            queues: BTreeMap::new(),
            context,
            shutdown_when_queue_empty: false,
            _state: PhantomData,
        }
    }
}

impl<Context: Clone + Send + Sync + 'static, State> Runner<Context, State> {
    /// Add a named queue, or replace the queue of that name.
    pub fn configure_queue(
        mut self,
        queue_name: &str,
        config_fn: impl FnOnce(Queue<Context>) -> Queue<Context, Configured>,
    ) -> Runner<Context, Configured> {
        self.queues
            .insert(queue_name.to_string(), config_fn(Queue::default()));

        Runner {
            connection_pool: self.connection_pool,
            queues: self.queues,
            context: self.context,
            shutdown_when_queue_empty: self.shutdown_when_queue_empty,
            _state: PhantomData,
        }
    }

    /// Stop each worker as soon as it finds no job of its types waiting.
    ///
    /// Used by tests and one-shot drains.
    pub fn shutdown_when_queue_empty(mut self) -> Self {
        self.shutdown_when_queue_empty = true;
        self
    }
}

impl<Context: Clone + Send + Sync + 'static> Runner<Context, Configured> {
    /// Spawn every queue's workers on the current tokio runtime.
    pub fn start(&self) -> RunHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        for (queue_name, queue) in &self.queues {
            let job_registry = Arc::new(queue.job_registry.clone());
            info!(
                queue = %queue_name,
                workers = queue.num_workers,
                job_types = ?job_registry.job_types(),
                "Starting queue"
            );

            for i in 1..=queue.num_workers {
                let worker = Worker {
                    connection_pool: self.connection_pool.clone(),
                    context: self.context.clone(),
                    job_registry: job_registry.clone(),
                    shutdown_when_queue_empty: self.shutdown_when_queue_empty,
                    poll_interval: queue.poll_interval,
                    jitter: queue.jitter,
                    shutdown: shutdown_rx.clone(),
                };
                let span = info_span!("worker", worker.name = %format!("{queue_name}-{i}"));
                handles.push(tokio::spawn(async move { worker.run().instrument(span).await }));
            }
        }

        RunHandle {
            handles,
            shutdown: shutdown_tx,
        }
    }
}

/// Handle to the spawned workers.
#[derive(Debug)]
pub struct RunHandle {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl RunHandle {
    /// Ask every worker to stop.
    ///
    /// Idle workers stop immediately; a worker that is running a job finishes
    /// it first.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait until every worker has exited.
    pub async fn wait_for_shutdown(self) {
        for result in join_all(self.handles).await {
            if let Err(error) = result {
                warn!(%error, "Worker task ended abnormally");
            }
        }
    }

    /// [`shutdown`](Self::shutdown), then [`wait_for_shutdown`](Self::wait_for_shutdown).
    pub async fn stop(self) {
        self.shutdown();
        self.wait_for_shutdown().await;
    }
}
