use crate::BackgroundJob;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

type RunTaskFn<Context> = dyn Fn(Context, Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Maps job type names to type-erased runners.
pub(crate) struct JobRegistry<Context> {
    entries: HashMap<String, Arc<RunTaskFn<Context>>>,
}

impl<Context> Default for JobRegistry<Context> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<Context> Clone for JobRegistry<Context> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<Context> std::fmt::Debug for JobRegistry<Context> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<Context: Clone + Send + Sync + 'static> JobRegistry<Context> {
    pub(crate) fn register<J: BackgroundJob<Context = Context>>(&mut self) {
        let run_task_fn: Arc<RunTaskFn<Context>> = Arc::new(|ctx: Context, data: Value| {
            async move {
                let job: J = serde_json::from_value(data)?;
                job.run(ctx).await
            }
            .boxed()
        });
        self.entries.insert(J::JOB_TYPE.to_string(), run_task_fn);
    }

    pub(crate) fn job_types(&self) -> Vec<String> {
        let mut job_types: Vec<String> = self.entries.keys().cloned().collect();
        job_types.sort();
        job_types
    }

    pub(crate) fn get(&self, job_type: &str) -> Option<Arc<RunTaskFn<Context>>> {
        self.entries.get(job_type).cloned()
    }
}
