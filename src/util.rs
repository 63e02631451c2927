use anyhow::anyhow;
use sentry_core::protocol::SpanStatus;
use sentry_core::{Hub, SentryFutureExt};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;

/// Runs `callback` inside its own Sentry hub and transaction named after the job type.
pub(crate) async fn with_sentry_transaction<F, Fut, R, E>(
    transaction_name: &str,
    callback: F,
) -> Result<R, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let hub = Hub::new_from_top(Hub::current());
    let _scope_guard = hub.push_scope();

    let tx_ctx = sentry_core::TransactionContext::new(transaction_name, "queue.task");
    let tx = sentry_core::start_transaction(tx_ctx);

    hub.configure_scope(|scope| scope.set_span(Some(tx.clone().into())));

    let result = callback().bind_hub(Arc::new(hub)).await;

    tx.set_status(if result.is_ok() {
        SpanStatus::Ok
    } else {
        SpanStatus::UnknownError
    });
    tx.finish();

    result
}

/// Turns a panic payload caught by `catch_unwind` into an error.
pub(crate) fn try_to_extract_panic_info(info: &(dyn Any + Send + 'static)) -> anyhow::Error {
    if let Some(message) = info.downcast_ref::<&'static str>() {
        anyhow!("job panicked: {message}")
    } else if let Some(message) = info.downcast_ref::<String>() {
        anyhow!("job panicked: {message}")
    } else {
        anyhow!("job panicked")
    }
}
