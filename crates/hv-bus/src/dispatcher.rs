//! Dispatch workers.
//!
//! N workers cooperate on the shared priority queue. Each dequeued event is
//! transitioned to `processing`, its handlers run in registration order
//! with failures isolated from siblings, and the outcome drives the retry
//! state machine: failures re-enqueue with a linear backoff up to the
//! configured attempt cap, then terminate in `failed`.
//!
//! No lock is held across a handler call; a slow handler only occupies its
//! own worker while higher-priority events drain through the others.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use hv_common::{Event, ProcessingStatus};
use hv_config::DispatchOptions;
use hv_queue::PriorityQueue;

use crate::archive::EventArchive;
use crate::metrics::BusMetrics;
use crate::registry::{EventHandler, HandlerRegistry};

/// State shared between the facade and the workers.
pub(crate) struct DispatchContext {
    pub queue: Arc<PriorityQueue>,
    pub registry: Arc<HandlerRegistry>,
    pub metrics: Arc<BusMetrics>,
    pub archive: Arc<dyn EventArchive>,
    /// Event ids currently being dispatched; publish rejects these to keep
    /// handlers from recursing on their own event.
    pub in_flight: DashSet<String>,
    pub active: AtomicUsize,
    pub pending_retries: AtomicUsize,
    pub options: DispatchOptions,
    pub shutdown: watch::Receiver<bool>,
}

impl DispatchContext {
    /// True when nothing is queued, processing, or awaiting a retry timer.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
            && self.active.load(Ordering::SeqCst) == 0
            && self.pending_retries.load(Ordering::SeqCst) == 0
    }
}

pub(crate) fn spawn_workers(ctx: Arc<DispatchContext>, count: usize) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker_id| {
            let ctx = ctx.clone();
            tokio::spawn(run_worker(worker_id, ctx))
        })
        .collect()
}

async fn run_worker(worker_id: usize, ctx: Arc<DispatchContext>) {
    info!(worker_id = worker_id, "Dispatch worker started");
    let mut shutdown = ctx.shutdown.clone();

    loop {
        let event = tokio::select! {
            maybe = ctx.queue.dequeue_highest() => match maybe {
                Some(event) => event,
                None => break,
            },
            _ = flipped(&mut shutdown) => break,
        };

        ctx.active.fetch_add(1, Ordering::SeqCst);
        ctx.in_flight.insert(event.id.clone());
        dispatch_event(event, &ctx).await;
        ctx.active.fetch_sub(1, Ordering::SeqCst);
    }

    info!(worker_id = worker_id, "Dispatch worker exited");
}

async fn dispatch_event(mut event: Event, ctx: &Arc<DispatchContext>) {
    event.processing_status = ProcessingStatus::Processing;
    debug!(
        event_id = %event.id,
        category = %event.category,
        priority = %event.priority,
        retry_count = event.retry_count,
        "Dispatching event"
    );

    let handlers = ctx
        .registry
        .handlers_for(event.category, event.personal_log_only);

    let mut shutdown = ctx.shutdown.clone();
    let failures = tokio::select! {
        failures = run_handlers(&handlers, &event) => Some(failures),
        _ = flipped(&mut shutdown) => None,
    };

    let failures = match failures {
        Some(failures) => failures,
        None => {
            // Cancelled mid-dispatch: terminal, never re-enqueued.
            warn!(event_id = %event.id, "Event cancelled mid-dispatch");
            finalize(event, ProcessingStatus::Failed, ctx).await;
            return;
        }
    };

    if failures == 0 {
        finalize(event, ProcessingStatus::Completed, ctx).await;
        return;
    }

    event.retry_count += 1;
    if event.retry_count < ctx.options.max_retry_attempts {
        event.processing_status = ProcessingStatus::Retrying;
        ctx.metrics.record_retried();
        ctx.in_flight.remove(&event.id);
        schedule_retry(event, ctx.clone());
    } else {
        finalize(event, ProcessingStatus::Failed, ctx).await;
    }
}

/// Run every handler, isolating failures and panics. Returns the failure
/// count.
async fn run_handlers(handlers: &[Arc<dyn EventHandler>], event: &Event) -> usize {
    let mut failures = 0;

    for handler in handlers {
        let outcome = std::panic::AssertUnwindSafe(handler.handle(event))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    event_id = %event.id,
                    handler = handler.id(),
                    error = %e,
                    "Handler failed"
                );
                failures += 1;
            }
            Err(_) => {
                error!(
                    event_id = %event.id,
                    handler = handler.id(),
                    "Handler panicked"
                );
                failures += 1;
            }
        }
    }

    failures
}

async fn finalize(mut event: Event, status: ProcessingStatus, ctx: &Arc<DispatchContext>) {
    event.processing_status = status;
    match status {
        ProcessingStatus::Completed => ctx.metrics.record_completed(),
        ProcessingStatus::Failed => ctx.metrics.record_failed(),
        _ => {}
    }

    if let Err(e) = ctx.archive.record(&event).await {
        warn!(event_id = %event.id, error = %e, "Archive write failed");
    }

    ctx.in_flight.remove(&event.id);
}

/// Re-enqueue after `retry_delay * retry_count`. The timer honors the
/// shutdown signal: a cancelled retry finalizes as `failed`.
fn schedule_retry(event: Event, ctx: Arc<DispatchContext>) {
    let delay = Duration::from_secs(ctx.options.retry_delay_seconds * event.retry_count as u64);
    ctx.pending_retries.fetch_add(1, Ordering::SeqCst);
    debug!(
        event_id = %event.id,
        retry_count = event.retry_count,
        delay_secs = delay.as_secs(),
        "Retry scheduled"
    );

    tokio::spawn(async move {
        let mut shutdown = ctx.shutdown.clone();
        let mut event = event;

        let cancelled = tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = flipped(&mut shutdown) => true,
        };

        if cancelled {
            finalize(event, ProcessingStatus::Failed, &ctx).await;
        } else {
            event.processing_status = ProcessingStatus::Queued;
            if let Err(event) = ctx.queue.requeue(event) {
                finalize(event, ProcessingStatus::Failed, &ctx).await;
            }
        }

        ctx.pending_retries.fetch_sub(1, Ordering::SeqCst);
    });
}

/// Resolves once the shutdown signal flips to true; pends forever when the
/// sender is gone.
pub(crate) async fn flipped(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hv_common::EventCategory;

    struct OkHandler;
    struct FailingHandler;
    struct PanickingHandler;

    #[async_trait]
    impl EventHandler for OkHandler {
        fn id(&self) -> &str {
            "ok"
        }
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl EventHandler for FailingHandler {
        fn id(&self) -> &str {
            "failing"
        }
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[async_trait]
    impl EventHandler for PanickingHandler {
        fn id(&self) -> &str {
            "panicking"
        }
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            panic!("handler bug")
        }
    }

    #[tokio::test]
    async fn failures_and_panics_are_isolated() {
        let handlers: Vec<Arc<dyn EventHandler>> = vec![
            Arc::new(FailingHandler),
            Arc::new(PanickingHandler),
            Arc::new(OkHandler),
        ];
        let event = Event::new(EventCategory::System, "test", "isolated");

        // The panic and the error are both counted, and the trailing
        // handler still ran (run_handlers returned normally).
        let failures = run_handlers(&handlers, &event).await;
        assert_eq!(failures, 2);
    }
}
