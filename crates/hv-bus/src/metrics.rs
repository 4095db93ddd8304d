//! Bus counters and health snapshot assembly.
//!
//! Counters are plain atomics read into a [`MetricsSnapshot`] on demand and
//! mirrored to the `metrics` facade for Prometheus export.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};

use hv_common::{EventPriority, MetricsSnapshot};

#[derive(Debug, Default)]
pub struct BusMetrics {
    events_enqueued: AtomicU64,
    events_dropped: AtomicU64,
    events_completed: AtomicU64,
    events_failed: AtomicU64,
    events_retried: AtomicU64,
    messages_sent: AtomicU64,
    messages_failed: AtomicU64,
    webhooks_received: AtomicU64,
    webhooks_rejected: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self, priority: EventPriority) {
        self.events_enqueued.fetch_add(1, Ordering::SeqCst);
        counter!("hv_events_enqueued_total", "priority" => priority.as_str()).increment(1);
    }

    pub fn record_dropped(&self, priority: EventPriority) {
        self.events_dropped.fetch_add(1, Ordering::SeqCst);
        counter!("hv_events_dropped_total", "priority" => priority.as_str()).increment(1);
    }

    pub fn record_completed(&self) {
        self.events_completed.fetch_add(1, Ordering::SeqCst);
        counter!("hv_events_completed_total").increment(1);
    }

    pub fn record_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::SeqCst);
        counter!("hv_events_failed_total").increment(1);
    }

    pub fn record_retried(&self) {
        self.events_retried.fetch_add(1, Ordering::SeqCst);
        counter!("hv_events_retried_total").increment(1);
    }

    pub fn record_message(&self, success: bool) {
        if success {
            self.messages_sent.fetch_add(1, Ordering::SeqCst);
        } else {
            self.messages_failed.fetch_add(1, Ordering::SeqCst);
        }
        counter!("hv_messages_total", "success" => if success { "true" } else { "false" })
            .increment(1);
    }

    pub fn record_webhook_received(&self) {
        self.webhooks_received.fetch_add(1, Ordering::SeqCst);
        counter!("hv_webhooks_received_total").increment(1);
    }

    pub fn record_webhook_rejected(&self) {
        self.webhooks_rejected.fetch_add(1, Ordering::SeqCst);
        counter!("hv_webhooks_rejected_total").increment(1);
    }

    pub fn events_failed(&self) -> u64 {
        self.events_failed.load(Ordering::SeqCst)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::SeqCst)
    }

    /// Assemble the snapshot; gauge-like values are sampled by the caller.
    pub fn snapshot(
        &self,
        queue_depths: [u64; 5],
        personal_logs: (u64, u64, u64),
        registered_webhooks: u64,
        configured_users: u64,
    ) -> MetricsSnapshot {
        let (written, skipped, dropped) = personal_logs;

        for (i, depth) in queue_depths.iter().enumerate() {
            let priority = EventPriority::DESCENDING[4 - i];
            gauge!("hv_queue_depth", "priority" => priority.as_str()).set(*depth as f64);
        }
        gauge!("hv_registered_webhooks").set(registered_webhooks as f64);
        gauge!("hv_configured_users").set(configured_users as f64);

        MetricsSnapshot {
            events_enqueued: self.events_enqueued.load(Ordering::SeqCst),
            events_dropped: self.events_dropped.load(Ordering::SeqCst),
            events_completed: self.events_completed.load(Ordering::SeqCst),
            events_failed: self.events_failed.load(Ordering::SeqCst),
            events_retried: self.events_retried.load(Ordering::SeqCst),
            messages_sent: self.messages_sent.load(Ordering::SeqCst),
            messages_failed: self.messages_failed.load(Ordering::SeqCst),
            webhooks_received: self.webhooks_received.load(Ordering::SeqCst),
            webhooks_rejected: self.webhooks_rejected.load(Ordering::SeqCst),
            personal_logs_written: written,
            personal_logs_skipped: skipped,
            personal_logs_dropped: dropped,
            queue_depths,
            registered_webhooks,
            configured_users,
        }
    }
}
