//! The event bus facade.
//!
//! One constructor takes every dependency; handler registration happens
//! synchronously inside it, and dispatch begins only when [`EventBus::start`]
//! spawns the workers. The upstream HTTP surface consumes these methods
//! through a thin translator.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hv_common::{
    ChannelId, ComponentHealth, Event, EventCategory, HealthSnapshot, HealthStatus,
    InboundWebhookReport, Message, MetricsSnapshot, ProcessingStatus, PublishOutcome,
    PublishReceipt, SendReport, TopicConfig, WebhookRegistration,
};
use hv_config::BusConfig;
use hv_delivery::{ChannelSink, MessagePipeline, TemplateEngine};
use hv_personal_log::{LogCipher, PersonalLogRouter};
use hv_queue::{EnqueueOutcome, PriorityQueue};
use hv_webhook::{WebhookError, WebhookProcessor};

use crate::archive::EventArchive;
use crate::broadcast::RealtimeBroadcaster;
use crate::dispatcher::{self, DispatchContext};
use crate::error::BusError;
use crate::metrics::BusMetrics;
use crate::registry::{EventHandler, HandlerRegistry, PERSONAL_LOG_HANDLER_ID};
use crate::Result;

pub struct EventBus {
    config: BusConfig,
    ctx: Arc<DispatchContext>,
    pipeline: Arc<MessagePipeline>,
    webhooks: Arc<WebhookProcessor>,
    personal_log: Arc<PersonalLogRouter>,
    broadcaster: Arc<RealtimeBroadcaster>,
    accepting: AtomicBool,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventBus {
    /// Wire the bus from its dependencies and register the internal
    /// handlers. No tasks run until [`start`](Self::start).
    pub fn new(
        config: BusConfig,
        pipeline: MessagePipeline,
        channel_sink: Arc<dyn ChannelSink>,
        cipher: Arc<dyn LogCipher>,
        archive: Arc<dyn EventArchive>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let queue = Arc::new(PriorityQueue::new(config.queue.max_queue_size));
        let registry = Arc::new(HandlerRegistry::new());
        let metrics = Arc::new(BusMetrics::new());
        let personal_log = Arc::new(PersonalLogRouter::new(
            channel_sink,
            cipher,
            config.personal_log.clone(),
        ));
        let broadcaster = Arc::new(RealtimeBroadcaster::new(config.realtime.clone()));

        let ctx = Arc::new(DispatchContext {
            queue,
            registry,
            metrics,
            archive,
            in_flight: DashSet::new(),
            active: AtomicUsize::new(0),
            pending_retries: AtomicUsize::new(0),
            options: config.dispatch.clone(),
            shutdown: shutdown_rx,
        });

        let bus = Self {
            config,
            ctx,
            pipeline: Arc::new(pipeline),
            webhooks: Arc::new(WebhookProcessor::new()),
            personal_log,
            broadcaster,
            accepting: AtomicBool::new(true),
            started: AtomicBool::new(false),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        };

        bus.register_internal_handlers();
        bus
    }

    fn register_internal_handlers(&self) {
        self.ctx
            .registry
            .register(EventCategory::System, Arc::new(SystemLogHandler));

        // The forwarder covers every category; user-scoped events of any
        // kind are eligible for personal-log routing.
        let forwarder = Arc::new(PersonalLogForwarder {
            router: self.personal_log.clone(),
        });
        for category in EventCategory::ALL {
            self.ctx.registry.register(category, forwarder.clone());
        }

        if self.config.realtime.websocket_enabled {
            for category in EventCategory::ALL {
                self.ctx
                    .registry
                    .register(category, self.broadcaster.clone());
            }
        }
    }

    /// Spawn the dispatch workers. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles = dispatcher::spawn_workers(self.ctx.clone(), self.config.dispatch.workers);
        *self.workers.lock() = handles;
        info!(workers = self.config.dispatch.workers, "Event bus started");
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    /// Enqueue an event. Never blocks; capacity overflow is reported in the
    /// receipt as `dropped`, and a shut-down bus reports `rejected`.
    pub fn publish(&self, mut event: Event) -> Result<PublishReceipt> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Ok(PublishReceipt {
                event_id: event.id,
                queued_at: Utc::now(),
                outcome: PublishOutcome::Rejected,
            });
        }

        if event.id.is_empty() {
            event.id = uuid::Uuid::new_v4().to_string();
        }

        if self.ctx.in_flight.contains(&event.id) {
            return Err(BusError::RecursivePublish(event.id));
        }

        let event_id = event.id.clone();
        let priority = event.priority;

        let outcome = match self.ctx.queue.enqueue(event) {
            EnqueueOutcome::Accepted => {
                self.ctx.metrics.record_enqueued(priority);
                PublishOutcome::Accepted
            }
            EnqueueOutcome::DroppedFull => {
                self.ctx.metrics.record_dropped(priority);
                PublishOutcome::Dropped
            }
            EnqueueOutcome::Closed => PublishOutcome::Rejected,
        };

        Ok(PublishReceipt {
            event_id,
            queued_at: Utc::now(),
            outcome,
        })
    }

    pub fn publish_batch(&self, events: Vec<Event>) -> Vec<Result<PublishReceipt>> {
        events.into_iter().map(|e| self.publish(e)).collect()
    }

    // ------------------------------------------------------------------
    // Message delivery
    // ------------------------------------------------------------------

    /// Deliver a message through the pipeline and, when requested, publish
    /// a communication audit event describing the send. The audit carries
    /// recipients, transports and outcomes; rendered content and template
    /// variables never enter the queue.
    pub async fn send(&self, mut message: Message) -> Result<SendReport> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(BusError::ShutdownInProgress);
        }

        let report = self
            .pipeline
            .send(&mut message, self.ctx.shutdown.clone())
            .await;
        self.ctx.metrics.record_message(report.success);

        if message.log_to_personal_server {
            if let Some(ref user_id) = message.user_id {
                let audit = audit_event(&message, &report, user_id);
                match self.publish(audit) {
                    Ok(receipt) if receipt.accepted() => {
                        debug!(message_id = %message.id, "Send audit event queued");
                    }
                    Ok(receipt) => {
                        warn!(message_id = %message.id, outcome = ?receipt.outcome, "Send audit event not queued");
                    }
                    Err(e) => {
                        warn!(message_id = %message.id, error = %e, "Send audit event rejected");
                    }
                }
            }
        }

        Ok(report)
    }

    // ------------------------------------------------------------------
    // Webhooks
    // ------------------------------------------------------------------

    pub fn register_webhook(&self, registration: WebhookRegistration) -> Result<()> {
        self.webhooks.register(registration).map_err(|e| match e {
            WebhookError::Conflict(id) => BusError::WebhookConflict(id),
        })
    }

    pub fn remove_webhook(&self, webhook_id: &str) -> bool {
        self.webhooks.remove(webhook_id)
    }

    /// Verify an inbound webhook call and inject the normalized event.
    pub async fn process_webhook(
        &self,
        webhook_id: &str,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> InboundWebhookReport {
        self.ctx.metrics.record_webhook_received();

        let timeout_seconds = self
            .webhooks
            .get(webhook_id)
            .map(|r| r.timeout_seconds)
            .unwrap_or(30);

        let decision = match tokio::time::timeout(
            Duration::from_secs(timeout_seconds),
            async { self.webhooks.process(webhook_id, payload, headers) },
        )
        .await
        {
            Ok(decision) => decision,
            Err(_) => {
                self.ctx.metrics.record_webhook_rejected();
                return InboundWebhookReport {
                    webhook_id: webhook_id.to_string(),
                    source: String::new(),
                    event_type: String::new(),
                    verified: false,
                    processed: false,
                    processing_error: Some("timeout".to_string()),
                    event_id: None,
                    received_at: Utc::now(),
                };
            }
        };

        let mut report = decision.report;

        if let Some(event) = decision.event {
            match self.publish(event) {
                Ok(receipt) if receipt.accepted() => {}
                Ok(receipt) => {
                    report.processed = false;
                    report.event_id = None;
                    report.processing_error = Some(match receipt.outcome {
                        PublishOutcome::Dropped => "queue-full".to_string(),
                        _ => "rejected".to_string(),
                    });
                }
                Err(e) => {
                    report.processed = false;
                    report.event_id = None;
                    report.processing_error = Some(e.to_string());
                }
            }
        }

        if !report.processed {
            self.ctx.metrics.record_webhook_rejected();
        }
        report
    }

    // ------------------------------------------------------------------
    // Registration surface
    // ------------------------------------------------------------------

    /// Register a subscriber. Idempotent on `(category, handler id)`.
    pub fn register_handler(
        &self,
        category: EventCategory,
        handler: Arc<dyn EventHandler>,
    ) -> bool {
        self.ctx.registry.register(category, handler)
    }

    pub fn register_template(&self, template: hv_common::MessageTemplate) {
        self.pipeline.templates().register(template);
    }

    pub fn configure_personal_channel(
        &self,
        user_id: impl Into<String>,
        channel: ChannelId,
        topics: Vec<TopicConfig>,
    ) -> Result<()> {
        self.personal_log
            .configure_channel(user_id, channel, topics)?;
        Ok(())
    }

    /// Attach a realtime subscriber (used by the WebSocket surface).
    pub fn subscribe_realtime(&self) -> broadcast::Receiver<Event> {
        self.broadcaster.subscribe()
    }

    pub fn templates(&self) -> &Arc<TemplateEngine> {
        self.pipeline.templates()
    }

    // ------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot(
            self.ctx.queue.depths(),
            (
                self.personal_log.logs_written(),
                self.personal_log.logs_skipped(),
                self.personal_log.logs_dropped(),
            ),
            self.webhooks.count() as u64,
            self.personal_log.configured_users() as u64,
        )
    }

    pub fn health(&self) -> HealthSnapshot {
        let shutting_down = !self.accepting.load(Ordering::SeqCst);
        let mut components = BTreeMap::new();

        let capacity = self.config.queue.max_queue_size as u64;
        let depths = self.ctx.queue.depths();
        components.insert(
            "queue".to_string(),
            if depths.iter().any(|d| *d >= capacity) {
                ComponentHealth::degraded("sub-queue at capacity")
            } else {
                ComponentHealth::healthy()
            },
        );

        components.insert(
            "dispatcher".to_string(),
            if self.started.load(Ordering::SeqCst) && !shutting_down {
                ComponentHealth::healthy()
            } else {
                ComponentHealth::degraded("workers not running")
            },
        );

        components.insert(
            "webhooks".to_string(),
            ComponentHealth {
                healthy: true,
                detail: Some(format!("{} registered", self.webhooks.count())),
            },
        );

        components.insert(
            "personal_log".to_string(),
            ComponentHealth {
                healthy: true,
                detail: Some(format!(
                    "{} users configured",
                    self.personal_log.configured_users()
                )),
            },
        );

        let status = if shutting_down {
            HealthStatus::ShuttingDown
        } else if components.values().any(|c| !c.healthy) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthSnapshot {
            status,
            components,
            checked_at: Utc::now(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stop accepting publishes, drain in-flight work until `deadline`,
    /// then cancel whatever remains. Every event the bus accepted reaches a
    /// terminal status before this returns.
    pub async fn shutdown(&self, deadline: Duration) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }

        info!(deadline_secs = deadline.as_secs(), "Event bus shutting down");

        let started = tokio::time::Instant::now();
        while started.elapsed() < deadline && !self.ctx.is_idle() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let drained = self.ctx.is_idle();

        // Cancel in-flight I/O and pending retry timers past the deadline.
        let _ = self.shutdown_tx.send(true);
        self.ctx.queue.close();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        // Anything still queued gets a terminal status without handlers.
        while let Some(mut event) = self.ctx.queue.try_dequeue() {
            event.processing_status = ProcessingStatus::Failed;
            self.ctx.metrics.record_failed();
            if let Err(e) = self.ctx.archive.record(&event).await {
                warn!(event_id = %event.id, error = %e, "Archive write failed during shutdown");
            }
        }

        while self.ctx.pending_retries.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let snapshot = self.metrics();
        info!(
            drained = drained,
            completed = snapshot.events_completed,
            failed = snapshot.events_failed,
            "Event bus stopped"
        );
    }
}

/// Audit event re-published after a send. Carries delivery metadata only.
fn audit_event(message: &Message, report: &SendReport, user_id: &str) -> Event {
    let subject = message.subject.as_deref().unwrap_or("No subject");

    let mut event = Event::new(
        EventCategory::Communication,
        "bus",
        format!("Message sent: {}", subject),
    );
    event.description = Some(format!(
        "Message delivered to {} recipient(s)",
        message.recipients.len()
    ));
    event.data = json!({
        "message_id": message.id,
        "status": report.status,
        "recipients": report
            .recipients
            .iter()
            .map(|o| o.recipient.address())
            .collect::<Vec<_>>(),
        "transports": report
            .recipients
            .iter()
            .map(|o| o.transport.as_str())
            .collect::<Vec<_>>(),
        "outcomes": report
            .recipients
            .iter()
            .map(|o| o.state)
            .collect::<Vec<_>>(),
    });
    event.user_id = Some(user_id.to_string());
    event.topic_hint = message.topic_hint;
    event.hashtags = vec!["#message_sent".to_string(), "#communication".to_string()];
    event
}

struct SystemLogHandler;

#[async_trait]
impl EventHandler for SystemLogHandler {
    fn id(&self) -> &str {
        "system-log"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        info!(
            event_id = %event.id,
            source = %event.source,
            title = %event.title,
            "System event processed"
        );
        Ok(())
    }
}

/// Forwards user-scoped events into the owner's personal log. Router-level
/// drops (no channel, encryption failure) are counted, never retried.
struct PersonalLogForwarder {
    router: Arc<PersonalLogRouter>,
}

#[async_trait]
impl EventHandler for PersonalLogForwarder {
    fn id(&self) -> &str {
        PERSONAL_LOG_HANDLER_ID
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        if event.is_user_scoped() {
            self.router.route(event).await;
        }
        Ok(())
    }
}
