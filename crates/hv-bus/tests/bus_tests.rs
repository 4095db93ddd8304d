//! End-to-end bus scenarios: priority ordering, capacity shedding, webhook
//! ingestion, personal-log routing, audit privacy, and shutdown drain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde_json::json;
use sha2::Sha256;
use tokio::sync::{mpsc, Semaphore};

use hv_bus::{BusError, EventBus, EventHandler, MemoryArchive};
use hv_common::{
    ChannelId, Event, EventCategory, EventPriority, DeliveryState, Message, MessageContent,
    PublishOutcome, Recipient, TopicCategory, TopicConfig, TransportKind, WebhookRegistration,
};
use hv_config::BusConfig;
use hv_delivery::{
    ChannelSink, DeliveryOutcome, MessagePipeline, RenderedBody, TemplateEngine, Transport,
};
use hv_personal_log::{CipherError, LogCipher};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

struct ScriptedTransport {
    kind: TransportKind,
    state: DeliveryState,
    bodies: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(kind: TransportKind, state: DeliveryState) -> Arc<Self> {
        Arc::new(Self {
            kind,
            state,
            bodies: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn deliver(
        &self,
        _recipient: &Recipient,
        body: &RenderedBody,
        _message: &Message,
    ) -> DeliveryOutcome {
        self.bodies.lock().push(body.text.clone());
        DeliveryOutcome {
            state: self.state,
            detail: None,
        }
    }
}

struct RecordingSink {
    posts: Mutex<Vec<(ChannelId, i32, String)>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            posts: Mutex::new(Vec::new()),
        })
    }

    fn posts(&self) -> Vec<(ChannelId, i32, String)> {
        self.posts.lock().clone()
    }
}

#[async_trait]
impl ChannelSink for RecordingSink {
    async fn post(&self, channel: ChannelId, topic_id: i32, text: &str) -> hv_delivery::Result<()> {
        self.posts.lock().push((channel, topic_id, text.to_string()));
        Ok(())
    }
}

struct PrefixCipher;

#[async_trait]
impl LogCipher for PrefixCipher {
    async fn encrypt(&self, _user_id: &str, plaintext: &str) -> Result<String, CipherError> {
        Ok(format!("ENC:{}", plaintext.len()))
    }
}

/// Records dispatched event titles in order.
struct OrderHandler {
    order: Mutex<Vec<String>>,
}

impl OrderHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            order: Mutex::new(Vec::new()),
        })
    }

    fn order(&self) -> Vec<String> {
        self.order.lock().clone()
    }
}

#[async_trait]
impl EventHandler for OrderHandler {
    fn id(&self) -> &str {
        "order-recorder"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self.order.lock().push(event.title.clone());
        Ok(())
    }
}

/// Blocks each invocation on a semaphore permit and reports entry, so tests
/// can control exactly when the single worker is busy.
struct GatedHandler {
    entered: mpsc::UnboundedSender<String>,
    gate: Arc<Semaphore>,
    order: Mutex<Vec<String>>,
}

#[async_trait]
impl EventHandler for GatedHandler {
    fn id(&self) -> &str {
        "gated"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let _ = self.entered.send(event.title.clone());
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        self.order.lock().push(event.title.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    bus: Arc<EventBus>,
    archive: Arc<MemoryArchive>,
    chat: Arc<ScriptedTransport>,
    email: Arc<ScriptedTransport>,
    sink: Arc<RecordingSink>,
}

fn harness_with(config: BusConfig) -> Harness {
    let archive = Arc::new(MemoryArchive::new());
    let chat = ScriptedTransport::new(TransportKind::Chat, DeliveryState::Sent);
    let email = ScriptedTransport::new(TransportKind::Email, DeliveryState::Failed);
    let sink = RecordingSink::new();

    let pipeline = MessagePipeline::new(Arc::new(TemplateEngine::new()))
        .with_transport(chat.clone())
        .with_transport(email.clone());

    let bus = Arc::new(EventBus::new(
        config,
        pipeline,
        sink.clone(),
        Arc::new(PrefixCipher),
        archive.clone(),
    ));

    Harness {
        bus,
        archive,
        chat,
        email,
        sink,
    }
}

fn single_worker_config() -> BusConfig {
    let mut config = BusConfig::default();
    config.dispatch.workers = 1;
    config.personal_log.personal_log_encryption = false;
    config
}

async fn wait_terminal(archive: &MemoryArchive, event_id: &str) -> serde_json::Value {
    for _ in 0..500 {
        if let Some(record) = archive.get(event_id) {
            let status = record["processing_status"].as_str().unwrap_or_default();
            if status == "completed" || status == "failed" {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("event {} never reached a terminal status", event_id);
}

fn payment_topic(encryption: Option<bool>) -> TopicConfig {
    TopicConfig {
        topic_id: 3,
        name: "Payments".into(),
        category: TopicCategory::Payments,
        hashtags: vec!["#payment".into()],
        event_categories: vec![EventCategory::Payment],
        sources: vec![],
        keywords: vec![],
        retention_hours: Some(168),
        encryption_required: encryption,
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn emergency_preempts_waiting_normals() {
    let harness = harness_with(single_worker_config());

    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let gate = Arc::new(Semaphore::new(0));
    let handler = Arc::new(GatedHandler {
        entered: entered_tx,
        gate: gate.clone(),
        order: Mutex::new(Vec::new()),
    });
    harness.bus.register_handler(EventCategory::Plugin, handler.clone());
    harness.bus.start();

    // First normal event occupies the single worker.
    let first = Event::new(EventCategory::Plugin, "test", "n0");
    let first_id = first.id.clone();
    harness.bus.publish(first).unwrap();
    assert_eq!(entered_rx.recv().await.unwrap(), "n0");

    // Nine more normals queue up, then one emergency arrives last.
    let mut ids = vec![first_id];
    for i in 1..10 {
        let event = Event::new(EventCategory::Plugin, "test", format!("n{}", i));
        ids.push(event.id.clone());
        harness.bus.publish(event).unwrap();
    }
    let emergency = Event::new(EventCategory::Plugin, "test", "emergency")
        .with_priority(EventPriority::Emergency);
    ids.push(emergency.id.clone());
    harness.bus.publish(emergency).unwrap();

    gate.add_permits(11);
    for id in &ids {
        wait_terminal(&harness.archive, id).await;
    }

    let order = handler.order.lock().clone();
    assert_eq!(order[0], "n0");
    assert_eq!(order[1], "emergency", "emergency must complete second");
    let rest: Vec<&String> = order[2..].iter().collect();
    let expected: Vec<String> = (1..10).map(|i| format!("n{}", i)).collect();
    assert_eq!(rest, expected.iter().collect::<Vec<&String>>());
}

#[tokio::test]
async fn within_priority_dispatch_is_fifo() {
    let harness = harness_with(single_worker_config());
    let handler = OrderHandler::new();
    harness.bus.register_handler(EventCategory::Plugin, handler.clone());

    let mut ids = Vec::new();
    for i in 0..5 {
        let event = Event::new(EventCategory::Plugin, "test", format!("e{}", i));
        ids.push(event.id.clone());
        harness.bus.publish(event).unwrap();
    }

    harness.bus.start();
    for id in &ids {
        wait_terminal(&harness.archive, id).await;
    }

    assert_eq!(handler.order(), vec!["e0", "e1", "e2", "e3", "e4"]);
}

#[tokio::test]
async fn queue_full_publish_is_dropped_with_counter() {
    let mut config = single_worker_config();
    config.queue.max_queue_size = 2;
    let harness = harness_with(config);
    // No start(): nothing consumes the queue.

    let r1 = harness.bus.publish(Event::new(EventCategory::System, "t", "e1")).unwrap();
    let r2 = harness.bus.publish(Event::new(EventCategory::System, "t", "e2")).unwrap();
    let r3 = harness.bus.publish(Event::new(EventCategory::System, "t", "e3")).unwrap();

    assert_eq!(r1.outcome, PublishOutcome::Accepted);
    assert_eq!(r2.outcome, PublishOutcome::Accepted);
    assert_eq!(r3.outcome, PublishOutcome::Dropped);

    let metrics = harness.bus.metrics();
    assert_eq!(metrics.events_dropped, 1);
    assert_eq!(metrics.events_enqueued, 2);
}

#[tokio::test]
async fn webhook_ingestion_end_to_end() {
    let harness = harness_with(single_worker_config());
    harness.bus.start();

    let mut registration = WebhookRegistration::new("w", "github");
    registration.verify_signature = true;
    registration.secret_token = Some("k".to_string());
    harness.bus.register_webhook(registration).unwrap();

    let payload = json!({"event_type": "push", "ref": "main"});
    let canonical = hv_webhook::canonical_json(&payload);
    let mut mac = Hmac::<Sha256>::new_from_slice(b"k").unwrap();
    mac.update(canonical.as_bytes());
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    let mut headers = HashMap::new();
    headers.insert("X-Signature".to_string(), signature);

    let report = harness.bus.process_webhook("w", &payload, &headers).await;
    assert!(report.verified);
    assert!(report.processed);

    let event_id = report.event_id.unwrap();
    let record = wait_terminal(&harness.archive, &event_id).await;
    assert_eq!(record["category"], "webhook");
    assert_eq!(record["source"], "github");
    assert_eq!(record["priority"], "normal");
    assert_eq!(record["data"], payload);
    assert_eq!(record["processing_status"], "completed");

    let metrics = harness.bus.metrics();
    assert_eq!(metrics.webhooks_received, 1);
    assert_eq!(metrics.webhooks_rejected, 0);
}

#[tokio::test]
async fn webhook_rejected_when_queue_is_full() {
    let mut config = single_worker_config();
    config.queue.max_queue_size = 1;
    let harness = harness_with(config);
    // Fill the normal sub-queue; no worker is draining it.
    harness.bus.publish(Event::new(EventCategory::System, "t", "filler")).unwrap();

    harness
        .bus
        .register_webhook(WebhookRegistration::new("w", "ci"))
        .unwrap();

    let report = harness
        .bus
        .process_webhook("w", &json!({"event_type": "build"}), &HashMap::new())
        .await;

    assert!(report.verified);
    assert!(!report.processed);
    assert_eq!(report.processing_error.as_deref(), Some("queue-full"));
    assert_eq!(harness.bus.metrics().webhooks_rejected, 1);
}

#[tokio::test]
async fn personal_log_with_encryption() {
    let harness = harness_with(single_worker_config());
    harness
        .bus
        .configure_personal_channel("u-1", ChannelId(-42), vec![payment_topic(Some(true))])
        .unwrap();
    harness.bus.start();

    let event = Event::new(EventCategory::Payment, "payments", "receipt").with_user("u-1");
    let event_id = event.id.clone();
    harness.bus.publish(event).unwrap();
    wait_terminal(&harness.archive, &event_id).await;

    let posts = harness.sink.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].0, ChannelId(-42));
    assert_eq!(posts[0].1, 3);
    assert!(posts[0].2.contains("ENC:"), "content must be ciphertext");
    assert!(!posts[0].2.contains("**Source**"), "plaintext body must not leave");
    assert_eq!(harness.bus.metrics().personal_logs_written, 1);
}

#[tokio::test]
async fn personal_log_only_skips_other_handlers() {
    let harness = harness_with(single_worker_config());
    let handler = OrderHandler::new();
    harness.bus.register_handler(EventCategory::Payment, handler.clone());
    harness
        .bus
        .configure_personal_channel("u-1", ChannelId(7), vec![payment_topic(Some(false))])
        .unwrap();
    harness.bus.start();

    let mut event = Event::new(EventCategory::Payment, "payments", "private").with_user("u-1");
    event.personal_log_only = true;
    let event_id = event.id.clone();
    harness.bus.publish(event).unwrap();
    wait_terminal(&harness.archive, &event_id).await;

    assert!(handler.order().is_empty(), "non-personal-log handlers must be skipped");
    assert_eq!(harness.sink.posts().len(), 1);
}

#[tokio::test]
async fn multi_recipient_fallback_and_success_rule() {
    let harness = harness_with(single_worker_config());
    harness.bus.start();

    let message = Message::new(
        MessageContent::Plain("hello".into()),
        vec![
            Recipient::Email("bad@example.invalid".into()),
            Recipient::Chat(12345),
        ],
    );
    let report = harness.bus.send(message).await.unwrap();

    assert!(report.success);
    assert_eq!(report.recipients[0].transport, TransportKind::Email);
    assert_eq!(report.recipients[0].state, DeliveryState::Failed);
    assert_eq!(report.recipients[1].transport, TransportKind::Chat);
    assert_eq!(report.recipients[1].state, DeliveryState::Sent);

    assert_eq!(harness.bus.metrics().messages_sent, 1);
    assert_eq!(harness.email.bodies.lock().len(), 1);
    assert_eq!(harness.chat.bodies.lock().len(), 1);
}

#[tokio::test]
async fn send_audit_event_never_carries_content() {
    let harness = harness_with(single_worker_config());
    harness.bus.start();

    let mut message = Message::new(
        MessageContent::Plain("SECRET-BODY".into()),
        vec![Recipient::Chat(99)],
    );
    message.subject = Some("quarterly report".into());
    message.user_id = Some("u-1".into());
    message.log_to_personal_server = true;
    message
        .template_variables
        .insert("token".into(), "SECRET-VAR".into());
    let message_id = message.id.clone();

    harness.bus.send(message).await.unwrap();

    // The audit event lands in the queue and completes; find its record by
    // the message id it references.
    let mut audit = None;
    for _ in 0..500 {
        audit = harness
            .archive
            .find(|r| r["data"]["message_id"] == message_id.as_str());
        if audit.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let audit = audit.expect("audit event was not archived");

    let serialized = audit.to_string();
    assert!(serialized.contains("Message sent: quarterly report"));
    assert!(serialized.contains("99"), "recipient address must be present");
    assert!(serialized.contains("chat"), "transport must be present");
    assert!(!serialized.contains("SECRET-BODY"), "content must not leak");
    assert!(!serialized.contains("SECRET-VAR"), "template variables must not leak");
}

#[tokio::test]
async fn no_recipients_is_rejected_without_transport_io() {
    let harness = harness_with(single_worker_config());
    harness.bus.start();

    let message = Message::new(MessageContent::Plain("x".into()), vec![]);
    let report = harness.bus.send(message).await.unwrap();

    assert!(!report.success);
    assert_eq!(report.error.as_deref(), Some("no-recipients"));
    assert_eq!(harness.bus.metrics().messages_failed, 1);
}

#[tokio::test]
async fn handlers_may_not_republish_their_own_event() {
    let harness = harness_with(single_worker_config());

    struct RecursiveHandler {
        bus: Mutex<Option<Arc<EventBus>>>,
        results: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl EventHandler for RecursiveHandler {
        fn id(&self) -> &str {
            "recursive"
        }

        async fn handle(&self, event: &Event) -> anyhow::Result<()> {
            let bus = self.bus.lock().clone().unwrap();

            // Republishing the in-flight id must be rejected.
            let mut same = event.clone();
            same.retry_count = 0;
            let rejected = matches!(bus.publish(same), Err(BusError::RecursivePublish(_)));

            // Publishing a fresh event is allowed.
            let fresh = Event::new(EventCategory::User, "recursive", "follow-up");
            let accepted = bus.publish(fresh).unwrap().accepted();

            self.results.lock().push(rejected && accepted);
            Ok(())
        }
    }

    let handler = Arc::new(RecursiveHandler {
        bus: Mutex::new(None),
        results: Mutex::new(Vec::new()),
    });
    *handler.bus.lock() = Some(harness.bus.clone());
    harness.bus.register_handler(EventCategory::Plugin, handler.clone());
    harness.bus.start();

    let event = Event::new(EventCategory::Plugin, "test", "trigger");
    let event_id = event.id.clone();
    harness.bus.publish(event).unwrap();
    wait_terminal(&harness.archive, &event_id).await;

    assert_eq!(handler.results.lock().as_slice(), &[true]);
}

#[tokio::test]
async fn shutdown_drains_then_rejects_new_publishes() {
    let harness = harness_with(single_worker_config());
    let handler = OrderHandler::new();
    harness.bus.register_handler(EventCategory::Plugin, handler.clone());
    harness.bus.start();

    let mut ids = Vec::new();
    for i in 0..3 {
        let event = Event::new(EventCategory::Plugin, "test", format!("e{}", i));
        ids.push(event.id.clone());
        harness.bus.publish(event).unwrap();
    }

    harness.bus.shutdown(Duration::from_secs(5)).await;

    // Every accepted event reached a terminal status.
    for id in &ids {
        let record = harness.archive.get(id).expect("event must be archived");
        let status = record["processing_status"].as_str().unwrap();
        assert!(status == "completed" || status == "failed");
    }

    // New publishes are rejected, not queued.
    let receipt = harness
        .bus
        .publish(Event::new(EventCategory::Plugin, "test", "late"))
        .unwrap();
    assert_eq!(receipt.outcome, PublishOutcome::Rejected);
}

#[tokio::test]
async fn health_reports_shutting_down() {
    let harness = harness_with(single_worker_config());
    harness.bus.start();
    assert_eq!(harness.bus.health().status, hv_common::HealthStatus::Healthy);

    harness.bus.shutdown(Duration::from_secs(1)).await;
    assert_eq!(
        harness.bus.health().status,
        hv_common::HealthStatus::ShuttingDown
    );
}
