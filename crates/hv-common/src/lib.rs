use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod logging;

// ============================================================================
// Events
// ============================================================================

/// Category tag attached to every event; handler lookup keys on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    System,
    User,
    Plugin,
    Payment,
    Security,
    Communication,
    Webhook,
    Error,
}

impl EventCategory {
    pub const ALL: [EventCategory; 8] = [
        EventCategory::System,
        EventCategory::User,
        EventCategory::Plugin,
        EventCategory::Payment,
        EventCategory::Security,
        EventCategory::Communication,
        EventCategory::Webhook,
        EventCategory::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::System => "system",
            EventCategory::User => "user",
            EventCategory::Plugin => "plugin",
            EventCategory::Payment => "payment",
            EventCategory::Security => "security",
            EventCategory::Communication => "communication",
            EventCategory::Webhook => "webhook",
            EventCategory::Error => "error",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch priority, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
    Emergency,
}

impl EventPriority {
    /// All levels, highest first — the dispatcher drains in this order.
    pub const DESCENDING: [EventPriority; 5] = [
        EventPriority::Emergency,
        EventPriority::Critical,
        EventPriority::High,
        EventPriority::Normal,
        EventPriority::Low,
    ];

    /// Stable index into per-level storage (0 = low .. 4 = emergency).
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventPriority::Low => "low",
            EventPriority::Normal => "normal",
            EventPriority::High => "high",
            EventPriority::Critical => "critical",
            EventPriority::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for EventPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for EventPriority {
    fn default() -> Self {
        EventPriority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Retrying,
}

/// A structured notification accepted by the bus and fanned out to handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub category: EventCategory,
    /// Free-form producing module identifier (e.g. "identity", "payments").
    pub source: String,
    #[serde(default)]
    pub priority: EventPriority,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Opaque structured payload.
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub hashtags: Vec<String>,
    /// Present on user-scoped events; makes the event eligible for
    /// personal-log routing.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Explicit topic override for the personal-log router.
    #[serde(default)]
    pub topic_hint: Option<TopicCategory>,
    /// When set, handlers other than the personal-log forwarder are skipped.
    #[serde(default)]
    pub personal_log_only: bool,
    pub processing_status: ProcessingStatus,
    #[serde(default)]
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(category: EventCategory, source: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category,
            source: source.into(),
            priority: EventPriority::Normal,
            title: title.into(),
            description: None,
            data: serde_json::Value::Null,
            hashtags: Vec::new(),
            user_id: None,
            topic_hint: None,
            personal_log_only: false,
            processing_status: ProcessingStatus::Queued,
            retry_count: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn is_user_scoped(&self) -> bool {
        self.user_id.is_some()
    }
}

// ============================================================================
// Messages & delivery
// ============================================================================

/// Delivery backend kinds understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Chat,
    Email,
    Webhook,
    Sms,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Chat => "chat",
            TransportKind::Email => "email",
            TransportKind::Webhook => "webhook",
            TransportKind::Sms => "sms",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivery target. The address type is transport-specific: chat channels
/// are signed 64-bit ids, everything else is a string address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", content = "address", rename_all = "snake_case")]
pub enum Recipient {
    Chat(i64),
    Email(String),
    Webhook(String),
    Sms(String),
}

impl Recipient {
    pub fn kind(&self) -> TransportKind {
        match self {
            Recipient::Chat(_) => TransportKind::Chat,
            Recipient::Email(_) => TransportKind::Email,
            Recipient::Webhook(_) => TransportKind::Webhook,
            Recipient::Sms(_) => TransportKind::Sms,
        }
    }

    pub fn address(&self) -> String {
        match self {
            Recipient::Chat(id) => id.to_string(),
            Recipient::Email(a) | Recipient::Webhook(a) | Recipient::Sms(a) => a.clone(),
        }
    }
}

/// Canonical message body. Ciphertext is written through transports
/// unchanged; plaintext is what the pipeline renders and delivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageContent {
    Plain(String),
    /// ASCII-armored output of the external encryption service.
    Ciphertext(String),
}

impl MessageContent {
    pub fn as_text(&self) -> &str {
        match self {
            MessageContent::Plain(s) | MessageContent::Ciphertext(s) => s,
        }
    }

    pub fn is_ciphertext(&self) -> bool {
        matches!(self, MessageContent::Ciphertext(_))
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Plain(String::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

/// An outbound unit delivered to external recipients over one or more
/// transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub content: MessageContent,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub template_variables: BTreeMap<String, String>,
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub topic_hint: Option<TopicCategory>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub log_to_personal_server: bool,
    pub status: MessageStatus,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(content: MessageContent, recipients: Vec<Recipient>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            subject: None,
            content,
            template_id: None,
            template_variables: BTreeMap::new(),
            recipients,
            topic_hint: None,
            hashtags: Vec::new(),
            log_to_personal_server: false,
            status: MessageStatus::Pending,
            delivered_at: None,
        }
    }
}

/// A named template with per-transport body variants. `{var}` placeholders
/// are substituted at render time; unresolved placeholders stay literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: String,
    pub variants: BTreeMap<TransportKind, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Failed,
}

impl DeliveryState {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryState::Sent | DeliveryState::Delivered)
    }
}

/// Outcome of one delivery attempt to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientOutcome {
    pub recipient: Recipient,
    pub transport: TransportKind,
    pub state: DeliveryState,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Aggregate response of a `send` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReport {
    pub message_id: String,
    pub status: MessageStatus,
    pub success: bool,
    pub recipients: Vec<RecipientOutcome>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SendReport {
    pub fn failure(message_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            status: MessageStatus::Failed,
            success: false,
            recipients: Vec::new(),
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// Personal log
// ============================================================================

/// User-local partition category inside a personal log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicCategory {
    Authentication,
    Plugin,
    Payments,
    Communication,
    System,
    General,
}

/// Opaque handle to a user's log channel, produced by external provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classifier configuration for one topic of a user's personal log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub topic_id: i32,
    pub name: String,
    pub category: TopicCategory,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub event_categories: Vec<EventCategory>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Time-to-live on entries; the bus default applies when absent.
    #[serde(default)]
    pub retention_hours: Option<u32>,
    /// The `personal_log_encryption` global applies when absent.
    #[serde(default)]
    pub encryption_required: Option<bool>,
}

/// One line mirrored into a user's personal log channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalLogEntry {
    pub id: String,
    pub user_id: String,
    pub channel_id: ChannelId,
    pub topic_id: i32,
    pub source_event_id: String,
    pub title: String,
    pub content: String,
    pub hashtags: Vec<String>,
    pub logged_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub encrypted: bool,
}

// ============================================================================
// Webhooks
// ============================================================================

/// Process-level registration for an inbound webhook producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub id: String,
    pub source: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Allowlist of `event_type` values; empty accepts all.
    #[serde(default)]
    pub event_types: Vec<String>,
    pub active: bool,
    pub verify_signature: bool,
    #[serde(default)]
    pub secret_token: Option<String>,
    /// Enforced by the HTTP surface before the processor is called.
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    pub max_retries: u32,
    pub timeout_seconds: u64,
}

impl WebhookRegistration {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            endpoint_url: None,
            event_types: Vec::new(),
            active: true,
            verify_signature: false,
            secret_token: None,
            allowed_ips: Vec::new(),
            max_retries: 3,
            timeout_seconds: 30,
        }
    }
}

/// Result of processing one inbound webhook call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundWebhookReport {
    pub webhook_id: String,
    pub source: String,
    pub event_type: String,
    pub verified: bool,
    pub processed: bool,
    #[serde(default)]
    pub processing_error: Option<String>,
    /// Id of the internal event injected into the queue, when processed.
    #[serde(default)]
    pub event_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

// ============================================================================
// Publish receipts, metrics & health
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    Accepted,
    /// Shed at the queue bound; the event was not admitted.
    Dropped,
    /// The bus is shutting down and no longer accepts publishes.
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub event_id: String,
    pub queued_at: DateTime<Utc>,
    pub outcome: PublishOutcome,
}

impl PublishReceipt {
    pub fn accepted(&self) -> bool {
        self.outcome == PublishOutcome::Accepted
    }
}

/// Counter snapshot exposed by the metrics endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_enqueued: u64,
    pub events_dropped: u64,
    pub events_completed: u64,
    pub events_failed: u64,
    pub events_retried: u64,
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub webhooks_received: u64,
    pub webhooks_rejected: u64,
    pub personal_logs_written: u64,
    pub personal_logs_skipped: u64,
    pub personal_logs_dropped: u64,
    /// Queue depth per priority, lowest first.
    pub queue_depths: [u64; 5],
    pub registered_webhooks: u64,
    pub configured_users: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    ShuttingDown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self { healthy: true, detail: None }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self { healthy: false, detail: Some(detail.into()) }
    }
}

/// Point-in-time liveness aggregate over bus components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}
