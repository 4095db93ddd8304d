//! Per-user personal-log routing.
//!
//! Events owned by a user are mirrored into the user's own chat channel,
//! partitioned into topics by a deterministic classifier. Entries in topics
//! that require encryption are encrypted with the user's recipient key
//! before anything leaves the process; plaintext only ever travels to the
//! channel the user provisioned.
//!
//! Channel provisioning is a one-shot operation external to the hot path;
//! the router only consumes the resulting configuration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use hv_common::{ChannelId, Event, PersonalLogEntry, TopicCategory, TopicConfig};
use hv_config::PersonalLogOptions;
use hv_delivery::ChannelSink;

mod topics;

pub use topics::default_topics;

#[derive(Error, Debug)]
pub enum PersonalLogError {
    #[error("Invalid topic configuration: {0}")]
    InvalidTopics(String),
}

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Recipient key missing for user {0}")]
    KeyMissing(String),

    #[error("Cipher failure: {0}")]
    Cipher(String),
}

/// External encryption service. Resolves the user's recipient key and
/// returns armored ciphertext; key management stays outside the bus.
#[async_trait]
pub trait LogCipher: Send + Sync {
    async fn encrypt(&self, user_id: &str, plaintext: &str) -> Result<String, CipherError>;
}

/// Per-user channel configuration consumed by the router.
#[derive(Debug, Clone)]
struct ChannelConfig {
    channel: ChannelId,
    topics: Vec<TopicConfig>,
}

/// Counters the bus aggregates into its metrics snapshot.
#[derive(Debug, Default)]
pub struct RouterCounters {
    written: AtomicU64,
    skipped_no_channel: AtomicU64,
    dropped: AtomicU64,
}

pub struct PersonalLogRouter {
    channels: RwLock<HashMap<String, ChannelConfig>>,
    sink: Arc<dyn ChannelSink>,
    cipher: Arc<dyn LogCipher>,
    options: PersonalLogOptions,
    counters: RouterCounters,
}

impl PersonalLogRouter {
    pub fn new(
        sink: Arc<dyn ChannelSink>,
        cipher: Arc<dyn LogCipher>,
        options: PersonalLogOptions,
    ) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            sink,
            cipher,
            options,
            counters: RouterCounters::default(),
        }
    }

    /// Bind a user to a provisioned channel. An empty topic list provisions
    /// the default set; explicit lists must contain exactly one `general`
    /// topic (it is appended when absent).
    pub fn configure_channel(
        &self,
        user_id: impl Into<String>,
        channel: ChannelId,
        mut topics: Vec<TopicConfig>,
    ) -> Result<(), PersonalLogError> {
        if topics.is_empty() {
            topics = default_topics();
        }

        let general_count = topics
            .iter()
            .filter(|t| t.category == TopicCategory::General)
            .count();
        match general_count {
            0 => topics.push(topics::general_topic(topics.len() as i32 + 1)),
            1 => {}
            n => {
                return Err(PersonalLogError::InvalidTopics(format!(
                    "expected exactly one general topic, got {}",
                    n
                )))
            }
        }

        let user_id = user_id.into();
        info!(user_id = %user_id, channel = %channel, topics = topics.len(), "Personal log channel configured");
        self.channels
            .write()
            .insert(user_id, ChannelConfig { channel, topics });
        Ok(())
    }

    pub fn remove_channel(&self, user_id: &str) -> bool {
        self.channels.write().remove(user_id).is_some()
    }

    pub fn configured_users(&self) -> usize {
        self.channels.read().len()
    }

    pub fn logs_written(&self) -> u64 {
        self.counters.written.load(Ordering::SeqCst)
    }

    pub fn logs_skipped(&self) -> u64 {
        self.counters.skipped_no_channel.load(Ordering::SeqCst)
    }

    pub fn logs_dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::SeqCst)
    }

    /// Mirror a user-scoped event into the owner's personal log.
    ///
    /// Returns the written entry, or `None` when the event was skipped (no
    /// channel, no owner) or the entry was dropped (encryption or dispatch
    /// failure). A dropped entry never fails the surrounding event; it is
    /// only counted.
    pub async fn route(&self, event: &Event) -> Option<PersonalLogEntry> {
        let user_id = match event.user_id {
            Some(ref id) => id.clone(),
            None => return None,
        };

        let config = match self.channels.read().get(&user_id) {
            Some(config) => config.clone(),
            None => {
                self.counters.skipped_no_channel.fetch_add(1, Ordering::SeqCst);
                debug!(user_id = %user_id, event_id = %event.id, "No personal log channel configured");
                return None;
            }
        };

        let topic = classify(&config.topics, event).clone();
        let mut content = format_content(event);
        let mut encrypted = false;

        let encryption_required = topic
            .encryption_required
            .unwrap_or(self.options.personal_log_encryption);
        if encryption_required {
            match self.cipher.encrypt(&user_id, &content).await {
                Ok(ciphertext) => {
                    content = ciphertext;
                    encrypted = true;
                }
                Err(e) => {
                    self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                    warn!(user_id = %user_id, event_id = %event.id, error = %e, "Dropping log entry, encryption failed");
                    return None;
                }
            }
        }

        let mut hashtags = event.hashtags.clone();
        hashtags.extend(topic.hashtags.iter().cloned());

        let retention_hours = topic
            .retention_hours
            .unwrap_or(self.options.default_message_ttl_hours);
        let logged_at = Utc::now();

        let entry = PersonalLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            channel_id: config.channel,
            topic_id: topic.topic_id,
            source_event_id: event.id.clone(),
            title: event.title.clone(),
            content,
            hashtags,
            logged_at,
            expires_at: logged_at + Duration::hours(retention_hours as i64),
            encrypted,
        };

        let text = render_log_line(event, &entry);
        if let Err(e) = self.sink.post(config.channel, topic.topic_id, &text).await {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
            warn!(user_id = %user_id, event_id = %event.id, error = %e, "Dropping log entry, channel dispatch failed");
            return None;
        }

        self.counters.written.fetch_add(1, Ordering::SeqCst);
        debug!(
            user_id = %user_id,
            event_id = %event.id,
            topic_id = topic.topic_id,
            encrypted = encrypted,
            "Personal log entry written"
        );
        Some(entry)
    }
}

/// Resolve an event to a topic. Precedence: explicit hint, category match,
/// source match, keyword intersection with the lowercased title, then the
/// general topic. Deterministic for a fixed configuration.
fn classify<'a>(topics: &'a [TopicConfig], event: &Event) -> &'a TopicConfig {
    if let Some(hint) = event.topic_hint {
        if let Some(topic) = topics.iter().find(|t| t.category == hint) {
            return topic;
        }
    }

    if let Some(topic) = topics
        .iter()
        .find(|t| t.event_categories.contains(&event.category))
    {
        return topic;
    }

    if let Some(topic) = topics.iter().find(|t| t.sources.contains(&event.source)) {
        return topic;
    }

    let title = event.title.to_lowercase();
    if let Some(topic) = topics
        .iter()
        .find(|t| t.keywords.iter().any(|k| title.contains(k.as_str())))
    {
        return topic;
    }

    topics
        .iter()
        .find(|t| t.category == TopicCategory::General)
        .expect("channel config always carries a general topic")
}

/// Structured log body: header block, description, then the event data as a
/// fenced JSON block when present.
fn format_content(event: &Event) -> String {
    let mut content = format!(
        "**Event**: {}\n**Source**: {}\n**Time**: {}\n**Priority**: {}\n\n**Description**: {}\n",
        event.category,
        event.source,
        event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        event.priority,
        event.description.as_deref().unwrap_or("No description"),
    );

    if !event.data.is_null() {
        let data = serde_json::to_string_pretty(&event.data).unwrap_or_default();
        content.push_str(&format!("\n**Data**:\n```json\n{}\n```", data));
    }

    content
}

/// Final channel line: category tag and title, the (possibly encrypted)
/// content, and the hashtags as a tail line.
fn render_log_line(event: &Event, entry: &PersonalLogEntry) -> String {
    let mut text = format!("#{} {}\n\n{}", event.category, entry.title, entry.content);
    if !entry.hashtags.is_empty() {
        text.push_str(&format!("\n\n{}", entry.hashtags.join(" ")));
    }
    text
}
