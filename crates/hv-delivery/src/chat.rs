//! Chat transport over an HTTP bot API.
//!
//! Publishes text messages to integer-addressed channels; topic-partitioned
//! channels are addressed with a message thread id. The personal-log router
//! consumes the [`ChannelSink`] seam rather than the full transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use hv_common::{ChannelId, Message, Recipient, TransportKind};
use hv_config::ChatOptions;

use crate::{DeliveryError, DeliveryOutcome, RenderedBody, Result, Transport};

/// Topic-addressed posting into a chat channel.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn post(&self, channel: ChannelId, topic_id: i32, text: &str) -> Result<()>;
}

pub struct ChatTransport {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl ChatTransport {
    pub fn new(options: &ChatOptions) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_base: options.api_base.trim_end_matches('/').to_string(),
            bot_token: options.bot_token.clone(),
        }
    }

    /// Send a text message to a channel, optionally into a topic thread.
    pub async fn post_message(
        &self,
        chat_id: i64,
        thread_id: Option<i32>,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);

        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(thread_id) = thread_id {
            payload["message_thread_id"] = json!(thread_id);
        }
        if let Some(mode) = parse_mode {
            payload["parse_mode"] = json!(mode);
        }

        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();

        if status.is_success() {
            debug!(chat_id = chat_id, thread_id = ?thread_id, "Chat message sent");
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            warn!(chat_id = chat_id, status = status.as_u16(), "Chat API rejected message");
            Err(DeliveryError::Status {
                status: status.as_u16(),
                detail,
            })
        }
    }
}

#[async_trait]
impl Transport for ChatTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Chat
    }

    async fn deliver(
        &self,
        recipient: &Recipient,
        body: &RenderedBody,
        message: &Message,
    ) -> DeliveryOutcome {
        let chat_id = match recipient {
            Recipient::Chat(id) => *id,
            other => {
                return DeliveryOutcome::failed(format!(
                    "chat transport cannot address {} recipient",
                    other.kind()
                ))
            }
        };

        // Template-authored chat bodies carry markup; raw content is sent
        // verbatim.
        let parse_mode = body.from_template.then_some("Markdown");

        match self.post_message(chat_id, None, &body.text, parse_mode).await {
            Ok(()) => {
                debug!(message_id = %message.id, chat_id = chat_id, "Chat delivery succeeded");
                DeliveryOutcome::sent()
            }
            Err(e) => DeliveryOutcome::failed(e.to_string()),
        }
    }
}

#[async_trait]
impl ChannelSink for ChatTransport {
    async fn post(&self, channel: ChannelId, topic_id: i32, text: &str) -> Result<()> {
        self.post_message(channel.0, Some(topic_id), text, None).await
    }
}
