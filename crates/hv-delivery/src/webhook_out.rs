//! Outbound webhook transport.
//!
//! POSTs a JSON object to the recipient URL: either the default message
//! envelope or, when the message's template has a webhook variant, the
//! rendered variant re-parsed as JSON. When a signing secret is configured
//! the body is signed with `X-Signature: sha256=<lowercase hex>`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, warn};

use hv_common::{Message, Recipient, TransportKind};
use hv_config::WebhookOutOptions;

use crate::{DeliveryOutcome, RenderedBody, Transport};

pub const SIGNATURE_HEADER: &str = "X-Signature";

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the raw body, hex-encoded with the `sha256=` prefix.
fn sign_body(body: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub struct WebhookTransport {
    client: Client,
    signing_secret: Option<String>,
}

impl WebhookTransport {
    pub fn new(options: &WebhookOutOptions) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .expect("Failed to build HTTP client");

        let signing_secret = if options.signing_secret.is_empty() {
            None
        } else {
            Some(options.signing_secret.clone())
        };

        Self { client, signing_secret }
    }

    /// Default envelope sent when the message carries no webhook variant.
    fn envelope(message: &Message, body_text: &str) -> serde_json::Value {
        json!({
            "message_id": message.id,
            "subject": message.subject,
            "content": body_text,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "user_id": message.user_id,
            "context_labels": message.hashtags,
        })
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Webhook
    }

    async fn deliver(
        &self,
        recipient: &Recipient,
        body: &RenderedBody,
        message: &Message,
    ) -> DeliveryOutcome {
        let url = match recipient {
            Recipient::Webhook(url) => url,
            other => {
                return DeliveryOutcome::failed(format!(
                    "webhook transport cannot address {} recipient",
                    other.kind()
                ))
            }
        };

        // A rendered webhook variant is template-authored JSON; anything
        // else goes out in the default envelope.
        let payload = if body.from_template {
            match serde_json::from_str::<serde_json::Value>(&body.text) {
                Ok(value) => value,
                Err(e) => {
                    return DeliveryOutcome::failed(format!(
                        "webhook template variant is not valid JSON: {}",
                        e
                    ))
                }
            }
        } else {
            Self::envelope(message, &body.text)
        };

        let body_string = match serde_json::to_string(&payload) {
            Ok(s) => s,
            Err(e) => return DeliveryOutcome::failed(format!("payload serialization: {}", e)),
        };

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json");

        if let Some(ref secret) = self.signing_secret {
            request = request.header(SIGNATURE_HEADER, sign_body(&body_string, secret));
        }

        match request.body(body_string).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!(message_id = %message.id, url = %url, "Webhook delivered");
                    DeliveryOutcome::sent()
                } else {
                    warn!(
                        message_id = %message.id,
                        url = %url,
                        status = status.as_u16(),
                        "Webhook endpoint returned error"
                    );
                    DeliveryOutcome::failed(format!("HTTP {}", status.as_u16()))
                }
            }
            Err(e) if e.is_timeout() => DeliveryOutcome::failed("request timeout"),
            Err(e) if e.is_connect() => DeliveryOutcome::failed(format!("connection error: {}", e)),
            Err(e) => DeliveryOutcome::failed(format!("request failed: {}", e)),
        }
    }
}
