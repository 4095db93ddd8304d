//! Inbound webhook verification and normalization.
//!
//! External producers POST JSON payloads which the upstream HTTP surface
//! hands to [`WebhookProcessor::process`]. The processor authenticates the
//! call against its registration (HMAC-SHA256 over canonical JSON, compared
//! in constant time) and normalizes it into a first-class [`Event`] for
//! injection into the priority queue.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};

use hv_common::{Event, EventCategory, InboundWebhookReport, WebhookRegistration};

mod canonical;

pub use canonical::canonical_json;

/// Preferred signature header.
pub const SIGNATURE_HEADER: &str = "X-Signature";
/// Compatibility header accepted from GitHub-style producers.
pub const SIGNATURE_HEADER_COMPAT: &str = "X-Hub-Signature-256";

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Webhook already registered: {0}")]
    Conflict(String),
}

/// Outcome of processing one inbound call. `event` is populated only when
/// the call verified; the caller injects it into the queue.
#[derive(Debug)]
pub struct WebhookDecision {
    pub report: InboundWebhookReport,
    pub event: Option<Event>,
}

/// Process-level webhook registration store and verifier.
pub struct WebhookProcessor {
    registrations: RwLock<HashMap<String, WebhookRegistration>>,
}

impl WebhookProcessor {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
        }
    }

    /// Register an inbound webhook. Ids are unique; re-registration is a
    /// conflict and must be preceded by an explicit remove.
    pub fn register(&self, registration: WebhookRegistration) -> Result<(), WebhookError> {
        let mut registrations = self.registrations.write();
        if registrations.contains_key(&registration.id) {
            return Err(WebhookError::Conflict(registration.id));
        }

        info!(
            webhook_id = %registration.id,
            source = %registration.source,
            verify_signature = registration.verify_signature,
            "Webhook registered"
        );
        registrations.insert(registration.id.clone(), registration);
        Ok(())
    }

    pub fn remove(&self, webhook_id: &str) -> bool {
        self.registrations.write().remove(webhook_id).is_some()
    }

    pub fn get(&self, webhook_id: &str) -> Option<WebhookRegistration> {
        self.registrations.read().get(webhook_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.registrations.read().len()
    }

    /// Verify and normalize one inbound call.
    pub fn process(
        &self,
        webhook_id: &str,
        payload: &Value,
        headers: &HashMap<String, String>,
    ) -> WebhookDecision {
        let event_type = payload
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("webhook")
            .to_string();

        let registration = match self.get(webhook_id) {
            Some(r) => r,
            None => {
                warn!(webhook_id = %webhook_id, "Unknown webhook id");
                return WebhookDecision {
                    report: unprocessed(webhook_id, "unknown", &event_type, "unknown webhook"),
                    event: None,
                };
            }
        };

        if !registration.active {
            return WebhookDecision {
                report: unprocessed(webhook_id, &registration.source, &event_type, "webhook inactive"),
                event: None,
            };
        }

        if !registration.event_types.is_empty()
            && !registration.event_types.iter().any(|t| t == &event_type)
        {
            return WebhookDecision {
                report: unprocessed(
                    webhook_id,
                    &registration.source,
                    &event_type,
                    "event type not allowed",
                ),
                event: None,
            };
        }

        if registration.verify_signature && !verify_signature(&registration, payload, headers) {
            warn!(webhook_id = %webhook_id, "Webhook signature verification failed");
            return WebhookDecision {
                report: unprocessed(webhook_id, &registration.source, &event_type, "signature"),
                event: None,
            };
        }

        let mut event = Event::new(
            EventCategory::Webhook,
            registration.source.clone(),
            format!("webhook:{}", event_type),
        );
        event.description = Some(format!("Webhook event from {}", registration.source));
        event.data = payload.clone();
        event.hashtags = vec!["#webhook".to_string(), format!("#{}", registration.source)];

        let report = InboundWebhookReport {
            webhook_id: webhook_id.to_string(),
            source: registration.source,
            event_type,
            verified: true,
            processed: true,
            processing_error: None,
            event_id: Some(event.id.clone()),
            received_at: chrono::Utc::now(),
        };

        WebhookDecision {
            report,
            event: Some(event),
        }
    }
}

impl Default for WebhookProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn unprocessed(
    webhook_id: &str,
    source: &str,
    event_type: &str,
    error: &str,
) -> InboundWebhookReport {
    InboundWebhookReport {
        webhook_id: webhook_id.to_string(),
        source: source.to_string(),
        event_type: event_type.to_string(),
        verified: false,
        processed: false,
        processing_error: Some(error.to_string()),
        event_id: None,
        received_at: chrono::Utc::now(),
    }
}

/// HMAC-SHA256 over the canonical JSON of the payload, compared in constant
/// time against the `sha256=`-prefixed hex in the signature header.
fn verify_signature(
    registration: &WebhookRegistration,
    payload: &Value,
    headers: &HashMap<String, String>,
) -> bool {
    let secret = match registration.secret_token {
        Some(ref s) => s,
        None => return false,
    };

    let provided = match header_value(headers, SIGNATURE_HEADER)
        .or_else(|| header_value(headers, SIGNATURE_HEADER_COMPAT))
    {
        Some(v) if !v.is_empty() => v,
        _ => return false,
    };

    let provided_hex = provided.strip_prefix("sha256=").unwrap_or(provided);
    let provided_bytes = match hex::decode(provided_hex) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let canonical = canonical_json(payload);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(canonical.as_bytes());

    // verify_slice is constant-time.
    mac.verify_slice(&provided_bytes).is_ok()
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
