//! Message pipeline.
//!
//! Orchestrates one logical delivery pass: validates the message, renders a
//! per-transport body for each recipient in order, invokes the matching
//! transport, and aggregates per-recipient outcomes into a [`SendReport`].
//!
//! The pipeline holds no per-message state and never retries; retry is the
//! caller's responsibility via republishing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use hv_common::{
    DeliveryState, Message, MessageStatus, RecipientOutcome, SendReport, TransportKind,
};

use crate::{DeliveryOutcome, RenderedBody, TemplateEngine, Transport};

pub struct MessagePipeline {
    transports: HashMap<TransportKind, Arc<dyn Transport>>,
    templates: Arc<TemplateEngine>,
}

impl MessagePipeline {
    pub fn new(templates: Arc<TemplateEngine>) -> Self {
        Self {
            transports: HashMap::new(),
            templates,
        }
    }

    /// Inject a transport; replaces any previous adapter of the same kind.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(transport.kind(), transport);
        self
    }

    pub fn templates(&self) -> &Arc<TemplateEngine> {
        &self.templates
    }

    /// Deliver a message to each recipient exactly once, in recipient order.
    ///
    /// The message is `sent` when at least one recipient reaches
    /// `sent`/`delivered`, `failed` otherwise. A flipped `cancel` signal
    /// fails the remaining recipients with reason `cancelled`.
    pub async fn send(
        &self,
        message: &mut Message,
        mut cancel: watch::Receiver<bool>,
    ) -> SendReport {
        if message.recipients.is_empty() {
            message.status = MessageStatus::Failed;
            return SendReport::failure(&message.id, "no-recipients");
        }

        if let Some(ref template_id) = message.template_id {
            if !self.templates.contains(template_id) {
                message.status = MessageStatus::Failed;
                warn!(message_id = %message.id, template_id = %template_id, "Unknown template");
                return SendReport::failure(&message.id, "unknown-template");
            }
        }

        let recipients = message.recipients.clone();
        let mut outcomes = Vec::with_capacity(recipients.len());

        for recipient in &recipients {
            let kind = recipient.kind();

            let outcome = match self.transports.get(&kind) {
                None => DeliveryOutcome::failed(format!("{} transport not configured", kind)),
                Some(transport) => {
                    if *cancel.borrow() {
                        DeliveryOutcome::failed("cancelled")
                    } else {
                        let body = self.render_for(message, kind);
                        tokio::select! {
                            outcome = transport.deliver(recipient, &body, message) => outcome,
                            _ = cancelled(&mut cancel) => DeliveryOutcome::failed("cancelled"),
                        }
                    }
                }
            };

            debug!(
                message_id = %message.id,
                transport = %kind,
                recipient = %recipient.address(),
                state = ?outcome.state,
                "Recipient delivery attempt finished"
            );

            outcomes.push(RecipientOutcome {
                recipient: recipient.clone(),
                transport: kind,
                state: outcome.state,
                detail: outcome.detail,
            });
        }

        let success = outcomes.iter().any(|o| o.state.is_success());
        message.status = if success { MessageStatus::Sent } else { MessageStatus::Failed };
        if success {
            message.delivered_at = Some(chrono::Utc::now());
        }

        SendReport {
            message_id: message.id.clone(),
            status: message.status,
            success,
            recipients: outcomes,
            error: None,
        }
    }

    /// Transport-specific template variant when one exists, otherwise the
    /// message's canonical content (ciphertext passes through unchanged).
    fn render_for(&self, message: &Message, kind: TransportKind) -> RenderedBody {
        if let Some(ref template_id) = message.template_id {
            if let Some(text) =
                self.templates.render(template_id, kind, &message.template_variables)
            {
                return RenderedBody { text, from_template: true };
            }
        }

        RenderedBody {
            text: message.content.as_text().to_string(),
            from_template: false,
        }
    }
}

/// Resolves when the cancel signal flips; pends forever if the sender is
/// gone (no cancellation possible).
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *cancel.borrow() {
            return;
        }
    }
}
