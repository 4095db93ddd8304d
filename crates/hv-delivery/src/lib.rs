//! Message delivery for the event bus.
//!
//! - [`Transport`]: uniform send interface over chat, email, outbound
//!   webhooks and sms (stub)
//! - [`TemplateEngine`]: pure `{var}` substitution with per-transport
//!   variants
//! - [`MessagePipeline`]: recipient fan-out, per-recipient rendering and
//!   transport choice, status aggregation

use async_trait::async_trait;
use thiserror::Error;

pub mod chat;
pub mod email;
pub mod pipeline;
pub mod sms;
pub mod template;
pub mod webhook_out;

pub use chat::{ChannelSink, ChatTransport};
pub use email::EmailTransport;
pub use pipeline::MessagePipeline;
pub use sms::SmsTransport;
pub use template::TemplateEngine;
pub use webhook_out::WebhookTransport;

use hv_common::{DeliveryState, Message, Recipient, TransportKind};

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Transport rejected delivery: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Body handed to a transport after rendering.
#[derive(Debug, Clone)]
pub struct RenderedBody {
    pub text: String,
    /// True when the text came from the transport's template variant
    /// rather than the message's canonical content.
    pub from_template: bool,
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub state: DeliveryState,
    pub detail: Option<String>,
}

impl DeliveryOutcome {
    pub fn sent() -> Self {
        Self { state: DeliveryState::Sent, detail: None }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            state: DeliveryState::Failed,
            detail: Some(detail.into()),
        }
    }
}

/// A delivery backend. Implementations are injected into the pipeline and
/// must be safe for concurrent use.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Attempt delivery of a rendered body to one recipient. Transport
    /// failures are reported through the outcome, never as a panic.
    async fn deliver(
        &self,
        recipient: &Recipient,
        body: &RenderedBody,
        message: &Message,
    ) -> DeliveryOutcome;
}
