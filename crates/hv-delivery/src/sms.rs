//! SMS transport stub.
//!
//! Always reports `failed` until an SMS backend is bound.

use async_trait::async_trait;
use tracing::info;

use hv_common::{Message, Recipient, TransportKind};

use crate::{DeliveryOutcome, RenderedBody, Transport};

pub struct SmsTransport;

impl SmsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SmsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SmsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sms
    }

    async fn deliver(
        &self,
        recipient: &Recipient,
        _body: &RenderedBody,
        message: &Message,
    ) -> DeliveryOutcome {
        info!(
            message_id = %message.id,
            recipient = %recipient.address(),
            "SMS delivery not implemented"
        );
        DeliveryOutcome::failed("sms backend not configured")
    }
}
