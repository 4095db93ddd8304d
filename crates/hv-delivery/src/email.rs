//! Email transport over SMTP.
//!
//! Builds an RFC-822 envelope per message: `From` comes from configuration,
//! subject from the message, and the body part is HTML when the rendered
//! content contains `<`, plain text otherwise.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{debug, warn};

use hv_common::{Message, Recipient, TransportKind};
use hv_config::EmailOptions;

use crate::{DeliveryError, DeliveryOutcome, RenderedBody, Result, Transport};

pub struct EmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailTransport {
    pub fn new(options: &EmailOptions) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&options.host)
            .map_err(|e| DeliveryError::Smtp(e.to_string()))?
            .port(options.port);

        if !options.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                options.username.clone(),
                options.password.clone(),
            ));
        }

        let from = options
            .from_address
            .parse()
            .map_err(|_| DeliveryError::Address(options.from_address.clone()))?;

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }

    fn build_envelope(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<lettre::Message> {
        let to: Mailbox = to
            .parse()
            .map_err(|_| DeliveryError::Address(to.to_string()))?;

        let content_type = if body.contains('<') {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };

        lettre::Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(content_type)
            .body(body.to_string())
            .map_err(|e| DeliveryError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl Transport for EmailTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Email
    }

    async fn deliver(
        &self,
        recipient: &Recipient,
        body: &RenderedBody,
        message: &Message,
    ) -> DeliveryOutcome {
        let address = match recipient {
            Recipient::Email(addr) => addr,
            other => {
                return DeliveryOutcome::failed(format!(
                    "email transport cannot address {} recipient",
                    other.kind()
                ))
            }
        };

        let subject = message.subject.as_deref().unwrap_or("Haven notification");

        let envelope = match self.build_envelope(address, subject, &body.text) {
            Ok(envelope) => envelope,
            Err(e) => return DeliveryOutcome::failed(e.to_string()),
        };

        match self.mailer.send(envelope).await {
            Ok(_) => {
                debug!(message_id = %message.id, to = %address, "Email sent");
                DeliveryOutcome::sent()
            }
            Err(e) => {
                warn!(message_id = %message.id, to = %address, error = %e, "Email delivery failed");
                DeliveryOutcome::failed(format!("SMTP error: {}", e))
            }
        }
    }
}
