//! Haven development monolith.
//!
//! Wires the event bus with real transports from configuration and runs it
//! until ctrl-c, then drains with a configurable deadline. The production
//! HTTP surface lives in a separate service; this binary exists to exercise
//! the bus locally.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::signal;
use tracing::info;

use hv_bus::{EventBus, MemoryArchive};
use hv_common::logging::init_logging;
use hv_config::{BusConfig, ConfigLoader};
use hv_delivery::{
    ChatTransport, EmailTransport, MessagePipeline, SmsTransport, TemplateEngine,
    WebhookTransport,
};
use hv_personal_log::{CipherError, LogCipher};

/// Haven event bus development server
#[derive(Parser, Debug)]
#[command(name = "hv-dev")]
#[command(about = "Haven event bus - all components in one process")]
struct Args {
    /// Path to a TOML config file (falls back to standard search paths)
    #[arg(long, env = "HV_CONFIG")]
    config: Option<String>,

    /// Graceful drain deadline on shutdown, in seconds
    #[arg(long, env = "HV_DRAIN_DEADLINE_SECS", default_value = "10")]
    drain_deadline_secs: u64,
}

/// Identity cipher for local development; the production deployment injects
/// the platform's key-management client here.
struct DevCipher;

#[async_trait]
impl LogCipher for DevCipher {
    async fn encrypt(&self, _user_id: &str, plaintext: &str) -> Result<String, CipherError> {
        Ok(format!("[dev-encrypted:{}]", plaintext.len()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("hv-dev");

    let args = Args::parse();

    let config = match args.config {
        Some(ref path) => ConfigLoader::with_path(path).load(),
        None => BusConfig::load(),
    }
    .context("Failed to load configuration")?;

    let chat = Arc::new(ChatTransport::new(&config.chat));
    let email =
        Arc::new(EmailTransport::new(&config.email).context("Failed to build email transport")?);
    let webhook = Arc::new(WebhookTransport::new(&config.webhook_out));

    let pipeline = MessagePipeline::new(Arc::new(TemplateEngine::new()))
        .with_transport(chat.clone())
        .with_transport(email)
        .with_transport(webhook)
        .with_transport(Arc::new(SmsTransport::new()));

    let bus = EventBus::new(
        config,
        pipeline,
        chat,
        Arc::new(DevCipher),
        Arc::new(MemoryArchive::new()),
    );
    bus.start();

    info!("hv-dev running, press ctrl-c to stop");
    signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;

    info!("ctrl-c received, draining");
    bus.shutdown(Duration::from_secs(args.drain_deadline_secs)).await;

    Ok(())
}
