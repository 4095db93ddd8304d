//! Haven bus configuration.
//!
//! TOML-based configuration with environment variable overrides. Every
//! section rejects unknown keys: a typo in a config file is a load error,
//! not a silently ignored setting.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    pub queue: QueueOptions,
    pub dispatch: DispatchOptions,
    pub chat: ChatOptions,
    pub email: EmailOptions,
    pub webhook_out: WebhookOutOptions,
    pub personal_log: PersonalLogOptions,
    pub realtime: RealtimeOptions,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue: QueueOptions::default(),
            dispatch: DispatchOptions::default(),
            chat: ChatOptions::default(),
            email: EmailOptions::default(),
            webhook_out: WebhookOutOptions::default(),
            personal_log: PersonalLogOptions::default(),
            realtime: RealtimeOptions::default(),
        }
    }
}

/// Priority queue bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueOptions {
    /// Capacity of each priority sub-queue.
    pub max_queue_size: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self { max_queue_size: 10_000 }
    }
}

/// Dispatcher worker and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchOptions {
    /// Number of dispatch workers sharing the queue.
    pub workers: usize,
    /// Hard cap on total dispatch attempts per event.
    pub max_retry_attempts: u32,
    /// Base for the linear backoff multiplier (delay = base * retry_count).
    pub retry_delay_seconds: u64,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            workers: 3,
            max_retry_attempts: 3,
            retry_delay_seconds: 60,
        }
    }
}

/// Chat gateway (bot API) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChatOptions {
    /// Base URL of the bot API, token excluded.
    pub api_base: String,
    pub bot_token: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token: String::new(),
            timeout_seconds: 30,
        }
    }
}

/// SMTP transfer agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmailOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl Default for EmailOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_address: "noreply@haven.local".to_string(),
        }
    }
}

/// Outbound webhook transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookOutOptions {
    /// HMAC-SHA256 signing secret for the `X-Signature` header; empty
    /// disables signing.
    pub signing_secret: String,
    pub timeout_seconds: u64,
}

impl Default for WebhookOutOptions {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            timeout_seconds: 30,
        }
    }
}

/// Personal-log router defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersonalLogOptions {
    /// Retention applied when a topic omits its own.
    pub default_message_ttl_hours: u32,
    /// Default for topic `encryption_required` when unspecified.
    pub personal_log_encryption: bool,
}

impl Default for PersonalLogOptions {
    fn default() -> Self {
        Self {
            default_message_ttl_hours: 24,
            personal_log_encryption: true,
        }
    }
}

/// Realtime fan-out toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RealtimeOptions {
    pub websocket_enabled: bool,
    pub broadcast_system_events: bool,
    pub broadcast_user_events: bool,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            websocket_enabled: false,
            broadcast_system_events: false,
            broadcast_user_events: false,
        }
    }
}

impl BusConfig {
    /// Load configuration from a TOML file. Unknown keys are an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BusConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "queue.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.dispatch.workers == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.workers must be at least 1".to_string(),
            ));
        }
        if self.dispatch.max_retry_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.max_retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate an example TOML configuration.
    pub fn example_toml() -> String {
        r#"# Haven Event Bus Configuration
# Environment variables (HV_*) override these settings

[queue]
max_queue_size = 10000

[dispatch]
workers = 3
max_retry_attempts = 3
retry_delay_seconds = 60

[chat]
api_base = "https://api.telegram.org"
bot_token = ""
timeout_seconds = 30

[email]
host = "localhost"
port = 587
username = ""
password = ""
from_address = "noreply@haven.local"

[webhook_out]
signing_secret = ""
timeout_seconds = 30

[personal_log]
default_message_ttl_hours = 24
personal_log_encryption = true

[realtime]
websocket_enabled = false
broadcast_system_events = false
broadcast_user_events = false
"#
        .to_string()
    }
}
