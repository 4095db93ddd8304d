//! Configuration loader with file and environment variable support.

use crate::{BusConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "haven.toml",
    "config.toml",
    "./config/haven.toml",
    "/etc/haven/bus.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable
    /// overrides, then validate.
    pub fn load(&self) -> Result<BusConfig, ConfigError> {
        let mut config = BusConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            let content = std::fs::read_to_string(&path)?;
            config = toml::from_str(&content)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("HV_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut BusConfig) {
        // Queue
        if let Ok(val) = env::var("HV_MAX_QUEUE_SIZE") {
            if let Ok(size) = val.parse() {
                config.queue.max_queue_size = size;
            }
        }

        // Dispatch
        if let Ok(val) = env::var("HV_DISPATCH_WORKERS") {
            if let Ok(workers) = val.parse() {
                config.dispatch.workers = workers;
            }
        }
        if let Ok(val) = env::var("HV_MAX_RETRY_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                config.dispatch.max_retry_attempts = attempts;
            }
        }
        if let Ok(val) = env::var("HV_RETRY_DELAY_SECONDS") {
            if let Ok(delay) = val.parse() {
                config.dispatch.retry_delay_seconds = delay;
            }
        }

        // Chat
        if let Ok(val) = env::var("HV_CHAT_API_BASE") {
            config.chat.api_base = val;
        }
        if let Ok(val) = env::var("HV_CHAT_BOT_TOKEN") {
            config.chat.bot_token = val;
        }

        // Email
        if let Ok(val) = env::var("HV_SMTP_HOST") {
            config.email.host = val;
        }
        if let Ok(val) = env::var("HV_SMTP_PORT") {
            if let Ok(port) = val.parse() {
                config.email.port = port;
            }
        }
        if let Ok(val) = env::var("HV_SMTP_USERNAME") {
            config.email.username = val;
        }
        if let Ok(val) = env::var("HV_SMTP_PASSWORD") {
            config.email.password = val;
        }
        if let Ok(val) = env::var("HV_SMTP_FROM") {
            config.email.from_address = val;
        }

        // Webhook out
        if let Ok(val) = env::var("HV_WEBHOOK_SIGNING_SECRET") {
            config.webhook_out.signing_secret = val;
        }

        // Personal log
        if let Ok(val) = env::var("HV_PERSONAL_LOG_TTL_HOURS") {
            if let Ok(hours) = val.parse() {
                config.personal_log.default_message_ttl_hours = hours;
            }
        }
        if let Ok(val) = env::var("HV_PERSONAL_LOG_ENCRYPTION") {
            if let Ok(enabled) = val.parse() {
                config.personal_log.personal_log_encryption = enabled;
            }
        }

        // Realtime
        if let Ok(val) = env::var("HV_WEBSOCKET_ENABLED") {
            if let Ok(enabled) = val.parse() {
                config.realtime.websocket_enabled = enabled;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
