//! Handler registry: event category → ordered list of subscribers.
//!
//! Registration is idempotent on `(category, handler id)` and synchronous;
//! the dispatcher observes a consistent snapshot per event. Handlers may
//! publish new events freely but must not republish their own event id
//! (the bus rejects that at publish time).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use hv_common::{Event, EventCategory};

/// Well-known id of the personal-log forwarder. Events flagged
/// `personal_log_only` run this handler and nothing else.
pub const PERSONAL_LOG_HANDLER_ID: &str = "personal-log";

/// A subscriber callback. Implementations may perform I/O; a failure is
/// isolated from sibling handlers and counts toward the event's retries.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable identity used for idempotent registration.
    fn id(&self) -> &str;

    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

pub struct HandlerRegistry {
    handlers: RwLock<HashMap<EventCategory, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a category. Returns false (and changes
    /// nothing) when the same handler id is already registered there.
    pub fn register(&self, category: EventCategory, handler: Arc<dyn EventHandler>) -> bool {
        let mut handlers = self.handlers.write();
        let entries = handlers.entry(category).or_default();

        if entries.iter().any(|h| h.id() == handler.id()) {
            debug!(category = %category, handler = handler.id(), "Handler already registered");
            return false;
        }

        info!(category = %category, handler = handler.id(), "Handler registered");
        entries.push(handler);
        true
    }

    /// Snapshot of the handlers to run for an event, in registration order.
    /// `personal_log_only` narrows the set to the personal-log forwarder.
    pub fn handlers_for(
        &self,
        category: EventCategory,
        personal_log_only: bool,
    ) -> Vec<Arc<dyn EventHandler>> {
        let handlers = self.handlers.read();
        let entries = match handlers.get(&category) {
            Some(entries) => entries.as_slice(),
            None => return Vec::new(),
        };

        entries
            .iter()
            .filter(|h| !personal_log_only || h.id() == PERSONAL_LOG_HANDLER_ID)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.handlers.read().values().map(|v| v.len()).sum()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
