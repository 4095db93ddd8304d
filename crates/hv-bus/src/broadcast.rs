//! Realtime event fan-out.
//!
//! Optional handler that mirrors selected events onto a broadcast channel.
//! The WebSocket surface (out of scope here) attaches via
//! [`RealtimeBroadcaster::subscribe`] and serializes events to its clients.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use hv_common::{Event, EventCategory};
use hv_config::RealtimeOptions;

use crate::registry::EventHandler;

const CHANNEL_CAPACITY: usize = 256;

pub struct RealtimeBroadcaster {
    tx: broadcast::Sender<Event>,
    options: RealtimeOptions,
}

impl RealtimeBroadcaster {
    pub fn new(options: RealtimeOptions) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, options }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn should_broadcast(&self, event: &Event) -> bool {
        if !self.options.websocket_enabled {
            return false;
        }
        match event.category {
            EventCategory::Communication => true,
            EventCategory::System => self.options.broadcast_system_events,
            _ => self.options.broadcast_user_events && event.is_user_scoped(),
        }
    }
}

#[async_trait]
impl EventHandler for RealtimeBroadcaster {
    fn id(&self) -> &str {
        "realtime-broadcast"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        if self.should_broadcast(event) {
            // A send error only means no subscriber is attached.
            let _ = self.tx.send(event.clone());
            debug!(event_id = %event.id, "Event broadcast to realtime subscribers");
        }
        Ok(())
    }
}
