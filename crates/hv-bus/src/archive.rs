//! Archive sink for terminal events.
//!
//! The bus does not require durable storage for correctness; when a sink is
//! bound, every event reaching `completed` or `failed` is written as one
//! JSON record keyed by event id. Durable stores live outside the core and
//! implement this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use hv_common::Event;

#[async_trait]
pub trait EventArchive: Send + Sync {
    async fn record(&self, event: &Event) -> anyhow::Result<()>;
}

/// Discards every record; the default when no sink is bound.
pub struct NoopArchive;

#[async_trait]
impl EventArchive for NoopArchive {
    async fn record(&self, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory sink for tests and development.
pub struct MemoryArchive {
    records: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, event_id: &str) -> Option<serde_json::Value> {
        self.records.read().get(event_id).cloned()
    }

    /// First record matching the predicate, in no particular order.
    pub fn find<F>(&self, predicate: F) -> Option<serde_json::Value>
    where
        F: Fn(&serde_json::Value) -> bool,
    {
        self.records
            .read()
            .values()
            .find(|record| predicate(record))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for MemoryArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventArchive for MemoryArchive {
    async fn record(&self, event: &Event) -> anyhow::Result<()> {
        let record = serde_json::to_value(event)?;
        self.records.write().insert(event.id.clone(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hv_common::{EventCategory, ProcessingStatus};

    #[tokio::test]
    async fn memory_archive_keys_by_event_id() {
        let archive = MemoryArchive::new();
        let mut event = hv_common::Event::new(EventCategory::System, "test", "done");
        event.processing_status = ProcessingStatus::Completed;

        archive.record(&event).await.unwrap();

        let record = archive.get(&event.id).unwrap();
        assert_eq!(record["title"], "done");
        assert_eq!(record["processing_status"], "completed");
    }
}
