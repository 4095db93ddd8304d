//! Retry state machine tests under paused time.
//!
//! The dispatcher re-enqueues a failed event with delay
//! `retry_delay_seconds * retry_count` up to `max_retry_attempts` total
//! attempts, then terminates it in `failed`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use hv_bus::{EventBus, EventHandler, MemoryArchive};
use hv_common::{ChannelId, Event, EventCategory};
use hv_config::BusConfig;
use hv_delivery::{ChannelSink, MessagePipeline, TemplateEngine};
use hv_personal_log::{CipherError, LogCipher};

struct NullSink;

#[async_trait]
impl ChannelSink for NullSink {
    async fn post(&self, _channel: ChannelId, _topic_id: i32, _text: &str) -> hv_delivery::Result<()> {
        Ok(())
    }
}

struct NullCipher;

#[async_trait]
impl LogCipher for NullCipher {
    async fn encrypt(&self, _user_id: &str, plaintext: &str) -> Result<String, CipherError> {
        Ok(plaintext.to_string())
    }
}

/// Fails the first `failures` invocations, recording attempt times.
struct FlakyHandler {
    failures: u32,
    attempts: AtomicU32,
    attempt_times: Mutex<Vec<tokio::time::Instant>>,
}

impl FlakyHandler {
    fn failing_forever() -> Arc<Self> {
        Arc::new(Self {
            failures: u32::MAX,
            attempts: AtomicU32::new(0),
            attempt_times: Mutex::new(Vec::new()),
        })
    }

    fn failing_times(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            attempts: AtomicU32::new(0),
            attempt_times: Mutex::new(Vec::new()),
        })
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for FlakyHandler {
    fn id(&self) -> &str {
        "flaky"
    }

    async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
        self.attempt_times.lock().push(tokio::time::Instant::now());
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            anyhow::bail!("induced failure on attempt {}", attempt + 1)
        }
        Ok(())
    }
}

fn bus_with(archive: Arc<MemoryArchive>) -> Arc<EventBus> {
    let mut config = BusConfig::default();
    config.dispatch.workers = 1;

    let bus = Arc::new(EventBus::new(
        config,
        MessagePipeline::new(Arc::new(TemplateEngine::new())),
        Arc::new(NullSink),
        Arc::new(NullCipher),
        archive,
    ));
    bus.start();
    bus
}

async fn wait_terminal(archive: &MemoryArchive, event_id: &str) -> serde_json::Value {
    for _ in 0..2000 {
        if let Some(record) = archive.get(event_id) {
            let status = record["processing_status"].as_str().unwrap_or_default();
            if status == "completed" || status == "failed" {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("event {} never reached a terminal status", event_id);
}

#[tokio::test(start_paused = true)]
async fn always_failing_handler_exhausts_three_attempts() {
    let archive = Arc::new(MemoryArchive::new());
    let bus = bus_with(archive.clone());
    let handler = FlakyHandler::failing_forever();
    bus.register_handler(EventCategory::System, handler.clone());

    let event = Event::new(EventCategory::System, "test", "doomed");
    let event_id = event.id.clone();
    let start = tokio::time::Instant::now();
    bus.publish(event).unwrap();

    let record = wait_terminal(&archive, &event_id).await;
    assert_eq!(record["processing_status"], "failed");
    assert_eq!(record["retry_count"], 3);
    assert_eq!(handler.attempts(), 3, "exactly three total attempts");

    // Linear backoff: retries at +60s and +120s after their failures.
    let times = handler.attempt_times.lock().clone();
    let offsets: Vec<u64> = times.iter().map(|t| (*t - start).as_secs()).collect();
    assert_eq!(offsets, vec![0, 60, 180]);

    let metrics = bus.metrics();
    assert_eq!(metrics.events_retried, 2);
    assert_eq!(metrics.events_failed, 1);
    assert_eq!(metrics.events_completed, 0);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_on_retry() {
    let archive = Arc::new(MemoryArchive::new());
    let bus = bus_with(archive.clone());
    let handler = FlakyHandler::failing_times(1);
    bus.register_handler(EventCategory::System, handler.clone());

    let event = Event::new(EventCategory::System, "test", "flaky once");
    let event_id = event.id.clone();
    bus.publish(event).unwrap();

    let record = wait_terminal(&archive, &event_id).await;
    assert_eq!(record["processing_status"], "completed");
    assert_eq!(record["retry_count"], 1);
    assert_eq!(handler.attempts(), 2);

    let metrics = bus.metrics();
    assert_eq!(metrics.events_retried, 1);
    assert_eq!(metrics.events_completed, 1);
    assert_eq!(metrics.events_failed, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_retry_as_failed() {
    let archive = Arc::new(MemoryArchive::new());
    let bus = bus_with(archive.clone());
    let handler = FlakyHandler::failing_forever();
    bus.register_handler(EventCategory::System, handler.clone());

    let event = Event::new(EventCategory::System, "test", "cut short");
    let event_id = event.id.clone();
    bus.publish(event).unwrap();

    // Let the first attempt fail and the 60s retry timer start.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handler.attempts(), 1);

    // A 5s deadline expires long before the retry timer; the pending retry
    // must be cancelled into a terminal failure.
    bus.shutdown(Duration::from_secs(5)).await;

    let record = archive.get(&event_id).expect("event must be archived");
    assert_eq!(record["processing_status"], "failed");
    assert_eq!(handler.attempts(), 1, "no further attempts after shutdown");
}
