//! Haven event bus.
//!
//! This crate assembles the event-processing fabric:
//! - HandlerRegistry: category → ordered subscriber callbacks
//! - Dispatcher: priority-ordered workers with per-event retry and isolation
//! - BusMetrics / health: counters, queue gauges, liveness snapshot
//! - RealtimeBroadcaster: optional fan-out of selected events
//! - EventArchive: sink interface for terminal events
//! - EventBus: the typed in-process facade consumed by the HTTP surface

pub mod archive;
pub mod broadcast;
pub mod bus;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod registry;

pub use archive::{EventArchive, MemoryArchive, NoopArchive};
pub use broadcast::RealtimeBroadcaster;
pub use bus::EventBus;
pub use error::BusError;
pub use metrics::BusMetrics;
pub use registry::{EventHandler, HandlerRegistry, PERSONAL_LOG_HANDLER_ID};

pub type Result<T> = std::result::Result<T, BusError>;
