//! Priority queue for the event bus.
//!
//! Five bounded FIFO sub-queues, one per priority level. Enqueue never
//! blocks: overflow sheds the newest event and reports it to the caller.
//! Dequeue drains the highest non-empty level first and parks until work
//! arrives or the queue is closed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use hv_common::{Event, EventPriority};

/// Result of a non-blocking enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// The event's own sub-queue is at capacity; the event was shed.
    DroppedFull,
    /// The queue is closed and accepts no further events.
    Closed,
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted)
    }
}

/// Multi-producer multi-consumer priority queue.
///
/// Workers must not hold any lock across handler calls; all locking here is
/// confined to short push/pop critical sections.
pub struct PriorityQueue {
    levels: [Mutex<VecDeque<Event>>; 5],
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl PriorityQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            levels: Default::default(),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue an event at its priority level. Never blocks; a full
    /// sub-queue sheds the newest event and returns `DroppedFull`.
    pub fn enqueue(&self, event: Event) -> EnqueueOutcome {
        if self.closed.load(Ordering::SeqCst) {
            return EnqueueOutcome::Closed;
        }

        let level = &self.levels[event.priority.index()];
        {
            let mut queue = level.lock();
            if queue.len() >= self.capacity {
                drop(queue);
                self.dropped.fetch_add(1, Ordering::SeqCst);
                warn!(
                    event_id = %event.id,
                    priority = %event.priority,
                    capacity = self.capacity,
                    "Sub-queue full, dropping event"
                );
                return EnqueueOutcome::DroppedFull;
            }
            queue.push_back(event);
        }

        self.notify.notify_one();
        EnqueueOutcome::Accepted
    }

    /// Re-enqueue an event the bus already accepted once (retry path).
    ///
    /// Bypasses the capacity bound: an admitted event must terminate in a
    /// final status, never be shed by its own retry. A closed queue hands
    /// the event back so the caller can finalize it.
    pub fn requeue(&self, event: Event) -> std::result::Result<(), Event> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(event);
        }

        debug!(event_id = %event.id, retry_count = event.retry_count, "Requeueing event");
        self.levels[event.priority.index()].lock().push_back(event);
        self.notify.notify_one();
        Ok(())
    }

    /// Pop the oldest event from the highest non-empty level, waiting until
    /// one arrives. Returns `None` once the queue is closed and drained.
    pub async fn dequeue_highest(&self) -> Option<Event> {
        loop {
            let notified = self.notify.notified();

            if let Some(event) = self.try_dequeue() {
                return Some(event);
            }

            if self.closed.load(Ordering::SeqCst) {
                return None;
            }

            notified.await;
        }
    }

    /// Non-blocking variant of [`dequeue_highest`](Self::dequeue_highest).
    pub fn try_dequeue(&self) -> Option<Event> {
        for priority in EventPriority::DESCENDING {
            let mut queue = self.levels[priority.index()].lock();
            if let Some(event) = queue.pop_front() {
                let more = !queue.is_empty();
                drop(queue);
                if more {
                    // Pass the wakeup on so sibling workers keep draining.
                    self.notify.notify_one();
                }
                return Some(event);
            }
        }
        None
    }

    /// Stop accepting events and wake all parked consumers. Events already
    /// queued remain dequeueable until drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue depth per priority level, lowest first.
    pub fn depths(&self) -> [u64; 5] {
        let mut depths = [0u64; 5];
        for (i, level) in self.levels.iter().enumerate() {
            depths[i] = level.lock().len() as u64;
        }
        depths
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(|l| l.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(|l| l.lock().is_empty())
    }

    /// Total events shed at the bound since startup.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}
