//! Notification dispatcher: fans each queued event out to the listeners.

use crate::queue::BlockingQueue;
use crate::registry::{ListenerKey, ListenerRegistry};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use storage::EventRecord;
use tracing::{debug, error};

/// Counters kept by the dispatcher thread.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub dispatched: AtomicU64,
    pub listener_faults: AtomicU64,
}

/// Drains its queue and calls every registered listener for each event.
///
/// The listener set is read when an event is processed, not when it was
/// submitted. The registry lock is held only while the entries are copied;
/// callbacks run without it, so registration never waits on a slow
/// listener. A listener that panics is logged and skipped. A listener that
/// blocks stalls every later event on this queue.
pub struct Dispatcher<K> {
    queue: Arc<BlockingQueue<EventRecord>>,
    registry: Arc<ListenerRegistry<K>>,
    stats: Arc<DispatchStats>,
}

impl<K: ListenerKey> Dispatcher<K> {
    pub fn new(
        queue: Arc<BlockingQueue<EventRecord>>,
        registry: Arc<ListenerRegistry<K>>,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            queue,
            registry,
            stats,
        }
    }

    /// Process events until the queue is closed and drained.
    pub fn run(self) {
        debug!("dispatcher started");
        while let Some(event) = self.queue.blocking_pop() {
            self.dispatch(&event);
        }
        debug!("dispatcher stopped");
    }

    /// Deliver one event to every listener registered right now.
    pub fn dispatch(&self, event: &EventRecord) {
        let listeners = self.registry.snapshot();
        debug!(
            event_id = %event.event_id,
            listeners = listeners.len(),
            "dispatching event"
        );

        for (key, listener) in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(key, event))).is_err() {
                self.stats.listener_faults.fetch_add(1, Ordering::Relaxed);
                error!(listener = ?key, event_id = %event.event_id, "listener panicked");
            }
        }
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
    }
}
