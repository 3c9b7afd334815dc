//! The event server facade.

use crate::backend::{SessionFactory, SqliteFactory};
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigProvider;
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::persistence::{PersistStats, PersistenceWorker, WorkerOptions};
use crate::queue::BlockingQueue;
use crate::registry::{ListenerKey, ListenerRegistry};
use crate::rotation::RotationPolicy;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use storage::EventRecord;
use tracing::{info, warn};

const DB_THREAD: &str = "event-db";
const NOTIFY_THREAD: &str = "event-notify";

/// How [`EventServer::shutdown`] treats events still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Process everything already submitted, then stop.
    Drain,
    /// Discard queued events; stop after the one in progress.
    Immediate,
}

/// Snapshot of the worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub submitted: u64,
    pub persisted: u64,
    pub dropped: u64,
    pub failed: u64,
    pub rotations: u64,
    pub open_attempts: u64,
    pub dispatched: u64,
    pub listener_faults: u64,
}

impl std::fmt::Display for ServerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "submitted={} persisted={} dropped={} failed={} rotations={} open_attempts={} dispatched={} listener_faults={}",
            self.submitted,
            self.persisted,
            self.dropped,
            self.failed,
            self.rotations,
            self.open_attempts,
            self.dispatched,
            self.listener_faults
        )
    }
}

/// Pushes every event onto each consumer queue, in order.
struct FanOut<T> {
    queues: Vec<Arc<BlockingQueue<T>>>,
}

impl<T: Clone> FanOut<T> {
    fn new(queues: Vec<Arc<BlockingQueue<T>>>) -> Self {
        Self { queues }
    }

    /// Returns `false` if any queue refused the item.
    fn push(&self, item: &T) -> bool {
        self.queues
            .iter()
            .fold(true, |accepted, queue| queue.push(item.clone()) && accepted)
    }

    fn close(&self) {
        self.queues.iter().for_each(|q| q.close());
    }

    fn abort(&self) -> usize {
        self.queues.iter().map(|q| q.abort()).sum()
    }
}

/// Entry point for producers and listeners.
///
/// Every submitted event is handed to two independent workers, each on its
/// own thread: one writes it into the month partition, the other calls the
/// registered listeners. Neither blocks the producer.
///
/// # Example
///
/// ```no_run
/// use server::{EventDbConfig, EventServer, Shutdown, StoreType};
/// use storage::EventRecord;
///
/// let mut server = EventServer::builder(EventDbConfig::new(StoreType::Sqlite, "./data")).build();
/// server.register_listener("console", |key: &&str, event: &EventRecord| {
///     println!("{key}: {} from {}", event.event_type, event.device_id);
/// });
/// server.start()?;
/// server.submit(EventRecord::at("cam1", "e1", "motion", 1_700_000_000));
/// server.shutdown(Shutdown::Drain)?;
/// # Ok::<(), server::Error>(())
/// ```
pub struct EventServer<K: ListenerKey> {
    fan_out: FanOut<EventRecord>,
    persist_queue: Arc<BlockingQueue<EventRecord>>,
    notify_queue: Arc<BlockingQueue<EventRecord>>,
    registry: Arc<ListenerRegistry<K>>,
    config: Arc<dyn ConfigProvider>,
    factory: Mutex<Option<Box<dyn SessionFactory>>>,
    clock: Arc<dyn Clock>,
    options: WorkerOptions,
    persist_stats: Arc<PersistStats>,
    dispatch_stats: Arc<DispatchStats>,
    submitted: AtomicU64,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl<K: ListenerKey> EventServer<K> {
    /// Create a builder for configuring an event server.
    pub fn builder(config: impl ConfigProvider + 'static) -> EventServerBuilder<K> {
        EventServerBuilder::new(Arc::new(config))
    }

    /// Server with default clock, rotation and SQLite backend.
    pub fn new(config: impl ConfigProvider + 'static) -> Self {
        Self::builder(config).build()
    }

    /// Hand an event to both workers without waiting for either.
    ///
    /// Returns `false` once the server is shutting down.
    pub fn submit(&self, event: EventRecord) -> bool {
        let accepted = self.fan_out.push(&event);
        if accepted {
            self.submitted.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    /// Register (or replace) the callback for `key`.
    pub fn register_listener<F>(&self, key: K, callback: F) -> bool
    where
        F: Fn(&K, &EventRecord) + Send + Sync + 'static,
    {
        self.registry.register(key, Arc::new(callback))
    }

    /// Remove the callback for `key`. Absent keys are not an error.
    pub fn unregister_listener(&self, key: &K) -> bool {
        self.registry.unregister(key)
    }

    /// Spawn the persistence and notification threads.
    pub fn start(&mut self) -> Result<()> {
        let Some(factory) = self.factory.get_mut().take() else {
            return Err(Error::AlreadyStarted);
        };

        let worker = PersistenceWorker::new(
            self.persist_queue.clone(),
            self.config.clone(),
            factory,
            self.clock.clone(),
            self.options.clone(),
            self.persist_stats.clone(),
        );
        let handle = thread::Builder::new()
            .name(DB_THREAD.to_string())
            .spawn(move || worker.run())
            .map_err(Error::Spawn)?;
        self.workers.push((DB_THREAD, handle));

        let dispatcher = Dispatcher::new(
            self.notify_queue.clone(),
            self.registry.clone(),
            self.dispatch_stats.clone(),
        );
        let handle = thread::Builder::new()
            .name(NOTIFY_THREAD.to_string())
            .spawn(move || dispatcher.run())
            .map_err(Error::Spawn)?;
        self.workers.push((NOTIFY_THREAD, handle));

        info!(rotation = ?self.options.rotation, "event server started");
        Ok(())
    }

    /// Stop accepting events and wait for both workers to exit.
    pub fn shutdown(&mut self, mode: Shutdown) -> Result<()> {
        match mode {
            Shutdown::Drain => self.fan_out.close(),
            Shutdown::Immediate => {
                let discarded = self.fan_out.abort();
                if discarded > 0 {
                    warn!(discarded, "discarded queued events on shutdown");
                }
            }
        }

        let running = !self.workers.is_empty();
        let mut result = Ok(());
        for (name, handle) in self.workers.drain(..) {
            if handle.join().is_err() {
                result = Err(Error::WorkerPanicked(name));
            }
        }
        if running {
            info!(stats = %self.stats(), "event server stopped");
        }
        result
    }

    pub fn stats(&self) -> ServerStats {
        let p = &self.persist_stats;
        let d = &self.dispatch_stats;
        ServerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            persisted: p.persisted.load(Ordering::Relaxed),
            dropped: p.dropped.load(Ordering::Relaxed),
            failed: p.failed.load(Ordering::Relaxed),
            rotations: p.rotations.load(Ordering::Relaxed),
            open_attempts: p.open_attempts.load(Ordering::Relaxed),
            dispatched: d.dispatched.load(Ordering::Relaxed),
            listener_faults: d.listener_faults.load(Ordering::Relaxed),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }
}

impl<K: ListenerKey> Drop for EventServer<K> {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            if let Err(e) = self.shutdown(Shutdown::Drain) {
                warn!(error = %e, "event server shutdown on drop failed");
            }
        }
    }
}

/// Builder for [`EventServer`].
pub struct EventServerBuilder<K> {
    config: Arc<dyn ConfigProvider>,
    factory: Box<dyn SessionFactory>,
    clock: Arc<dyn Clock>,
    options: WorkerOptions,
    _key: PhantomData<fn() -> K>,
}

impl<K: ListenerKey> EventServerBuilder<K> {
    fn new(config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            config,
            factory: Box::new(SqliteFactory),
            clock: Arc::new(SystemClock),
            options: WorkerOptions::default(),
            _key: PhantomData,
        }
    }

    /// Use a different storage backend.
    pub fn session_factory(mut self, factory: impl SessionFactory + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    /// Use a different time source for partition rotation.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn rotation(mut self, policy: RotationPolicy) -> Self {
        self.options.rotation = policy;
        self
    }

    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.options.idle_backoff = backoff;
        self
    }

    /// Keep up to `limit` events while the store is unavailable.
    pub fn pending_limit(mut self, limit: usize) -> Self {
        self.options.pending_limit = limit;
        self
    }

    pub fn build(self) -> EventServer<K> {
        let persist_queue = Arc::new(BlockingQueue::new());
        let notify_queue = Arc::new(BlockingQueue::new());
        EventServer {
            fan_out: FanOut::new(vec![persist_queue.clone(), notify_queue.clone()]),
            persist_queue,
            notify_queue,
            registry: Arc::new(ListenerRegistry::new()),
            config: self.config,
            factory: Mutex::new(Some(self.factory)),
            clock: self.clock,
            options: self.options,
            persist_stats: Arc::new(PersistStats::default()),
            dispatch_stats: Arc::new(DispatchStats::default()),
            submitted: AtomicU64::new(0),
            workers: Vec::new(),
        }
    }
}
