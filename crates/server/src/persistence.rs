//! Persistence worker: writes queued events into month partitions.

use crate::Error;
use crate::backend::SessionFactory;
use crate::clock::Clock;
use crate::config::ConfigProvider;
use crate::queue::{BlockingQueue, Pop};
use crate::rotation::{RotationPolicy, Throttle};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use storage::{EventRecord, EventSink, Partition};
use tracing::{debug, error, info, warn};

/// Default pause after a failed session open.
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_secs(1);

/// Tuning for the persistence worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// When to re-check whether the month changed.
    pub rotation: RotationPolicy,

    /// Pause after a failed open, and the minimum spacing between retries.
    pub idle_backoff: Duration,

    /// Events kept while no session is open. Zero drops them.
    pub pending_limit: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            rotation: RotationPolicy::default(),
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            pending_limit: 0,
        }
    }
}

/// Counters kept by the persistence thread.
#[derive(Debug, Default)]
pub struct PersistStats {
    pub persisted: AtomicU64,
    pub dropped: AtomicU64,
    pub failed: AtomicU64,
    pub rotations: AtomicU64,
    pub open_attempts: AtomicU64,
}

/// Drains its queue into the partition for the current month.
///
/// On start the session for the current month is opened unconditionally.
/// After that the [`Throttle`] decides before each event whether to compare
/// the clock's month against the open partition; when they differ the old
/// session is dropped and the new month's is opened.
///
/// Without a session (unsupported store type, open failure) the worker is
/// idle: events are dropped, or kept up to `pending_limit`, and opening is
/// retried at most once per `idle_backoff`.
pub struct PersistenceWorker {
    queue: Arc<BlockingQueue<EventRecord>>,
    config: Arc<dyn ConfigProvider>,
    factory: Box<dyn SessionFactory>,
    clock: Arc<dyn Clock>,
    throttle: Throttle,
    idle_backoff: Duration,
    pending_limit: usize,
    pending: VecDeque<EventRecord>,
    session: Option<Box<dyn EventSink>>,
    last_opened: Option<Partition>,
    last_attempt: Option<Instant>,
    stats: Arc<PersistStats>,
}

impl PersistenceWorker {
    pub fn new(
        queue: Arc<BlockingQueue<EventRecord>>,
        config: Arc<dyn ConfigProvider>,
        factory: Box<dyn SessionFactory>,
        clock: Arc<dyn Clock>,
        options: WorkerOptions,
        stats: Arc<PersistStats>,
    ) -> Self {
        Self {
            queue,
            config,
            factory,
            clock,
            throttle: Throttle::new(options.rotation),
            idle_backoff: options.idle_backoff,
            pending_limit: options.pending_limit,
            pending: VecDeque::new(),
            session: None,
            last_opened: None,
            last_attempt: None,
            stats,
        }
    }

    /// Process events until the queue is closed and drained.
    pub fn run(mut self) {
        self.begin();

        loop {
            // While idle with buffered events, wake up periodically so they
            // get flushed once the store becomes available.
            let event = if self.session.is_none() && !self.pending.is_empty() {
                match self.queue.pop_timeout(self.idle_backoff) {
                    Pop::Item(event) => event,
                    Pop::Timeout => {
                        self.retry_open();
                        continue;
                    }
                    Pop::Closed => break,
                }
            } else {
                match self.queue.blocking_pop() {
                    Some(event) => event,
                    None => break,
                }
            };
            self.handle(event);
        }

        self.finish();
    }

    /// Open the current month's session, bypassing the throttle.
    fn begin(&mut self) {
        let now = self.clock.now();
        self.throttle.mark(now);
        info!(policy = ?self.throttle.policy(), "persistence worker started");
        self.open(Partition::containing(now));
    }

    fn handle(&mut self, event: EventRecord) {
        let now = self.clock.now();
        if self.session.is_none() {
            self.retry_open();
        } else if self.throttle.due(now) {
            self.rotate_if_needed(Partition::containing(now));
        }

        if self.session.is_some() {
            self.insert(&event);
        } else {
            self.park(event);
        }
    }

    fn rotate_if_needed(&mut self, current: Partition) {
        let Some(open) = self.session.as_ref().map(|s| s.partition()) else {
            return;
        };
        if open == current {
            return;
        }

        info!(from = %open, to = %current, "month changed, rotating partition");
        self.session = None;
        self.open(current);
    }

    fn retry_open(&mut self) {
        if let Some(last) = self.last_attempt {
            if last.elapsed() < self.idle_backoff {
                return;
            }
        }
        let partition = Partition::containing(self.clock.now());
        self.open(partition);
    }

    /// Try to open a session for `partition`. On failure the worker pauses
    /// for `idle_backoff` before returning.
    ///
    /// A rotation is counted whenever the opened partition differs from the
    /// previously opened one, whether it came from the throttled check or a
    /// retry after a failed open.
    fn open(&mut self, partition: Partition) -> bool {
        let config = self.config.event_db_config();
        self.stats.open_attempts.fetch_add(1, Ordering::Relaxed);

        let opened = match self.factory.open(&config, partition) {
            Ok(session) => {
                info!(
                    %partition,
                    store = %config.store_type,
                    path = %config.store_path.display(),
                    "opened event partition"
                );
                if self.last_opened.is_some_and(|last| last != partition) {
                    self.stats.rotations.fetch_add(1, Ordering::Relaxed);
                }
                self.last_opened = Some(partition);
                self.session = Some(session);
                true
            }
            Err(Error::UnsupportedStore(store_type)) => {
                warn!(%store_type, "event store type not supported, persistence idle");
                false
            }
            Err(e) => {
                error!(error = %e, %partition, "failed to open event partition");
                false
            }
        };

        if opened {
            self.flush_pending();
        } else {
            thread::sleep(self.idle_backoff);
        }
        self.last_attempt = Some(Instant::now());
        opened
    }

    fn insert(&mut self, event: &EventRecord) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.insert(event) {
            Ok(id) => {
                self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                debug!(id, event_id = %event.event_id, partition = %session.partition(), "persisted event");
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, event_id = %event.event_id, "failed to persist event");
            }
        }
    }

    fn park(&mut self, event: EventRecord) {
        if self.pending.len() < self.pending_limit {
            self.pending.push_back(event);
        } else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(event_id = %event.event_id, "no storage session, dropping event");
        }
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        info!(count = self.pending.len(), "flushing events buffered while idle");
        while let Some(event) = self.pending.pop_front() {
            self.insert(&event);
        }
    }

    fn finish(&mut self) {
        if !self.pending.is_empty() {
            let count = self.pending.len() as u64;
            self.stats.dropped.fetch_add(count, Ordering::Relaxed);
            warn!(count, "discarding buffered events at shutdown, no storage session");
            self.pending.clear();
        }
        self.session = None;
        info!("persistence worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteFactory;
    use crate::clock::ManualClock;
    use crate::config::{EventDbConfig, SharedConfig, StoreType};
    use crate::Result;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use storage::PartitionStore;

    /// Records every open and insert; only supports SQLite config.
    #[derive(Clone, Default)]
    struct Recorder {
        opened: Arc<Mutex<Vec<Partition>>>,
        inserted: Arc<Mutex<Vec<(Partition, EventRecord)>>>,
        fail_event: Option<String>,
    }

    struct RecordingSink {
        partition: Partition,
        recorder: Recorder,
    }

    impl EventSink for RecordingSink {
        fn partition(&self) -> Partition {
            self.partition
        }

        fn insert(&mut self, event: &EventRecord) -> storage::Result<i64> {
            if self.recorder.fail_event.as_deref() == Some(event.event_id.as_str()) {
                return Err(storage::Error::Io(std::io::Error::other("disk full")));
            }
            let mut inserted = self.recorder.inserted.lock();
            inserted.push((self.partition, event.clone()));
            Ok(inserted.len() as i64)
        }
    }

    impl SessionFactory for Recorder {
        fn open(
            &mut self,
            config: &EventDbConfig,
            partition: Partition,
        ) -> Result<Box<dyn EventSink>> {
            if config.store_type != StoreType::Sqlite {
                return Err(Error::UnsupportedStore(config.store_type.clone()));
            }
            self.opened.lock().push(partition);
            Ok(Box::new(RecordingSink {
                partition,
                recorder: self.clone(),
            }))
        }
    }

    fn worker(
        config: Arc<dyn ConfigProvider>,
        factory: Box<dyn SessionFactory>,
        clock: Arc<ManualClock>,
        options: WorkerOptions,
    ) -> (PersistenceWorker, Arc<BlockingQueue<EventRecord>>, Arc<PersistStats>) {
        let queue = Arc::new(BlockingQueue::new());
        let stats = Arc::new(PersistStats::default());
        let worker = PersistenceWorker::new(
            queue.clone(),
            config,
            factory,
            clock,
            options,
            stats.clone(),
        );
        (worker, queue, stats)
    }

    fn sqlite() -> Arc<dyn ConfigProvider> {
        Arc::new(EventDbConfig::new(StoreType::Sqlite, "unused"))
    }

    #[test]
    fn one_new_partition_per_month_boundary() {
        let start = Utc.with_ymd_and_hms(2023, 11, 20, 5, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let recorder = Recorder::default();
        let (mut worker, _, stats) = worker(
            sqlite(),
            Box::new(recorder.clone()),
            clock.clone(),
            WorkerOptions::default(),
        );

        worker.begin();
        let end = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let mut n = 0;
        while clock.now() < end {
            // Event volume varies hour to hour.
            for _ in 0..(n % 4) {
                worker.handle(EventRecord::at("cam1", format!("e{n}"), "motion", n));
            }
            n += 1;
            clock.advance(chrono::Duration::hours(1));
        }

        assert_eq!(
            *recorder.opened.lock(),
            vec![
                Partition::new(2023, 11),
                Partition::new(2023, 12),
                Partition::new(2024, 1),
                Partition::new(2024, 2),
                Partition::new(2024, 3),
            ]
        );
        assert_eq!(stats.rotations.load(Ordering::SeqCst), 4);

        // Every event landed in the month it was handled in.
        for (partition, event) in recorder.inserted.lock().iter() {
            let handled_at = start + chrono::Duration::hours(event.timestamp_epoch);
            assert_eq!(*partition, Partition::containing(handled_at));
        }
    }

    #[test]
    fn rotation_happens_at_first_event_after_midnight() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 31, 23, 0, 0).unwrap(),
        ));
        let recorder = Recorder::default();
        let (mut worker, _, _) = worker(
            sqlite(),
            Box::new(recorder.clone()),
            clock.clone(),
            WorkerOptions::default(),
        );

        worker.begin();
        worker.handle(EventRecord::at("cam1", "jan", "motion", 0));
        clock.set(Utc.with_ymd_and_hms(2024, 2, 1, 7, 30, 0).unwrap());
        worker.handle(EventRecord::at("cam1", "feb", "motion", 0));

        let inserted = recorder.inserted.lock();
        assert_eq!(inserted[0].0, Partition::new(2024, 1));
        assert_eq!(inserted[1].0, Partition::new(2024, 2));
    }

    #[test]
    fn unsupported_store_drops_without_spinning() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let recorder = Recorder::default();
        let backoff = Duration::from_millis(20);
        let (worker, queue, stats) = worker(
            Arc::new(EventDbConfig::new(StoreType::Firebird, "unused")),
            Box::new(recorder.clone()),
            clock,
            WorkerOptions {
                idle_backoff: backoff,
                ..Default::default()
            },
        );

        for i in 0..50 {
            queue.push(EventRecord::at("cam1", format!("e{i}"), "motion", i));
        }
        queue.close();

        let started = Instant::now();
        thread::spawn(move || worker.run()).join().unwrap();
        let elapsed = started.elapsed();

        assert!(recorder.inserted.lock().is_empty());
        assert!(recorder.opened.lock().is_empty());
        assert_eq!(stats.dropped.load(Ordering::SeqCst), 50);

        let attempts = stats.open_attempts.load(Ordering::SeqCst);
        let allowed = (elapsed.as_millis() / backoff.as_millis()) as u64 + 1;
        assert!(attempts >= 1);
        assert!(attempts <= allowed, "{attempts} attempts in {elapsed:?}");
    }

    #[test]
    fn buffered_events_flush_once_store_becomes_available() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap(),
        ));
        let recorder = Recorder::default();
        let config = SharedConfig::new(EventDbConfig::new(StoreType::Postgres, "unused"));
        let (mut worker, _, stats) = worker(
            Arc::new(config.clone()),
            Box::new(recorder.clone()),
            clock,
            WorkerOptions {
                idle_backoff: Duration::ZERO,
                pending_limit: 2,
                ..Default::default()
            },
        );

        worker.begin();
        for id in ["a", "b", "c"] {
            worker.handle(EventRecord::at("cam1", id, "motion", 0));
        }
        assert_eq!(stats.dropped.load(Ordering::SeqCst), 1);

        config.set(EventDbConfig::new(StoreType::Sqlite, "unused"));
        worker.handle(EventRecord::at("cam1", "d", "motion", 0));

        let ids: Vec<_> = recorder
            .inserted
            .lock()
            .iter()
            .map(|(_, e)| e.event_id.clone())
            .collect();
        assert_eq!(ids, ["a", "b", "d"]);
        assert_eq!(stats.persisted.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn rotation_is_counted_when_new_month_opens_on_retry() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 31, 22, 0, 0).unwrap(),
        ));
        let recorder = Recorder::default();
        let config = SharedConfig::new(EventDbConfig::new(StoreType::Sqlite, "unused"));
        let (mut worker, _, stats) = worker(
            Arc::new(config.clone()),
            Box::new(recorder.clone()),
            clock.clone(),
            WorkerOptions {
                idle_backoff: Duration::ZERO,
                ..Default::default()
            },
        );

        worker.begin();
        worker.handle(EventRecord::at("cam1", "jan", "motion", 0));

        // The store is unavailable when February's partition is due.
        config.set(EventDbConfig::new(StoreType::Postgres, "unused"));
        clock.set(Utc.with_ymd_and_hms(2024, 2, 1, 1, 0, 0).unwrap());
        worker.handle(EventRecord::at("cam1", "lost", "motion", 0));
        assert_eq!(stats.rotations.load(Ordering::SeqCst), 0);

        config.set(EventDbConfig::new(StoreType::Sqlite, "unused"));
        worker.handle(EventRecord::at("cam1", "feb", "motion", 0));

        assert_eq!(
            *recorder.opened.lock(),
            vec![Partition::new(2024, 1), Partition::new(2024, 2)]
        );
        assert_eq!(stats.rotations.load(Ordering::SeqCst), 1);
        assert_eq!(stats.dropped.load(Ordering::SeqCst), 1);

        // Reopening the same month after another outage is not a rotation.
        config.set(EventDbConfig::new(StoreType::Postgres, "unused"));
        worker.session = None;
        worker.handle(EventRecord::at("cam1", "lost-2", "motion", 0));
        config.set(EventDbConfig::new(StoreType::Sqlite, "unused"));
        worker.handle(EventRecord::at("cam1", "feb-2", "motion", 0));
        assert_eq!(stats.rotations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_insert_is_counted_and_skipped() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let recorder = Recorder {
            fail_event: Some("bad".to_string()),
            ..Default::default()
        };
        let (worker, queue, stats) = worker(
            sqlite(),
            Box::new(recorder.clone()),
            clock,
            WorkerOptions::default(),
        );

        for id in ["ok1", "bad", "ok2"] {
            queue.push(EventRecord::at("cam1", id, "motion", 0));
        }
        queue.close();
        worker.run();

        assert_eq!(stats.persisted.load(Ordering::SeqCst), 2);
        assert_eq!(stats.failed.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.inserted.lock().len(), 2);
    }

    #[test]
    fn writes_month_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 30, 23, 59, 0).unwrap(),
        ));
        let (mut worker, _, stats) = worker(
            Arc::new(EventDbConfig::new(StoreType::Sqlite, dir.path())),
            Box::new(SqliteFactory),
            clock.clone(),
            WorkerOptions::default(),
        );

        worker.begin();
        worker.handle(EventRecord::at("cam1", "june", "motion", 0));
        clock.advance(chrono::Duration::minutes(2));
        worker.handle(EventRecord::at("cam1", "july-1", "motion", 0));
        worker.handle(EventRecord::at("cam1", "july-2", "motion", 0));
        worker.finish();

        assert_eq!(stats.persisted.load(Ordering::SeqCst), 3);
        let june = PartitionStore::open(dir.path(), Partition::new(2024, 6)).unwrap();
        let july = PartitionStore::open(dir.path(), Partition::new(2024, 7)).unwrap();
        assert_eq!(june.count().unwrap(), 1);
        assert_eq!(july.count().unwrap(), 2);
    }
}
