//! In-process event distribution.
//!
//! Producers hand [`EventRecord`](storage::EventRecord)s to an
//! [`EventServer`]. Each event is then
//!
//! 1. written into the storage partition for the current month, and
//! 2. delivered to every listener registered when the event is dispatched,
//!
//! by two independent workers running on their own threads. The producer
//! never waits on either.
//!
//! # Overview
//!
//! - **BlockingQueue**: FIFO each worker drains; closing it ends the worker.
//! - **Dispatcher**: pops events and calls the listeners from a snapshot of
//!   the [`ListenerRegistry`].
//! - **PersistenceWorker**: pops events and inserts them through a
//!   [`SessionFactory`]-provided session, rotating to a new partition when
//!   the month changes. The [`RotationPolicy`] limits how often that is
//!   checked.
//! - **EventServer**: fans each submitted event out to both queues and owns
//!   the worker threads.
//!
//! Configuration is read through a [`ConfigProvider`], so the store type and
//! location can change while the server runs; the persistence worker picks
//! up the new values the next time it opens a session.

mod backend;
mod clock;
mod config;
mod dispatcher;
mod error;
mod persistence;
mod queue;
mod registry;
mod rotation;
mod server;

pub use backend::{SessionFactory, SqliteFactory};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigProvider, EventDbConfig, SharedConfig, StoreType};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use error::{Error, Result};
pub use persistence::{DEFAULT_IDLE_BACKOFF, PersistStats, PersistenceWorker, WorkerOptions};
pub use queue::{BlockingQueue, Pop};
pub use registry::{Listener, ListenerKey, ListenerRegistry};
pub use rotation::{RotationPolicy, Throttle};
pub use server::{EventServer, EventServerBuilder, ServerStats, Shutdown};
