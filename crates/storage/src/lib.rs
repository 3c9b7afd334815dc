//! SQLite-backed, month-partitioned event storage.
//!
//! Every event reported to the service ends up as one row in the `events`
//! table of the partition for the month it was recorded in. Each calendar
//! month gets its own database file, created lazily the first time a session
//! for that month is opened.
//!
//! # Core Concepts
//!
//! ## EventRecord
//!
//! An [`EventRecord`] is the immutable description of one occurrence: the
//! reporting device, an event id, a type, the instant (as epoch seconds and as
//! text) and a free-form description.
//!
//! ## Partition
//!
//! A [`Partition`] names one `(year, month)` pair. It decides the file name a
//! session writes into (`eventdb2023_11.db` for November 2023).
//!
//! ## PartitionStore and EventSink
//!
//! A [`PartitionStore`] is an open SQLite session for one partition. The
//! [`EventSink`] trait is the narrow insert-only view the persistence worker
//! writes through.
//!
//! # Example
//!
//! ```no_run
//! use storage::{EventRecord, Partition, PartitionStore};
//!
//! let store = PartitionStore::open("./data", Partition::new(2023, 11))?;
//! let id = store.append(&EventRecord::at("cam1", "e1", "motion", 1_700_000_000))?;
//! println!("stored as row {id}");
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod event;
mod partition;
mod store;

pub use error::{Error, Result};
pub use event::{EventRecord, TIMESTAMP_FORMAT, render_timestamp};
pub use partition::Partition;
pub use store::{EventSink, PartitionStore};
