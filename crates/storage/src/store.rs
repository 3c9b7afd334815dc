//! SQLite partition store implementation.

use crate::{EventRecord, Partition, Result};
use rusqlite::{Connection, params};
use std::path::Path;
use tracing::debug;

/// An open storage session accepting event inserts.
///
/// Implemented by [`PartitionStore`]; the persistence worker only sees this
/// trait so other backends (and test doubles) can stand in.
pub trait EventSink: Send {
    /// The partition this session writes into.
    fn partition(&self) -> Partition;

    /// Append one event, returning the assigned row id.
    fn insert(&mut self, event: &EventRecord) -> Result<i64>;
}

/// SQLite-backed store for a single month partition.
pub struct PartitionStore {
    conn: Connection,
    partition: Partition,
}

impl PartitionStore {
    /// Open or create the partition's database file inside `dir`.
    pub fn open(dir: impl AsRef<Path>, partition: Partition) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = partition.file_in(dir);
        debug!(path = %path.display(), %partition, "opening partition");
        let conn = Connection::open(path)?;
        let store = Self { conn, partition };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory partition (useful for testing).
    pub fn in_memory(partition: Partition) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, partition };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device TEXT,
                eventId TEXT,
                deviceName TEXT,
                eventType TEXT,
                eventTimeEpoch INTEGER,
                eventTimeText TEXT,
                description TEXT
            );
            "#,
        )?;
        Ok(())
    }

    /// Append an event to the partition.
    pub fn append(&self, event: &EventRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO events (device, eventId, deviceName, eventType, eventTimeEpoch, eventTimeText, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.device_id,
                event.event_id,
                event.device_name,
                event.event_type,
                event.timestamp_epoch,
                event.timestamp_text,
                event.description,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Number of events stored in this partition.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl EventSink for PartitionStore {
    fn partition(&self) -> Partition {
        self.partition
    }

    fn insert(&mut self, event: &EventRecord) -> Result<i64> {
        self.append(event)
    }
}
