//! Storage backends the persistence worker can open sessions on.

use crate::config::{EventDbConfig, StoreType};
use crate::{Error, Result};
use storage::{EventSink, Partition, PartitionStore};

/// Opens a storage session for one partition.
///
/// Implementations decide which [`StoreType`]s they support and return
/// [`Error::UnsupportedStore`] for the rest.
pub trait SessionFactory: Send {
    fn open(&mut self, config: &EventDbConfig, partition: Partition) -> Result<Box<dyn EventSink>>;
}

/// SQLite files, one per month, under `config.store_path`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteFactory;

impl SessionFactory for SqliteFactory {
    fn open(&mut self, config: &EventDbConfig, partition: Partition) -> Result<Box<dyn EventSink>> {
        match config.store_type {
            StoreType::Sqlite => Ok(Box::new(PartitionStore::open(
                &config.store_path,
                partition,
            )?)),
            ref other => Err(Error::UnsupportedStore(other.clone())),
        }
    }
}
