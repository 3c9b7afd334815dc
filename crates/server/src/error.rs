//! Event server error types.

use crate::config::StoreType;
use thiserror::Error;

/// Event server errors.
///
/// None of these reach producers: `submit` is fire-and-forget. They surface
/// from lifecycle calls (`start`, `shutdown`) and inside the workers, where
/// they are logged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The configured store type has no backend.
    #[error("unsupported store type: {0}")]
    UnsupportedStore(StoreType),

    /// An error occurred in the storage layer.
    #[error(transparent)]
    Storage(#[from] storage::Error),

    /// `start` was called on a server that is already running.
    #[error("event server already started")]
    AlreadyStarted,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A worker thread panicked before it could be joined.
    #[error("worker thread '{0}' panicked")]
    WorkerPanicked(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
