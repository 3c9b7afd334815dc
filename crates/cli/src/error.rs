//! CLI error types.

use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration is invalid or unreadable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred in the event server.
    #[error(transparent)]
    Server(#[from] server::Error),

    /// An input line was not a valid event.
    #[error("invalid event: {0}")]
    Json(#[from] serde_json::Error),

    /// A background task failed to complete.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
