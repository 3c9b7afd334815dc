//! The event record flowing through the service.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Format used for [`EventRecord::timestamp_text`] when rendered from an epoch.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single occurrence reported by a device.
///
/// `timestamp_epoch` and `timestamp_text` are expected to describe the same
/// instant. Nothing checks this; [`EventRecord::at`] renders the text from
/// the epoch so callers using it get a consistent pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub device_id: String,
    pub event_id: String,
    pub device_name: String,
    pub event_type: String,
    pub timestamp_epoch: i64,
    pub timestamp_text: String,
    pub description: String,
}

impl EventRecord {
    /// Build a record whose text timestamp is rendered (UTC) from `timestamp_epoch`.
    pub fn at(
        device_id: impl Into<String>,
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        timestamp_epoch: i64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            event_id: event_id.into(),
            device_name: String::new(),
            event_type: event_type.into(),
            timestamp_epoch,
            timestamp_text: render_timestamp(timestamp_epoch),
            description: String::new(),
        }
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Render an epoch as UTC text. Out-of-range epochs render as an empty string.
pub fn render_timestamp(epoch: i64) -> String {
    DateTime::from_timestamp(epoch, 0)
        .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}
