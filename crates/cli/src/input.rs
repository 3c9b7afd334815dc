//! JSON-lines event input.

use serde::Deserialize;
use storage::{EventRecord, render_timestamp};

use crate::error::Result;

/// One input line. Only the device and type are required; the rest is
/// filled in when missing.
#[derive(Debug, Deserialize)]
struct InputEvent {
    device_id: String,
    event_type: String,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    device_name: String,
    #[serde(default)]
    timestamp_epoch: Option<i64>,
    #[serde(default)]
    timestamp_text: Option<String>,
    #[serde(default)]
    description: String,
}

/// Parse one JSON line into an event.
///
/// A missing `event_id` gets a fresh UUID, a missing `timestamp_epoch` is
/// `now`, and a missing `timestamp_text` is rendered from the epoch.
pub fn parse_event(line: &str, now: i64) -> Result<EventRecord> {
    let input: InputEvent = serde_json::from_str(line)?;
    let timestamp_epoch = input.timestamp_epoch.unwrap_or(now);

    Ok(EventRecord {
        device_id: input.device_id,
        event_id: input
            .event_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        device_name: input.device_name,
        event_type: input.event_type,
        timestamp_epoch,
        timestamp_text: input
            .timestamp_text
            .unwrap_or_else(|| render_timestamp(timestamp_epoch)),
        description: input.description,
    })
}
