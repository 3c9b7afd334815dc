//! When the persistence worker re-checks which partition is current.
//!
//! Comparing the clock's month against the open partition is cheap, but it
//! still runs on the hot path of every insert. The policy narrows it down to
//! at most one check per window: the first event seen in a new window
//! triggers the check, so a window boundary is never skipped just because no
//! event landed on its exact first second.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SECONDS_PER_HOUR: i64 = 3600;
const SECONDS_PER_DAY: i64 = 24 * SECONDS_PER_HOUR;
const HOURS_PER_DAY: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum RotationPolicy {
    /// Once per UTC day, at the first event at or after `hour:00`.
    ///
    /// With a non-zero hour the month switch is late: events in the first
    /// `hour` hours of a new month still go to the previous month's
    /// partition.
    Daily {
        #[serde(deserialize_with = "hour_of_day")]
        hour: u32,
    },
    /// At the first event of each UTC hour.
    Hourly,
    /// Once per aligned interval.
    Every {
        #[serde(with = "seconds")]
        interval: Duration,
    },
    /// Before every event.
    Always,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::Daily { hour: 0 }
    }
}

impl RotationPolicy {
    /// Index of the check window containing `now`, or `None` when every
    /// instant is its own window.
    fn window(&self, now: DateTime<Utc>) -> Option<i64> {
        let ts = now.timestamp();
        match *self {
            Self::Daily { hour } => {
                let offset = i64::from(hour) * SECONDS_PER_HOUR;
                Some((ts - offset).div_euclid(SECONDS_PER_DAY))
            }
            Self::Hourly => Some(ts.div_euclid(SECONDS_PER_HOUR)),
            Self::Every { interval } => {
                let secs = (interval.as_secs() as i64).max(1);
                Some(ts.div_euclid(secs))
            }
            Self::Always => None,
        }
    }
}

/// Tracks the last window a check ran in.
#[derive(Debug, Clone)]
pub struct Throttle {
    policy: RotationPolicy,
    last_window: Option<i64>,
}

impl Throttle {
    pub fn new(policy: RotationPolicy) -> Self {
        Self {
            policy,
            last_window: None,
        }
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Record that a check happened at `now` without asking the policy.
    ///
    /// Used for the unconditional check on startup.
    pub fn mark(&mut self, now: DateTime<Utc>) {
        self.last_window = self.policy.window(now);
    }

    /// Whether a partition check is due at `now`. Marks the window as
    /// checked when it returns `true`.
    pub fn due(&mut self, now: DateTime<Utc>) -> bool {
        match self.policy.window(now) {
            None => true,
            Some(window) if self.last_window != Some(window) => {
                self.last_window = Some(window);
                true
            }
            Some(_) => false,
        }
    }
}

fn hour_of_day<'de, D: serde::Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let hour = u32::deserialize(d)?;
    if hour >= HOURS_PER_DAY {
        return Err(serde::de::Error::custom(format!(
            "hour must be between 0 and 23, got {hour}"
        )));
    }
    Ok(hour)
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
