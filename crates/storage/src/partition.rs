//! Calendar-month partition identity.

use chrono::{DateTime, Datelike, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

/// One calendar month of events, e.g. `2023_11`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Partition {
    pub year: i32,
    pub month: u32,
}

impl Partition {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// The partition containing `time`.
    pub fn containing(time: DateTime<Utc>) -> Self {
        Self::new(time.year(), time.month())
    }

    /// Database file for this partition inside `dir`.
    pub fn file_in(&self, dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(format!("eventdb{self}.db"))
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.year, self.month)
    }
}
