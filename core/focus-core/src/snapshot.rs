//! Single-slot persistence of the currently running timer.
//!
//! The snapshot is transient run-state: it exists exactly while a session is
//! in flight and is what lets the controller pick up again after the process
//! is killed. Permanent history lives in the session store.
//!
//! # File Format
//!
//! ```json
//! { "sessionId": 12, "endTime": 1769776200000, "durationMinutes": 25, "startedAt": 1769774700000 }
//! ```
//!
//! Times are epoch milliseconds. Writes go to a temp file that is renamed over
//! the slot, so a reader never sees a half-written record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{FocusError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub session_id: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end_time: DateTime<Utc>,
    pub duration_minutes: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
}

impl TimerSnapshot {
    pub fn new(session_id: i64, duration_minutes: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            end_time: started_at + Duration::minutes(i64::from(duration_minutes)),
            duration_minutes,
            started_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// Whole seconds left, floored, never negative.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        remaining_seconds(self.end_time, now)
    }
}

pub fn remaining_seconds(end_time: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (end_time - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis / 1000) as u64
    }
}

pub trait SnapshotStore: Send {
    /// Replaces whatever is in the slot.
    fn write(&self, snapshot: &TimerSnapshot) -> Result<()>;

    fn read(&self) -> Result<Option<TimerSnapshot>>;

    /// Empties the slot. Clearing an empty slot is not an error.
    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn write(&self, snapshot: &TimerSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| FocusError::io("Failed to create snapshot dir", err))?;
        }

        let payload = serde_json::to_vec(snapshot).map_err(|err| FocusError::Json {
            context: "Failed to serialize timer snapshot".to_string(),
            source: err,
        })?;
        let tmp_path = self.path.with_extension("tmp");
        fs_err::write(&tmp_path, payload)
            .map_err(|err| FocusError::io("Failed to write timer snapshot", err))?;
        fs_err::rename(&tmp_path, &self.path)
            .map_err(|err| FocusError::io("Failed to commit timer snapshot", err))?;
        Ok(())
    }

    fn read(&self) -> Result<Option<TimerSnapshot>> {
        let data = match fs_err::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(FocusError::io("Failed to read timer snapshot", err)),
        };

        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }

        match serde_json::from_slice::<TimerSnapshot>(&data) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) => {
                warn!(
                    error = %err,
                    path = %self.path.display(),
                    "Unreadable timer snapshot; treating timer as idle"
                );
                Ok(None)
            }
        }
    }

    fn clear(&self) -> Result<()> {
        match fs_err::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(FocusError::io("Failed to clear timer snapshot", err)),
        }
    }
}
