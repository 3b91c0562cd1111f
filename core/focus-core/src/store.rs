//! Session history contract.
//!
//! The store is plain CRUD over permanent session records. It does not
//! enforce the created → terminal lifecycle; the controller does.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// One focus interval, completed or abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: i64,
    pub duration_minutes: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A session is terminal once it has an end time, whether it was
    /// completed or cancelled.
    pub fn is_terminal(&self) -> bool {
        self.ended_at.is_some()
    }
}

pub trait SessionStore: Send {
    /// Inserts a new non-terminal session and returns its store-assigned id.
    fn create(&self, duration_minutes: u32, started_at: DateTime<Utc>) -> Result<i64>;

    /// Marks the session as run to expiry.
    fn complete(&self, session_id: i64, ended_at: DateTime<Utc>) -> Result<()>;

    /// Marks the session as abandoned; it is not credited.
    fn cancel(&self, session_id: i64, ended_at: DateTime<Utc>) -> Result<()>;

    fn delete(&self, session_id: i64) -> Result<()>;

    fn get(&self, session_id: i64) -> Result<Option<Session>>;
}
