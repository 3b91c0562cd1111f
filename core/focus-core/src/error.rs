//! Error types for focusflow-core operations.

use std::path::PathBuf;

/// All errors that can surface from the store, the snapshot, the platform
/// collaborators, or the controller's public operations.
#[derive(Debug, thiserror::Error)]
pub enum FocusError {
    // ─────────────────────────────────────────────────────────────────────
    // Persistence Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Database error: {context}: {source}")]
    Database {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Input Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid session duration: {minutes} minutes")]
    InvalidDuration { minutes: i64 },

    #[error("A session is already running: {session_id}")]
    SessionAlreadyActive { session_id: i64 },

    // ─────────────────────────────────────────────────────────────────────
    // Platform Collaborator Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Lock signal source unavailable: {0}")]
    SignalSourceUnavailable(String),

    #[error("Expiry scheduler unavailable: {0}")]
    SchedulerUnavailable(String),
}

impl FocusError {
    pub(crate) fn database(context: impl Into<String>, source: rusqlite::Error) -> Self {
        FocusError::Database {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FocusError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for failures of durable state (store or snapshot).
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            FocusError::Database { .. } | FocusError::Io { .. } | FocusError::Json { .. }
        )
    }
}

/// Convenience type alias for Results using FocusError.
pub type Result<T> = std::result::Result<T, FocusError>;

impl From<FocusError> for String {
    fn from(err: FocusError) -> String {
        err.to_string()
    }
}
