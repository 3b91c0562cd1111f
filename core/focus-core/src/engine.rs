//! FocusEngine - wires the durable stores to a controller.
//!
//! Hosts (the CLI, a foreground runner, tests) build one engine per data
//! directory and ask it for a controller with their own scheduler, notifier
//! and clock.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::FocusConfig;
use crate::controller::TimerController;
use crate::db::Db;
use crate::error::{FocusError, Result};
use crate::notify::CompletionNotifier;
use crate::scheduler::ExpiryScheduler;
use crate::snapshot::{FileSnapshotStore, SnapshotStore};
use crate::store::SessionStore;

pub struct FocusEngine {
    config: FocusConfig,
    db: Db,
    snapshots: FileSnapshotStore,
}

impl FocusEngine {
    /// Opens (creating if needed) the session database and snapshot slot
    /// under the configured data directory.
    pub fn open(config: FocusConfig) -> Result<Self> {
        let db = Db::new(config.db_path()?)?;
        let snapshots = FileSnapshotStore::new(config.snapshot_path()?);
        Ok(Self {
            config,
            db,
            snapshots,
        })
    }

    pub fn config(&self) -> &FocusConfig {
        &self.config
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn snapshots(&self) -> &FileSnapshotStore {
        &self.snapshots
    }

    /// Checks and sets the app-usage marker. Returns true on first use.
    pub fn record_app_use(&self) -> Result<bool> {
        if self.db.has_used_app()? {
            return Ok(false);
        }
        self.db.mark_app_used()?;
        info!(db = %self.db.path().display(), "First use of this data directory");
        Ok(true)
    }

    /// Cancels open session rows left behind by an interrupted start or
    /// rotation. The session named by the snapshot is kept. Returns how many
    /// rows were closed.
    pub fn sweep_orphans(&self, now: DateTime<Utc>) -> Result<usize> {
        let running = self.snapshots.read()?.map(|snapshot| snapshot.session_id);
        let mut swept = 0;
        for session in self.db.active_sessions()? {
            if Some(session.id) == running {
                continue;
            }
            self.db.cancel(session.id, now)?;
            swept += 1;
        }
        if swept > 0 {
            warn!(swept, "Cancelled orphaned open sessions");
        }
        Ok(swept)
    }

    /// Deletes every stored session. Refused while a session is running.
    pub fn clear_history(&self) -> Result<()> {
        if let Some(snapshot) = self.snapshots.read()? {
            return Err(FocusError::SessionAlreadyActive {
                session_id: snapshot.session_id,
            });
        }
        self.db.clear_sessions()?;
        info!("Session history cleared");
        Ok(())
    }

    pub fn controller(
        &self,
        scheduler: Box<dyn ExpiryScheduler>,
        notifier: Box<dyn CompletionNotifier>,
        clock: Arc<dyn Clock>,
    ) -> TimerController {
        TimerController::new(
            Box::new(self.db.clone()),
            Box::new(self.snapshots.clone()),
            scheduler,
            notifier,
            clock,
        )
    }
}
