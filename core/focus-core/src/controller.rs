//! Timer lifecycle controller.
//!
//! The single owner of "is a session running and how much time is left".
//! Everything else (the session store, the snapshot slot, the expiry
//! scheduler, the lock signal source, the notification sink) is a
//! collaborator that the controller drives or listens to.
//!
//! ## States
//!
//! ```text
//!            start                 finish / cancel
//!   Idle ───────────▶ Active ─────────────────────▶ Idle
//!                      │  ▲ ╲
//!                 lock │  │  ╲ expiry: complete, notify, restart
//!                      ▼  │  ╱
//!                     Paused   unlock: forfeit, restart
//! ```
//!
//! Expiry is detected redundantly (foreground tick, background callback,
//! resume reconciliation). Each path carries the session id it believes is
//! current, and only the first one to find that id still in the snapshot
//! rotates the session. The others observe the new id and do nothing, so an
//! interval is completed and announced exactly once.
//!
//! Durable writes follow one order: make the old session terminal in the
//! store, then rewrite or clear the snapshot, then arm or disarm the
//! scheduler.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{FocusError, Result};
use crate::notify::{Completion, CompletionNotifier};
use crate::scheduler::{ExpiryRequest, ExpiryScheduler};
use crate::snapshot::{remaining_seconds, SnapshotStore, TimerSnapshot};
use crate::store::SessionStore;
use focusflow_protocol::TimerExpiredEvent;

pub const DEFAULT_DURATION_MINUTES: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Idle,
    Active,
    /// Device locked: the session is still in flight but not ticking.
    Paused,
}

/// Which path noticed that the end time had passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirySource {
    Tick,
    Background,
    Resume,
}

impl ExpirySource {
    fn as_str(&self) -> &'static str {
        match self {
            ExpirySource::Tick => "tick",
            ExpirySource::Background => "background",
            ExpirySource::Resume => "resume",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerView {
    pub running: bool,
    pub session_id: Option<i64>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    pub remaining_seconds: u64,
    pub phase: TimerPhase,
}

#[derive(Debug, Clone, Copy)]
struct TimerState {
    running: bool,
    session_id: Option<i64>,
    end_time: Option<DateTime<Utc>>,
    duration_minutes: u32,
    remaining_seconds: u64,
}

impl TimerState {
    fn idle(duration_minutes: u32) -> Self {
        Self {
            running: false,
            session_id: None,
            end_time: None,
            duration_minutes,
            remaining_seconds: 0,
        }
    }
}

pub struct TimerController {
    store: Box<dyn SessionStore>,
    snapshots: Box<dyn SnapshotStore>,
    scheduler: Box<dyn ExpiryScheduler>,
    notifier: Box<dyn CompletionNotifier>,
    clock: Arc<dyn Clock>,
    state: TimerState,
    locked: bool,
    foreground: bool,
}

impl TimerController {
    pub fn new(
        store: Box<dyn SessionStore>,
        snapshots: Box<dyn SnapshotStore>,
        scheduler: Box<dyn ExpiryScheduler>,
        notifier: Box<dyn CompletionNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            snapshots,
            scheduler,
            notifier,
            clock,
            state: TimerState::idle(DEFAULT_DURATION_MINUTES),
            locked: false,
            foreground: true,
        }
    }

    pub fn view(&self) -> TimerView {
        let phase = if !self.state.running {
            TimerPhase::Idle
        } else if self.locked {
            TimerPhase::Paused
        } else {
            TimerPhase::Active
        };
        TimerView {
            running: self.state.running,
            session_id: self.state.session_id,
            end_time: self.state.end_time,
            duration_minutes: self.state.duration_minutes,
            remaining_seconds: self.state.remaining_seconds,
            phase,
        }
    }

    /// Whether the host should be delivering foreground ticks.
    pub fn is_ticking(&self) -> bool {
        self.state.running && !self.locked && self.foreground
    }

    // ─────────────────────────────────────────────────────────────────────
    // User commands
    // ─────────────────────────────────────────────────────────────────────

    pub fn start_session(&mut self, minutes: i64) -> Result<TimerView> {
        let duration = u32::try_from(minutes)
            .ok()
            .filter(|minutes| *minutes > 0)
            .ok_or(FocusError::InvalidDuration { minutes })?;
        if let (true, Some(session_id)) = (self.state.running, self.state.session_id) {
            return Err(FocusError::SessionAlreadyActive { session_id });
        }

        let now = self.clock.now();
        let snapshot = self.begin_session(duration, now)?;
        self.arm(&snapshot);
        self.adopt(&snapshot, now);
        self.locked = false;

        info!(
            session_id = snapshot.session_id,
            duration_minutes = duration,
            end_time = %snapshot.end_time.to_rfc3339(),
            "Focus session started"
        );
        Ok(self.view())
    }

    /// Ends the running session and credits it. No-op when idle.
    pub fn finish_session(&mut self) -> Result<TimerView> {
        let Some(session_id) = self.state.session_id else {
            debug!("Finish requested with no running session");
            return Ok(self.view());
        };

        self.store.complete(session_id, self.clock.now())?;
        self.snapshots.clear()?;
        self.scheduler.disarm();
        self.go_idle();

        info!(session_id, "Focus session finished");
        Ok(self.view())
    }

    /// Abandons the running session without crediting it. No-op when idle.
    pub fn cancel_current_session(&mut self) -> Result<TimerView> {
        let Some(session_id) = self.state.session_id else {
            debug!("Cancel requested with no running session");
            return Ok(self.view());
        };

        self.store.cancel(session_id, self.clock.now())?;
        self.snapshots.clear()?;
        self.scheduler.disarm();
        self.go_idle();

        info!(session_id, "Focus session cancelled");
        Ok(self.view())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Timing events
    // ─────────────────────────────────────────────────────────────────────

    /// Foreground display refresh. Rotates the session once the end time
    /// has passed.
    pub fn tick(&mut self) -> Result<TimerView> {
        if !self.is_ticking() {
            return Ok(self.view());
        }
        let (Some(session_id), Some(end_time)) = (self.state.session_id, self.state.end_time)
        else {
            return Ok(self.view());
        };

        let now = self.clock.now();
        if now >= end_time {
            self.handle_expiry(ExpirySource::Tick, session_id, now)?;
        } else {
            self.state.remaining_seconds = remaining_seconds(end_time, now);
        }
        Ok(self.view())
    }

    /// Delivery from the background scheduler. Stale or duplicate events
    /// are ignored.
    pub fn on_background_expired(&mut self, event: TimerExpiredEvent) -> Result<TimerView> {
        let now = self.clock.now();
        debug!(
            session_id = event.session_id,
            duration_minutes = event.duration_minutes,
            "Background expiry received"
        );
        self.handle_expiry(ExpirySource::Background, event.session_id, now)?;
        Ok(self.view())
    }

    /// App came back to the foreground.
    pub fn on_app_foreground(&mut self) -> Result<TimerView> {
        self.foreground = true;
        self.locked = false;
        self.reconcile()
    }

    /// App left the foreground. The session is untouched; whether the
    /// device locked is for the signal source to say.
    pub fn on_app_background(&mut self) -> TimerView {
        self.foreground = false;
        debug!("App moved to background");
        self.view()
    }

    /// Rebuilds the in-memory state from the snapshot. Run at cold start and
    /// on every foreground resume.
    pub fn reconcile(&mut self) -> Result<TimerView> {
        let Some(snapshot) = self.snapshots.read()? else {
            if self.state.running {
                self.scheduler.disarm();
            }
            self.go_idle();
            return Ok(self.view());
        };

        let now = self.clock.now();
        if snapshot.is_expired(now) {
            self.handle_expiry(ExpirySource::Resume, snapshot.session_id, now)?;
            return Ok(self.view());
        }

        let finalized = self
            .store
            .get(snapshot.session_id)?
            .is_some_and(|session| session.is_terminal());
        if finalized {
            warn!(
                session_id = snapshot.session_id,
                "Snapshot points at a finalized session; clearing it"
            );
            self.snapshots.clear()?;
            self.scheduler.disarm();
            self.go_idle();
            return Ok(self.view());
        }

        self.arm(&snapshot);
        self.adopt(&snapshot, now);
        debug!(
            session_id = snapshot.session_id,
            remaining_seconds = self.state.remaining_seconds,
            "Resumed running session"
        );
        Ok(self.view())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Device lock signals
    // ─────────────────────────────────────────────────────────────────────

    /// Soft pause. Ticking stops; the session, the snapshot and the armed
    /// schedule are left as they are.
    pub fn on_lock(&mut self, at: DateTime<Utc>) -> TimerView {
        self.locked = true;
        if let Some(session_id) = self.state.session_id {
            info!(
                session_id,
                locked_at = %at.to_rfc3339(),
                "Device locked; countdown paused"
            );
        }
        self.view()
    }

    /// Unlocking forfeits the in-flight session and starts a fresh one of
    /// the same length from the unlock instant. A session whose end time had
    /// already passed is credited instead. Signal timestamps ahead of the
    /// clock are treated as now.
    pub fn on_unlock(&mut self, at: DateTime<Utc>) -> Result<TimerView> {
        let at = at.min(self.clock.now());
        self.locked = false;
        if !self.state.running {
            return Ok(self.view());
        }

        let Some(snapshot) = self.snapshots.read()? else {
            self.scheduler.disarm();
            self.go_idle();
            return Ok(self.view());
        };

        if at < snapshot.started_at {
            debug!(
                session_id = snapshot.session_id,
                unlocked_at = %at.to_rfc3339(),
                "Ignoring unlock that predates the running session"
            );
            return Ok(self.view());
        }

        if snapshot.is_expired(at) {
            self.handle_expiry(ExpirySource::Resume, snapshot.session_id, at)?;
            return Ok(self.view());
        }

        self.store.cancel(snapshot.session_id, at)?;
        let next = self.begin_session(snapshot.duration_minutes, at)?;
        self.arm(&next);
        self.adopt(&next, self.clock.now());

        info!(
            forfeited_session_id = snapshot.session_id,
            session_id = next.session_id,
            duration_minutes = next.duration_minutes,
            "Device unlocked; session forfeited and restarted"
        );
        Ok(self.view())
    }

    /// Drops the in-memory state after a reconciliation failure. Durable
    /// state is left for the next reconcile.
    pub fn reset_to_idle(&mut self) {
        self.scheduler.disarm();
        self.go_idle();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    /// Completes the session named by `expected`, notifies once the
    /// completion is stored, and starts the next one. Returns false when `expected` is no longer the snapshot's
    /// session or has not reached its end time yet.
    fn handle_expiry(
        &mut self,
        source: ExpirySource,
        expected: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(snapshot) = self.snapshots.read()? else {
            debug!(
                source = source.as_str(),
                session_id = expected,
                "Expiry for a session that is no longer running"
            );
            if self.state.session_id == Some(expected) {
                self.scheduler.disarm();
                self.go_idle();
            }
            return Ok(false);
        };

        if snapshot.session_id != expected {
            debug!(
                source = source.as_str(),
                session_id = expected,
                current_session_id = snapshot.session_id,
                "Ignoring stale expiry"
            );
            return Ok(false);
        }

        if !snapshot.is_expired(now) {
            debug!(
                source = source.as_str(),
                session_id = expected,
                "Expiry arrived before the end time"
            );
            return Ok(false);
        }

        let credit = match self.store.get(snapshot.session_id)? {
            Some(session) if session.is_terminal() => {
                debug!(
                    session_id = snapshot.session_id,
                    "Session already finalized; restarting without notifying"
                );
                false
            }
            Some(_) => {
                self.store.complete(snapshot.session_id, now)?;
                self.notifier.notify(&Completion {
                    session_id: snapshot.session_id,
                    duration_minutes: snapshot.duration_minutes,
                    completed_at: now,
                });
                true
            }
            None => {
                warn!(
                    session_id = snapshot.session_id,
                    "Expired session is missing from the store"
                );
                false
            }
        };

        let next = self.begin_session(snapshot.duration_minutes, now)?;
        self.arm(&next);
        self.adopt(&next, self.clock.now());

        info!(
            source = source.as_str(),
            completed_session_id = snapshot.session_id,
            credited = credit,
            session_id = next.session_id,
            duration_minutes = next.duration_minutes,
            "Focus session expired; next session started"
        );
        Ok(true)
    }

    /// Creates the session row and persists the snapshot for it. If the
    /// snapshot cannot be written the new row is cancelled again.
    fn begin_session(&mut self, duration: u32, at: DateTime<Utc>) -> Result<TimerSnapshot> {
        let session_id = self.store.create(duration, at)?;
        let snapshot = TimerSnapshot::new(session_id, duration, at);

        if let Err(err) = self.snapshots.write(&snapshot) {
            if let Err(cancel_err) = self.store.cancel(session_id, at) {
                warn!(
                    session_id,
                    error = %cancel_err,
                    "Failed to cancel session after snapshot write failure"
                );
            }
            self.scheduler.disarm();
            self.go_idle();
            return Err(err);
        }
        Ok(snapshot)
    }

    fn arm(&mut self, snapshot: &TimerSnapshot) {
        let request = ExpiryRequest {
            session_id: snapshot.session_id,
            duration_minutes: snapshot.duration_minutes,
            end_time: snapshot.end_time,
        };
        if let Err(err) = self.scheduler.arm(request) {
            warn!(
                session_id = snapshot.session_id,
                error = %err,
                "Background expiry could not be armed; relying on resume"
            );
        }
    }

    fn adopt(&mut self, snapshot: &TimerSnapshot, now: DateTime<Utc>) {
        self.state = TimerState {
            running: true,
            session_id: Some(snapshot.session_id),
            end_time: Some(snapshot.end_time),
            duration_minutes: snapshot.duration_minutes,
            remaining_seconds: snapshot.remaining_seconds(now),
        };
    }

    fn go_idle(&mut self) {
        self.state = TimerState::idle(self.state.duration_minutes);
    }
}
