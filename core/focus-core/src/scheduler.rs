//! Background expiry scheduling.
//!
//! Given an absolute deadline, a scheduler promises a best-effort
//! [`TimerExpiredEvent`] at or after it. At most one schedule is outstanding:
//! arming replaces the previous one. Delivery may be dropped entirely (the
//! process can exit before the deadline), which is why the controller also
//! reconciles on resume.

use chrono::{DateTime, Utc};
use focusflow_protocol::TimerExpiredEvent;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{FocusError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryRequest {
    pub session_id: i64,
    pub duration_minutes: u32,
    pub end_time: DateTime<Utc>,
}

pub trait ExpiryScheduler: Send {
    /// Replaces any prior schedule.
    fn arm(&mut self, request: ExpiryRequest) -> Result<()>;

    /// Drops the outstanding schedule, if any. Safe to call repeatedly.
    fn disarm(&mut self);
}

pub type ExpirySink = Arc<dyn Fn(TimerExpiredEvent) + Send + Sync>;

struct PendingExpiry {
    request: ExpiryRequest,
    // Dropping the sender wakes the worker and cancels delivery.
    _cancel: mpsc::Sender<()>,
}

/// In-process scheduler: one parked worker thread per armed deadline.
pub struct ThreadExpiryScheduler {
    clock: Arc<dyn Clock>,
    sink: ExpirySink,
    pending: Option<PendingExpiry>,
}

impl ThreadExpiryScheduler {
    pub fn new(clock: Arc<dyn Clock>, sink: ExpirySink) -> Self {
        Self {
            clock,
            sink,
            pending: None,
        }
    }

    pub fn armed(&self) -> Option<ExpiryRequest> {
        self.pending.as_ref().map(|pending| pending.request)
    }
}

impl ExpiryScheduler for ThreadExpiryScheduler {
    fn arm(&mut self, request: ExpiryRequest) -> Result<()> {
        self.disarm();

        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let clock = Arc::clone(&self.clock);
        let sink = Arc::clone(&self.sink);

        thread::Builder::new()
            .name("focusflow-expiry".to_string())
            .spawn(move || wait_for_deadline(request, clock, sink, cancel_rx))
            .map_err(|err| FocusError::SchedulerUnavailable(err.to_string()))?;

        info!(
            session_id = request.session_id,
            end_time = %request.end_time.to_rfc3339(),
            "Background expiry armed"
        );
        self.pending = Some(PendingExpiry {
            request,
            _cancel: cancel_tx,
        });
        Ok(())
    }

    fn disarm(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(
                session_id = pending.request.session_id,
                "Background expiry disarmed"
            );
        }
    }
}

fn wait_for_deadline(
    request: ExpiryRequest,
    clock: Arc<dyn Clock>,
    sink: ExpirySink,
    cancel: mpsc::Receiver<()>,
) {
    loop {
        let now = clock.now();
        if now >= request.end_time {
            sink(TimerExpiredEvent {
                session_id: request.session_id,
                duration_minutes: request.duration_minutes,
                timestamp: now.timestamp_millis(),
            });
            return;
        }

        let wait = (request.end_time - now)
            .to_std()
            .unwrap_or(StdDuration::ZERO);
        match cancel.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
