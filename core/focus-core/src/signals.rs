//! Device lock/unlock signals.
//!
//! Platform observers are unreliable in different ways, so this module turns
//! raw observations into discrete [`LockSignal`]s and fans them out to any
//! number of listeners. Consumers must not assume exactly-once or low-latency
//! delivery.
//!
//! ## Flavors
//!
//! - [`SignalFlavor::Keyguard`]: "locked" only fires when the screen is really
//!   locked; moving the app to the background while unlocked emits nothing.
//!   Broadcasts are corroborated by polling the lock state.
//! - [`SignalFlavor::AppActiveProxy`]: the app becoming active stands in for
//!   "unlocked" and resigning active stands in for "locked". Looser, but it is
//!   all some platforms offer.

use chrono::{DateTime, Utc};
use focusflow_protocol::{LockSignal, LockSignalKind};
use std::collections::HashMap;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{FocusError, Result};

pub type SignalHandler = Arc<dyn Fn(LockSignal) + Send + Sync>;

pub trait LockSignalSource {
    fn subscribe(&self, handler: SignalHandler) -> Result<Subscription>;
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    handlers: HashMap<u64, SignalHandler>,
}

/// In-process multi-listener signal source.
#[derive(Clone, Default)]
pub struct SignalHub {
    listeners: Arc<Mutex<Listeners>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `signal` to every current listener. Malformed signals are
    /// dropped.
    pub fn emit(&self, signal: LockSignal) {
        if let Err(err) = signal.validate() {
            warn!(code = %err.code, message = %err.message, "Dropping malformed lock signal");
            return;
        }

        let handlers: Vec<SignalHandler> = match self.listeners.lock() {
            Ok(listeners) => listeners.handlers.values().cloned().collect(),
            Err(_) => return,
        };
        debug!(
            channel = signal.kind.channel(),
            listeners = handlers.len(),
            "Emitting lock signal"
        );
        for handler in handlers {
            handler(signal);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .map(|listeners| listeners.handlers.len())
            .unwrap_or(0)
    }
}

impl LockSignalSource for SignalHub {
    fn subscribe(&self, handler: SignalHandler) -> Result<Subscription> {
        let mut listeners = self
            .listeners
            .lock()
            .map_err(|_| FocusError::SignalSourceUnavailable("listener table poisoned".into()))?;
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.handlers.insert(id, handler);
        Ok(Subscription {
            id,
            listeners: Some(Arc::downgrade(&self.listeners)),
        })
    }
}

/// Token returned by [`LockSignalSource::subscribe`]. The listener stays
/// registered until `unsubscribe` is called or the token is dropped.
pub struct Subscription {
    id: u64,
    listeners: Option<Weak<Mutex<Listeners>>>,
}

impl Subscription {
    pub fn unsubscribe(&mut self) {
        let Some(weak) = self.listeners.take() else {
            return;
        };
        if let Some(listeners) = weak.upgrade() {
            if let Ok(mut listeners) = listeners.lock() {
                listeners.handlers.remove(&self.id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalFlavor {
    Keyguard,
    AppActiveProxy,
}

/// Edge detector from lock-state observations to discrete signals.
#[derive(Debug, Clone)]
pub struct LockStateMonitor {
    flavor: SignalFlavor,
    last_known: Option<bool>,
}

impl LockStateMonitor {
    pub fn new(flavor: SignalFlavor) -> Self {
        Self {
            flavor,
            last_known: None,
        }
    }

    pub fn last_known(&self) -> Option<bool> {
        self.last_known
    }

    /// Records the state without emitting anything.
    pub fn set_baseline(&mut self, is_locked: bool) {
        self.last_known = Some(is_locked);
    }

    /// A polled or queried lock state; emits only on change.
    pub fn observe(&mut self, is_locked: bool, at: DateTime<Utc>) -> Option<LockSignal> {
        if self.last_known == Some(is_locked) {
            return None;
        }
        self.last_known = Some(is_locked);
        Some(signal_for(is_locked, at))
    }

    /// A direct platform broadcast (screen off, user present). Always emits.
    pub fn broadcast(&mut self, kind: LockSignalKind, at: DateTime<Utc>) -> LockSignal {
        self.last_known = Some(kind == LockSignalKind::Locked);
        LockSignal {
            kind,
            timestamp: at.timestamp_millis(),
        }
    }

    pub fn app_backgrounded(&mut self, is_locked: bool, at: DateTime<Utc>) -> Option<LockSignal> {
        match self.flavor {
            SignalFlavor::Keyguard => {
                if is_locked && self.last_known != Some(true) {
                    self.last_known = Some(true);
                    Some(signal_for(true, at))
                } else {
                    None
                }
            }
            SignalFlavor::AppActiveProxy => self.observe(true, at),
        }
    }

    pub fn app_foregrounded(&mut self, is_locked: bool, at: DateTime<Utc>) -> Option<LockSignal> {
        match self.flavor {
            SignalFlavor::Keyguard => self.observe(is_locked, at),
            SignalFlavor::AppActiveProxy => self.observe(false, at),
        }
    }
}

fn signal_for(is_locked: bool, at: DateTime<Utc>) -> LockSignal {
    if is_locked {
        LockSignal::locked(at)
    } else {
        LockSignal::unlocked(at)
    }
}

pub trait LockProbe: Send {
    fn is_locked(&self) -> Result<bool>;
}

/// Reads the desktop session's `LockedHint` through `loginctl`.
#[derive(Debug, Clone)]
pub struct LoginctlLockProbe {
    session: String,
}

impl LoginctlLockProbe {
    pub fn new(session: Option<String>) -> Self {
        let session = session
            .or_else(|| std::env::var("XDG_SESSION_ID").ok())
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "auto".to_string());
        Self { session }
    }
}

impl LockProbe for LoginctlLockProbe {
    fn is_locked(&self) -> Result<bool> {
        let output = Command::new("loginctl")
            .args(["show-session", &self.session, "-p", "LockedHint", "--value"])
            .output()
            .map_err(|err| FocusError::SignalSourceUnavailable(format!("loginctl: {}", err)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FocusError::SignalSourceUnavailable(format!(
                "loginctl exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_locked_hint(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_locked_hint(output: &str) -> Result<bool> {
    match output.trim() {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(FocusError::SignalSourceUnavailable(format!(
            "unexpected LockedHint value: {:?}",
            other
        ))),
    }
}

/// Polling fallback for when broadcasts are unreliable.
pub struct LockPoller {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LockPoller {
    /// Stops the polling thread. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LockPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reads the probe once to establish a baseline, then polls it every
/// `interval` and emits state changes through `hub`. A probe that cannot be
/// read at startup makes the source unavailable. Polled state is the real
/// lock state, so the poller always behaves as [`SignalFlavor::Keyguard`].
pub fn spawn_lock_poller(
    probe: Box<dyn LockProbe>,
    hub: SignalHub,
    clock: Arc<dyn Clock>,
    interval: StdDuration,
) -> Result<LockPoller> {
    let mut monitor = LockStateMonitor::new(SignalFlavor::Keyguard);
    monitor.set_baseline(probe.is_locked()?);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let handle = thread::Builder::new()
        .name("focusflow-lock-poller".to_string())
        .spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                thread::sleep(interval);
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                match probe.is_locked() {
                    Ok(is_locked) => {
                        if let Some(signal) = monitor.observe(is_locked, clock.now()) {
                            info!(channel = signal.kind.channel(), "Lock state change detected by poll");
                            hub.emit(signal);
                        }
                    }
                    Err(err) => warn!(error = %err, "Lock state poll failed"),
                }
            }
        })
        .map_err(|err| FocusError::SignalSourceUnavailable(err.to_string()))?;

    Ok(LockPoller {
        stop,
        handle: Some(handle),
    })
}
