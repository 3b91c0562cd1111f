//! # focusflow-core
//!
//! Session timer lifecycle for FocusFlow: a countdown that auto-restarts on
//! expiry and is forfeited when the device is unlocked mid-session.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Hosts drive the controller from one
//!   event loop ([`runtime::EventLoop`]); helper threads only post events.
//! - **Snapshot is the truth for run-state**: the in-memory timer is rebuilt
//!   from the persisted snapshot at cold start and on every resume.
//! - **Exactly one completion per interval**: every expiry path is guarded by
//!   the session id it was raised for.
//! - **Collaborators behind traits**: store, snapshot, scheduler, notifier,
//!   lock signals and the clock can all be swapped in tests.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use focusflow_core::{FocusEngine, LogNotifier, SystemClock, ThreadExpiryScheduler};
//!
//! let engine = FocusEngine::open(load_config(None)?)?;
//! let mut controller = engine.controller(scheduler, Box::new(LogNotifier), clock);
//! controller.reconcile()?;
//! controller.start_session(25)?;
//! ```

pub mod clock;
pub mod config;
pub mod controller;
pub mod db;
pub mod engine;
pub mod error;
pub mod notify;
pub mod runtime;
pub mod scheduler;
pub mod signals;
pub mod snapshot;
pub mod stats;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, FocusConfig};
pub use controller::{ExpirySource, TimerController, TimerPhase, TimerView};
pub use db::Db;
pub use engine::FocusEngine;
pub use error::{FocusError, Result};
pub use notify::{completion_notice, Completion, CompletionNotifier, LogNotifier};
pub use runtime::{ControllerEvent, EventLoop, Ticker};
pub use scheduler::{ExpiryRequest, ExpiryScheduler, ThreadExpiryScheduler};
pub use signals::{
    spawn_lock_poller, LockPoller, LockProbe, LockSignalSource, LockStateMonitor,
    LoginctlLockProbe, SignalFlavor, SignalHub, Subscription,
};
pub use snapshot::{FileSnapshotStore, SnapshotStore, TimerSnapshot};
pub use stats::*;
pub use store::{Session, SessionStore};
