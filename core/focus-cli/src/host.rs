//! Foreground host: one event loop fed by stdin, the expiry scheduler, the
//! foreground ticker and (optionally) a lock-state poller.
//!
//! ## Protocol
//!
//! Input is one JSON event per line (see `focusflow_protocol::InboundEvent`):
//!
//! ```text
//! {"event":"start","minutes":25}
//! {"event":"device_lock","timestamp":1769774702000}
//! {"event":"device_unlock"}
//! {"event":"timer_completed","session_id":3,"duration_minutes":25}
//! {"event":"quit"}
//! ```
//!
//! Commands are answered with `{"ok":true,"timer":{...}}` or
//! `{"ok":false,"error":{"code":...,"message":...}}`. Timer changes are
//! published as `{"event":"timer","timer":{...}}` in JSON mode and as a
//! status line otherwise. End of input shuts the host down.

use chrono::{DateTime, Utc};
use focusflow_core::clock::{from_millis, to_millis};
use focusflow_core::{
    spawn_lock_poller, Clock, ControllerEvent, EventLoop, FocusConfig, FocusEngine, FocusError,
    LockSignalSource, LockStateMonitor, LoginctlLockProbe, SignalFlavor, SignalHub, SystemClock,
    ThreadExpiryScheduler, TimerView,
};
use focusflow_protocol::{
    parse_inbound, ErrorInfo, InboundEvent, LockSignal, LockSignalKind, TimerExpiredEvent,
};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use crate::commands::{cold_start, notifier_for};
use crate::error::{CliError, Result};
use crate::output;

const MIN_TICK_INTERVAL_MS: u64 = 10;

#[derive(Serialize)]
struct Reply<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timer: Option<&'a TimerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorInfo>,
}

#[derive(Serialize)]
struct TimerUpdate<'a> {
    event: &'static str,
    timer: &'a TimerView,
}

pub(crate) fn run(
    engine: FocusEngine,
    poll_lock: bool,
    flavor: SignalFlavor,
    json: bool,
) -> Result<()> {
    let config = engine.config().clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (events, receiver) = mpsc::channel::<ControllerEvent>();

    let expiry_events = Mutex::new(events.clone());
    let scheduler = ThreadExpiryScheduler::new(
        Arc::clone(&clock),
        Arc::new(move |event: TimerExpiredEvent| {
            if let Ok(events) = expiry_events.lock() {
                let _ = events.send(ControllerEvent::Expired(event));
            }
        }),
    );
    let mut controller = engine.controller(
        Box::new(scheduler),
        notifier_for(&config),
        Arc::clone(&clock),
    );
    cold_start(&engine, &mut controller, clock.as_ref());

    let hub = SignalHub::new();
    let signal_events = Mutex::new(events.clone());
    let _subscription = hub.subscribe(Arc::new(move |signal: LockSignal| {
        if let Ok(events) = signal_events.lock() {
            let _ = events.send(ControllerEvent::Signal(signal));
        }
    }))?;

    let _poller = if poll_lock {
        match spawn_lock_poller(
            Box::new(LoginctlLockProbe::new(None)),
            hub.clone(),
            Arc::clone(&clock),
            StdDuration::from_millis(config.lock_poll_interval_ms),
        ) {
            Ok(poller) => Some(poller),
            Err(err) => {
                warn!(error = %err, "Lock polling unavailable; relying on resume reconciliation");
                None
            }
        }
    } else {
        None
    };

    let tick_interval =
        StdDuration::from_millis(config.tick_interval_ms.max(MIN_TICK_INTERVAL_MS));
    let event_loop = EventLoop::with_channel(
        controller,
        Arc::clone(&clock),
        tick_interval,
        events.clone(),
        receiver,
    )
    .with_observer(Box::new(move |view: &TimerView| publish(view, json)));

    let inbound = Inbound::new(events, hub, flavor, config, clock);
    thread::Builder::new()
        .name("focusflow-stdin".to_string())
        .spawn(move || read_events(inbound))?;

    info!(poll_lock, ?flavor, "Foreground host started");
    event_loop.run();
    info!("Foreground host stopped");
    Ok(())
}

fn read_events(mut inbound: Inbound) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_inbound(&line) {
            Ok(event) => {
                if !inbound.forward(event) {
                    return;
                }
            }
            Err(info) => {
                warn!(code = %info.code, "Rejected input line");
                write_reply(&Reply {
                    ok: false,
                    timer: None,
                    error: Some(&info),
                });
            }
        }
    }
    let _ = inbound.events.send(ControllerEvent::Shutdown);
}

/// Routes stdin events to the loop. Lock signals and, depending on the
/// flavor, app transitions go through the monitor and the hub so every
/// listener sees the same edges.
struct Inbound {
    events: Sender<ControllerEvent>,
    hub: SignalHub,
    monitor: LockStateMonitor,
    config: FocusConfig,
    clock: Arc<dyn Clock>,
}

impl Inbound {
    fn new(
        events: Sender<ControllerEvent>,
        hub: SignalHub,
        flavor: SignalFlavor,
        config: FocusConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut monitor = LockStateMonitor::new(flavor);
        monitor.set_baseline(false);
        Self {
            events,
            hub,
            monitor,
            config,
            clock,
        }
    }

    /// Hands one inbound event to the loop. Returns false once the host
    /// should stop reading.
    fn forward(&mut self, event: InboundEvent) -> bool {
        let now = self.clock.now();
        match event {
            InboundEvent::DeviceLock { timestamp } => {
                let signal = self
                    .monitor
                    .broadcast(LockSignalKind::Locked, signal_time(timestamp, now));
                self.hub.emit(signal);
                true
            }
            InboundEvent::DeviceUnlock { timestamp } => {
                let signal = self
                    .monitor
                    .broadcast(LockSignalKind::Unlocked, signal_time(timestamp, now));
                self.hub.emit(signal);
                true
            }
            InboundEvent::TimerCompleted {
                session_id,
                duration_minutes,
                timestamp,
            } => self
                .events
                .send(ControllerEvent::Expired(TimerExpiredEvent {
                    session_id,
                    duration_minutes,
                    timestamp: timestamp.unwrap_or_else(|| to_millis(now)),
                }))
                .is_ok(),
            InboundEvent::AppForeground => {
                let locked = self.monitor.last_known() == Some(true);
                if let Some(signal) = self.monitor.app_foregrounded(locked, now) {
                    debug!(channel = signal.kind.channel(), "App activation stands in for unlock");
                    self.hub.emit(signal);
                }
                self.events.send(ControllerEvent::Foreground).is_ok()
            }
            InboundEvent::AppBackground => {
                if self.events.send(ControllerEvent::Background).is_err() {
                    return false;
                }
                let locked = self.monitor.last_known() == Some(true);
                if let Some(signal) = self.monitor.app_backgrounded(locked, now) {
                    debug!(channel = signal.kind.channel(), "App deactivation stands in for lock");
                    self.hub.emit(signal);
                }
                true
            }
            InboundEvent::Start { minutes } => match self.config.validate_duration(minutes) {
                Ok(minutes) => request(&self.events, |reply| ControllerEvent::Start {
                    minutes: i64::from(minutes),
                    reply,
                }),
                Err(err) => {
                    write_error(&err);
                    true
                }
            },
            InboundEvent::Finish => request(&self.events, |reply| ControllerEvent::Finish { reply }),
            InboundEvent::Cancel => request(&self.events, |reply| ControllerEvent::Cancel { reply }),
            InboundEvent::Status => {
                let (reply, replies) = mpsc::channel();
                if self.events.send(ControllerEvent::Status { reply }).is_err() {
                    return false;
                }
                match replies.recv() {
                    Ok(view) => {
                        write_reply(&Reply {
                            ok: true,
                            timer: Some(&view),
                            error: None,
                        });
                        true
                    }
                    Err(_) => false,
                }
            }
            InboundEvent::Quit => {
                let _ = self.events.send(ControllerEvent::Shutdown);
                false
            }
        }
    }
}

fn request(
    events: &Sender<ControllerEvent>,
    build: impl FnOnce(focusflow_core::runtime::Reply) -> ControllerEvent,
) -> bool {
    let (reply, replies) = mpsc::channel();
    if events.send(build(reply)).is_err() {
        return false;
    }
    match replies.recv().map_err(|_| CliError::HostGone) {
        Ok(Ok(view)) => write_reply(&Reply {
            ok: true,
            timer: Some(&view),
            error: None,
        }),
        Ok(Err(err)) => write_error(&err),
        Err(err) => {
            warn!(error = %err, "Command dropped");
            return false;
        }
    }
    true
}

/// Signal payload time, or receipt time when the payload has none.
fn signal_time(timestamp: Option<i64>, now: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.and_then(from_millis).unwrap_or(now)
}

fn error_code(err: &FocusError) -> &'static str {
    match err {
        FocusError::InvalidDuration { .. } => "invalid_duration",
        FocusError::SessionAlreadyActive { .. } => "session_active",
        err if err.is_persistence() => "persistence_failure",
        _ => "internal_error",
    }
}

fn publish(view: &TimerView, json: bool) {
    if json {
        write_json(&TimerUpdate {
            event: "timer",
            timer: view,
        });
    } else {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", output::timer_line(view));
    }
}

fn write_reply(reply: &Reply<'_>) {
    write_json(reply);
}

fn write_error(err: &FocusError) {
    let info = ErrorInfo::new(error_code(err), err.to_string());
    write_reply(&Reply {
        ok: false,
        timer: None,
        error: Some(&info),
    });
}

fn write_json<T: Serialize>(value: &T) {
    let mut stdout = std::io::stdout().lock();
    if serde_json::to_writer(&mut stdout, value).is_ok() {
        let _ = writeln!(stdout);
        let _ = stdout.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focusflow_core::{ManualClock, Subscription};
    use std::sync::mpsc::Receiver;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-30T09:00:00Z")
            .expect("parse")
            .with_timezone(&Utc)
    }

    /// An `Inbound` whose hub forwards signals into the same channel the
    /// loop would read, plus the receiving end of that channel.
    fn inbound(flavor: SignalFlavor) -> (Inbound, Receiver<ControllerEvent>, Subscription) {
        let hub = SignalHub::new();
        let (events, received) = mpsc::channel();
        let forwarded = Mutex::new(events.clone());
        let subscription = hub
            .subscribe(Arc::new(move |signal: LockSignal| {
                if let Ok(events) = forwarded.lock() {
                    let _ = events.send(ControllerEvent::Signal(signal));
                }
            }))
            .expect("subscribe");
        let inbound = Inbound::new(
            events,
            hub,
            flavor,
            FocusConfig::default(),
            Arc::new(ManualClock::new(now())),
        );
        (inbound, received, subscription)
    }

    fn signal_kinds(received: &Receiver<ControllerEvent>) -> Vec<Option<LockSignalKind>> {
        received
            .try_iter()
            .map(|event| match event {
                ControllerEvent::Signal(signal) => Some(signal.kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn signal_time_defaults_to_receipt_time() {
        assert_eq!(signal_time(None, now()), now());
        assert_eq!(
            signal_time(Some(1_769_774_000_000), now()).timestamp_millis(),
            1_769_774_000_000
        );
    }

    #[test]
    fn error_codes_follow_error_kind() {
        assert_eq!(
            error_code(&FocusError::InvalidDuration { minutes: 0 }),
            "invalid_duration"
        );
        assert_eq!(
            error_code(&FocusError::SessionAlreadyActive { session_id: 2 }),
            "session_active"
        );
        assert_eq!(
            error_code(&FocusError::SchedulerUnavailable("gone".into())),
            "internal_error"
        );
    }

    #[test]
    fn lock_events_go_through_the_hub() {
        let (mut inbound, received, _subscription) = inbound(SignalFlavor::Keyguard);

        assert!(inbound.forward(InboundEvent::DeviceLock { timestamp: None }));
        assert!(matches!(
            received.try_recv(),
            Ok(ControllerEvent::Signal(LockSignal {
                kind: LockSignalKind::Locked,
                ..
            }))
        ));

        assert!(!inbound.forward(InboundEvent::Quit));
        assert!(matches!(received.try_recv(), Ok(ControllerEvent::Shutdown)));
    }

    #[test]
    fn keyguard_app_transitions_emit_no_signals() {
        let (mut inbound, received, _subscription) = inbound(SignalFlavor::Keyguard);

        assert!(inbound.forward(InboundEvent::AppBackground));
        assert!(inbound.forward(InboundEvent::AppForeground));

        assert_eq!(signal_kinds(&received), vec![None, None]);
    }

    #[test]
    fn app_active_proxy_turns_transitions_into_signals() {
        let (mut inbound, received, _subscription) = inbound(SignalFlavor::AppActiveProxy);

        assert!(inbound.forward(InboundEvent::AppBackground));
        assert!(inbound.forward(InboundEvent::AppForeground));

        assert_eq!(
            signal_kinds(&received),
            vec![
                None,
                Some(LockSignalKind::Locked),
                Some(LockSignalKind::Unlocked),
                None,
            ]
        );
    }

    #[test]
    fn start_outside_picker_bounds_never_reaches_the_loop() {
        let (mut inbound, received, _subscription) = inbound(SignalFlavor::Keyguard);

        assert!(inbound.forward(InboundEvent::Start { minutes: 1 }));
        assert!(inbound.forward(InboundEvent::Start { minutes: 500 }));

        assert!(received.try_recv().is_err());
    }
}
