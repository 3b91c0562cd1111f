//! Single-consumer event loop around the controller.
//!
//! Ticks, lock signals, background expiries, app transitions and user
//! commands all arrive on one channel and are handled one at a time, so the
//! controller never sees concurrent mutation.

use focusflow_protocol::{LockSignal, LockSignalKind, TimerExpiredEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::controller::{TimerController, TimerView};
use crate::error::Result;

pub type Reply = Sender<Result<TimerView>>;

pub enum ControllerEvent {
    Tick,
    Signal(LockSignal),
    Expired(TimerExpiredEvent),
    Foreground,
    Background,
    Start { minutes: i64, reply: Reply },
    Finish { reply: Reply },
    Cancel { reply: Reply },
    Status { reply: Sender<TimerView> },
    Shutdown,
}

/// Sends [`ControllerEvent::Tick`] at a fixed interval until stopped.
pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn start(events: Sender<ControllerEvent>, interval: StdDuration) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("focusflow-ticker".to_string())
            .spawn(move || loop {
                thread::sleep(interval);
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                if events.send(ControllerEvent::Tick).is_err() {
                    break;
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Safe to call any number of times.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

pub type ViewObserver = Box<dyn FnMut(&TimerView) + Send>;

pub struct EventLoop {
    controller: TimerController,
    clock: Arc<dyn Clock>,
    sender: Sender<ControllerEvent>,
    receiver: Receiver<ControllerEvent>,
    tick_interval: StdDuration,
    ticker: Option<Ticker>,
    observer: Option<ViewObserver>,
    last_view: Option<TimerView>,
}

impl EventLoop {
    pub fn new(controller: TimerController, clock: Arc<dyn Clock>, tick_interval: StdDuration) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self::with_channel(controller, clock, tick_interval, sender, receiver)
    }

    /// Uses an existing channel, for hosts whose collaborators (the expiry
    /// scheduler, signal listeners) need a sender before the loop exists.
    pub fn with_channel(
        controller: TimerController,
        clock: Arc<dyn Clock>,
        tick_interval: StdDuration,
        sender: Sender<ControllerEvent>,
        receiver: Receiver<ControllerEvent>,
    ) -> Self {
        Self {
            controller,
            clock,
            sender,
            receiver,
            tick_interval,
            ticker: None,
            observer: None,
            last_view: None,
        }
    }

    /// Called with the new view whenever an event changes it.
    pub fn with_observer(mut self, observer: ViewObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn sender(&self) -> Sender<ControllerEvent> {
        self.sender.clone()
    }

    pub fn controller(&self) -> &TimerController {
        &self.controller
    }

    pub fn is_ticker_running(&self) -> bool {
        self.ticker.as_ref().is_some_and(Ticker::is_running)
    }

    /// Processes events until [`ControllerEvent::Shutdown`] and hands the
    /// controller back.
    pub fn run(mut self) -> TimerController {
        info!("Focus event loop started");
        self.sync_ticker();
        self.publish();
        while let Ok(event) = self.receiver.recv() {
            if !self.handle(event) {
                break;
            }
        }
        self.stop_ticker();
        info!("Focus event loop stopped");
        self.controller
    }

    /// Handles one event. Returns false on shutdown.
    pub fn handle(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::Tick => {
                let result = self.controller.tick();
                self.absorb("tick", result);
            }
            ControllerEvent::Signal(signal) => {
                let at = signal.at().unwrap_or_else(|| self.clock.now());
                match signal.kind {
                    LockSignalKind::Locked => {
                        self.controller.on_lock(at);
                    }
                    LockSignalKind::Unlocked => {
                        let result = self.controller.on_unlock(at);
                        self.absorb("unlock", result);
                    }
                }
            }
            ControllerEvent::Expired(event) => {
                let result = self.controller.on_background_expired(event);
                self.absorb("background expiry", result);
            }
            ControllerEvent::Foreground => {
                let result = self.controller.on_app_foreground();
                self.absorb("foreground resume", result);
            }
            ControllerEvent::Background => {
                self.controller.on_app_background();
            }
            ControllerEvent::Start { minutes, reply } => {
                let result = self.controller.start_session(minutes);
                respond(reply, result);
            }
            ControllerEvent::Finish { reply } => {
                let result = self.controller.finish_session();
                respond(reply, result);
            }
            ControllerEvent::Cancel { reply } => {
                let result = self.controller.cancel_current_session();
                respond(reply, result);
            }
            ControllerEvent::Status { reply } => {
                let _ = reply.send(self.controller.view());
            }
            ControllerEvent::Shutdown => {
                debug!("Shutdown requested");
                return false;
            }
        }

        self.sync_ticker();
        self.publish();
        true
    }

    fn absorb(&mut self, what: &str, result: Result<TimerView>) {
        if let Err(err) = result {
            error!(error = %err, event = what, "Reconciliation failed; timer reset to idle");
            self.controller.reset_to_idle();
        }
    }

    fn sync_ticker(&mut self) {
        let wanted = self.controller.is_ticking();
        if wanted && !self.is_ticker_running() {
            match Ticker::start(self.sender.clone(), self.tick_interval) {
                Ok(ticker) => self.ticker = Some(ticker),
                Err(err) => warn!(error = %err, "Failed to start foreground ticker"),
            }
        } else if !wanted {
            self.stop_ticker();
        }
    }

    fn stop_ticker(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
    }

    fn publish(&mut self) {
        let view = self.controller.view();
        if self.last_view == Some(view) {
            return;
        }
        self.last_view = Some(view);
        if let Some(observer) = self.observer.as_mut() {
            observer(&view);
        }
    }
}

fn respond(reply: Reply, result: Result<TimerView>) {
    if let Err(err) = &result {
        warn!(error = %err, "Command failed");
    }
    let _ = reply.send(result);
}
