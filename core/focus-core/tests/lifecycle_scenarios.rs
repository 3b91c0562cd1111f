use chrono::{DateTime, Duration, Utc};
use focusflow_core::{
    Clock, Completion, CompletionNotifier, ControllerEvent, EventLoop, ExpiryRequest,
    ExpiryScheduler, FocusConfig, FocusEngine, ManualClock, SessionStore, SnapshotStore,
    ThreadExpiryScheduler, TimerPhase,
};
use focusflow_protocol::TimerExpiredEvent;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

fn at(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("parse timestamp")
        .with_timezone(&Utc)
}

fn engine_in(dir: &tempfile::TempDir) -> FocusEngine {
    FocusEngine::open(FocusConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..FocusConfig::default()
    })
    .expect("open engine")
}

#[derive(Clone, Default)]
struct Notifications(Arc<Mutex<Vec<Completion>>>);

impl Notifications {
    fn all(&self) -> Vec<Completion> {
        self.0.lock().expect("notifications").clone()
    }
}

impl CompletionNotifier for Notifications {
    fn notify(&mut self, completion: &Completion) {
        self.0.lock().expect("notifications").push(*completion);
    }
}

#[derive(Clone, Default)]
struct Armed(Arc<Mutex<Option<ExpiryRequest>>>);

impl ExpiryScheduler for Armed {
    fn arm(&mut self, request: ExpiryRequest) -> focusflow_core::Result<()> {
        *self.0.lock().expect("armed") = Some(request);
        Ok(())
    }

    fn disarm(&mut self) {
        *self.0.lock().expect("armed") = None;
    }
}

#[test]
fn uninterrupted_session_completes_once_and_restarts() {
    let dir = tempfile::tempdir().expect("temp dir");
    let engine = engine_in(&dir);
    let clock = ManualClock::new(at("2026-01-30T09:00:00Z"));
    let notifications = Notifications::default();
    let mut controller = engine.controller(
        Box::new(Armed::default()),
        Box::new(notifications.clone()),
        Arc::new(clock.clone()),
    );

    controller.start_session(25).expect("start");
    clock.advance(Duration::minutes(25));
    let view = controller.tick().expect("tick");

    let fired = notifications.all();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].duration_minutes, 25);

    let original = engine.db().get(1).expect("get").expect("session 1");
    assert!(original.completed);
    assert_eq!(view.session_id, Some(2));
    assert_eq!(view.duration_minutes, 25);
    assert_eq!(view.remaining_seconds, 1500);
}

#[test]
fn lock_then_unlock_forfeits_without_notifying() {
    let dir = tempfile::tempdir().expect("temp dir");
    let engine = engine_in(&dir);
    let clock = ManualClock::new(at("2026-01-30T09:00:00Z"));
    let notifications = Notifications::default();
    let mut controller = engine.controller(
        Box::new(Armed::default()),
        Box::new(notifications.clone()),
        Arc::new(clock.clone()),
    );

    controller.start_session(10).expect("start");
    let end_before = engine.snapshots().read().expect("read").map(|s| s.end_time);

    clock.advance(Duration::seconds(2));
    controller.on_lock(clock.now());
    assert_eq!(
        engine.snapshots().read().expect("read").map(|s| s.end_time),
        end_before
    );

    clock.advance(Duration::seconds(5));
    let unlocked_at = clock.now();
    controller.on_unlock(unlocked_at).expect("unlock");

    let original = engine.db().get(1).expect("get").expect("session 1");
    assert!(!original.completed);
    assert_eq!(original.ended_at, Some(unlocked_at));

    let next = engine.db().get(2).expect("get").expect("session 2");
    assert_eq!(next.duration_minutes, 10);
    assert_eq!(next.started_at, unlocked_at);
    assert_eq!(
        engine.snapshots().read().expect("read").map(|s| s.end_time),
        Some(unlocked_at + Duration::minutes(10))
    );
    assert!(notifications.all().is_empty());
}

#[test]
fn cold_start_recovers_from_process_death() {
    let dir = tempfile::tempdir().expect("temp dir");
    let clock = ManualClock::new(at("2026-01-30T09:00:00Z"));
    {
        let engine = engine_in(&dir);
        let mut controller = engine.controller(
            Box::new(Armed::default()),
            Box::new(Notifications::default()),
            Arc::new(clock.clone()),
        );
        controller.start_session(25).expect("start");
    }

    clock.set(at("2026-01-30T10:00:00Z"));
    let engine = engine_in(&dir);
    let notifications = Notifications::default();
    let mut controller = engine.controller(
        Box::new(Armed::default()),
        Box::new(notifications.clone()),
        Arc::new(clock.clone()),
    );
    let view = controller.reconcile().expect("cold start");

    assert!(engine.db().get(1).expect("get").expect("session 1").completed);
    assert_eq!(notifications.all().len(), 1);
    assert_eq!(view.phase, TimerPhase::Active);
    assert_eq!(view.session_id, Some(2));
    assert_eq!(view.remaining_seconds, 1500);
}

#[test]
fn racing_expiry_paths_complete_once() {
    let dir = tempfile::tempdir().expect("temp dir");
    let engine = engine_in(&dir);
    let clock = ManualClock::new(at("2026-01-30T09:00:00Z"));
    let notifications = Notifications::default();
    let mut controller = engine.controller(
        Box::new(Armed::default()),
        Box::new(notifications.clone()),
        Arc::new(clock.clone()),
    );

    controller.start_session(25).expect("start");
    clock.set(at("2026-01-30T09:25:03Z"));
    let expired = TimerExpiredEvent {
        session_id: 1,
        duration_minutes: 25,
        timestamp: clock.now().timestamp_millis(),
    };

    controller.on_background_expired(expired).expect("background");
    controller.on_background_expired(expired).expect("duplicate");
    controller.on_app_foreground().expect("resume");
    controller.tick().expect("tick");

    let sessions = engine.db().list_sessions(10).expect("list");
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions.iter().filter(|s| s.completed).count(), 1);
    assert_eq!(notifications.all().len(), 1);
}

#[test]
fn cancel_and_finish_leave_no_snapshot() {
    let dir = tempfile::tempdir().expect("temp dir");
    let engine = engine_in(&dir);
    let clock = ManualClock::new(at("2026-01-30T09:00:00Z"));
    let mut controller = engine.controller(
        Box::new(Armed::default()),
        Box::new(Notifications::default()),
        Arc::new(clock.clone()),
    );

    controller.start_session(15).expect("start");
    controller.cancel_current_session().expect("cancel");
    assert!(engine.snapshots().read().expect("read").is_none());
    assert_eq!(controller.view().phase, TimerPhase::Idle);

    controller.start_session(15).expect("start");
    clock.advance(Duration::minutes(7));
    controller.finish_session().expect("finish");
    assert!(engine.snapshots().read().expect("read").is_none());
    assert_eq!(controller.view().phase, TimerPhase::Idle);

    let today = engine
        .db()
        .today_stats(at("2026-01-30T12:00:00Z").date_naive())
        .expect("today stats");
    assert_eq!(today.sessions_count, 1);
    assert_eq!(today.total_minutes, 15);
}

#[test]
fn event_loop_rotates_expired_session_through_ticks() {
    let dir = tempfile::tempdir().expect("temp dir");
    let engine = engine_in(&dir);
    let clock = ManualClock::new(at("2026-01-30T09:00:00Z"));
    let (notified_tx, notified_rx) = mpsc::channel();

    struct ChannelNotifier(mpsc::Sender<Completion>);
    impl CompletionNotifier for ChannelNotifier {
        fn notify(&mut self, completion: &Completion) {
            let _ = self.0.send(*completion);
        }
    }

    let shared_clock: Arc<ManualClock> = Arc::new(clock.clone());
    let (expired_tx, expired_rx) = mpsc::channel::<TimerExpiredEvent>();
    let expired_tx = Mutex::new(expired_tx);
    let scheduler = ThreadExpiryScheduler::new(
        shared_clock.clone(),
        Arc::new(move |event: TimerExpiredEvent| {
            if let Ok(tx) = expired_tx.lock() {
                let _ = tx.send(event);
            }
        }),
    );
    let controller = engine.controller(
        Box::new(scheduler),
        Box::new(ChannelNotifier(notified_tx)),
        shared_clock.clone(),
    );
    let event_loop = EventLoop::new(controller, shared_clock, StdDuration::from_millis(10));
    let events = event_loop.sender();
    let handle = std::thread::spawn(move || event_loop.run());

    let (reply, replies) = mpsc::channel();
    events
        .send(ControllerEvent::Start { minutes: 5, reply })
        .expect("send start");
    replies.recv().expect("reply").expect("started");

    clock.advance(Duration::minutes(5));
    let completion = notified_rx
        .recv_timeout(StdDuration::from_secs(10))
        .expect("completion delivered by tick");
    assert_eq!(completion.session_id, 1);
    assert_eq!(completion.duration_minutes, 5);

    // A late background delivery for the rotated session is ignored.
    events
        .send(ControllerEvent::Expired(TimerExpiredEvent {
            session_id: 1,
            duration_minutes: 5,
            timestamp: clock.now().timestamp_millis(),
        }))
        .expect("send stale expiry");
    events.send(ControllerEvent::Shutdown).expect("send shutdown");
    let controller = handle.join().expect("loop thread");

    assert_eq!(controller.view().session_id, Some(2));
    assert_eq!(controller.view().phase, TimerPhase::Active);
    assert!(notified_rx.try_recv().is_err());
    assert!(expired_rx.try_recv().is_err());
}
