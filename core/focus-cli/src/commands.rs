//! One-shot subcommands.

use focusflow_core::clock::to_millis;
use focusflow_core::{
    Clock, CompletionNotifier, ExpiryRequest, ExpiryScheduler, FocusConfig, FocusEngine,
    FocusError, LogNotifier, SessionStore, SystemClock, TimerController, TimerView,
};
use focusflow_protocol::TimerExpiredEvent;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::notifier::TerminalNotifier;
use crate::{host, output, Commands};

/// One-shot invocations exit long before any deadline. The next
/// invocation's cold-start reconciliation picks the expiry up instead.
struct DeferredScheduler;

impl ExpiryScheduler for DeferredScheduler {
    fn arm(&mut self, request: ExpiryRequest) -> focusflow_core::Result<()> {
        debug!(
            session_id = request.session_id,
            end_time = %request.end_time.to_rfc3339(),
            "Expiry deferred to the next reconciliation"
        );
        Ok(())
    }

    fn disarm(&mut self) {}
}

pub(crate) fn notifier_for(config: &FocusConfig) -> Box<dyn CompletionNotifier> {
    if config.notifications_enabled {
        Box::new(TerminalNotifier::new())
    } else {
        Box::new(LogNotifier)
    }
}

/// Opens the stores, records app use, and returns the engine.
pub(crate) fn open_engine(config: FocusConfig) -> Result<FocusEngine> {
    let engine = FocusEngine::open(config)?;
    if engine.record_app_use()? {
        info!("Welcome to FocusFlow");
    }
    Ok(engine)
}

/// Cold-start reconciliation, then closes any open rows the snapshot no
/// longer names. Failures leave the controller idle.
pub(crate) fn cold_start(
    engine: &FocusEngine,
    controller: &mut TimerController,
    clock: &dyn Clock,
) {
    if let Err(err) = controller.reconcile() {
        warn!(error = %err, "Cold start reconciliation failed; timer is idle");
        controller.reset_to_idle();
        return;
    }
    if let Err(err) = engine.sweep_orphans(clock.now()) {
        warn!(error = %err, "Failed to close orphaned sessions");
    }
}

pub(crate) fn dispatch(command: Commands, config: FocusConfig, json: bool) -> Result<()> {
    let engine = open_engine(config)?;

    if let Commands::Run {
        poll_lock,
        signal_flavor,
    } = command
    {
        return host::run(engine, poll_lock, signal_flavor.into(), json);
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut controller = engine.controller(
        Box::new(DeferredScheduler),
        notifier_for(engine.config()),
        Arc::clone(&clock),
    );
    cold_start(&engine, &mut controller, clock.as_ref());

    match command {
        Commands::Start { minutes } => {
            let minutes = minutes.unwrap_or(i64::from(engine.config().default_duration_minutes));
            let minutes = engine.config().validate_duration(minutes)?;
            let view = controller.start_session(i64::from(minutes))?;
            print_timer(&view, json)
        }
        Commands::Finish => print_timer(&controller.finish_session()?, json),
        Commands::Cancel => print_timer(&controller.cancel_current_session()?, json),
        Commands::Status => print_timer(&controller.view(), json),
        Commands::Unlock => print_timer(&controller.on_unlock(clock.now())?, json),
        Commands::Expire {
            session_id,
            duration,
        } => {
            let view = controller.on_background_expired(TimerExpiredEvent {
                session_id,
                duration_minutes: duration,
                timestamp: to_millis(clock.now()),
            })?;
            print_timer(&view, json)
        }
        Commands::Stats { days } => {
            let today = clock.now().date_naive();
            let db = engine.db();
            let today_stats = db.today_stats(today)?;
            let week = db.weekly_chart(today)?;
            let overall = db.overall_stats(today)?;
            let daily = days.map(|days| db.daily_stats(days, today)).transpose()?;
            if json {
                let mut report = serde_json::json!({
                    "today": today_stats,
                    "week": week,
                    "overall": overall,
                });
                if let Some(daily) = &daily {
                    report["daily"] = serde_json::to_value(daily)?;
                }
                print_json(&report)
            } else {
                let mut text = output::stats_report(&today_stats, &week, &overall);
                if let Some(daily) = &daily {
                    text.push_str("\n\n");
                    text.push_str(&output::daily_report(daily));
                }
                print_text(&text)
            }
        }
        Commands::History { recent, last } => {
            let today = clock.now().date_naive();
            if let Some(limit) = last {
                let sessions = engine.db().list_sessions(limit)?;
                return if json {
                    print_json(&sessions)
                } else {
                    print_text(&output::sessions_report(&sessions))
                };
            }
            match recent {
                Some(days) => {
                    let days = engine.db().recent_sessions(days, today)?;
                    if json {
                        print_json(&days)
                    } else {
                        print_text(&output::recent_report(&days))
                    }
                }
                None => {
                    let groups = engine.db().sessions_grouped_by_date(today)?;
                    if json {
                        print_json(&groups)
                    } else {
                        print_text(&output::history_report(&groups))
                    }
                }
            }
        }
        Commands::Delete { session_id } => {
            if controller.view().session_id == Some(session_id) {
                return Err(FocusError::SessionAlreadyActive { session_id }.into());
            }
            engine.db().delete(session_id)?;
            info!(session_id, "Session deleted from history");
            print_text(&format!("Deleted session {}", session_id))
        }
        Commands::Clear => {
            engine.clear_history()?;
            print_text("Session history cleared")
        }
        Commands::Run { .. } => Ok(()),
    }
}

fn print_timer(view: &TimerView, json: bool) -> Result<()> {
    if json {
        print_json(view)
    } else {
        print_text(&output::timer_line(view))
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn print_text(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text)?;
    Ok(())
}
