//! Human-readable renderings of timer and history data.

use focusflow_core::{format_duration, OverallStats, RecentDay, SessionGroup, TimerPhase, TimerView};
use focusflow_core::{ChartDay, DailyStats, Session, TodayStats};

pub fn clock_face(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

pub fn timer_line(view: &TimerView) -> String {
    let session = view.session_id.unwrap_or_default();
    match view.phase {
        TimerPhase::Idle => "Idle".to_string(),
        TimerPhase::Active => format!(
            "Running  session {}  {} left of {} min",
            session,
            clock_face(view.remaining_seconds),
            view.duration_minutes
        ),
        TimerPhase::Paused => format!(
            "Paused (device locked)  session {}  {} left of {} min",
            session,
            clock_face(view.remaining_seconds),
            view.duration_minutes
        ),
    }
}

pub fn stats_report(today: &TodayStats, week: &[ChartDay], overall: &OverallStats) -> String {
    let mut lines = vec![
        format!(
            "Today: {} in {} session(s)",
            format_duration(today.total_minutes),
            today.sessions_count
        ),
        String::new(),
        "Last 7 days:".to_string(),
    ];
    for day in week {
        lines.push(format!("  {}  {:>5.1} h", day.day, day.hours));
    }
    lines.push(String::new());
    lines.push(format!(
        "Overall: {} sessions, {} completed, {} focused",
        overall.total_sessions,
        overall.completed_sessions,
        format_duration(overall.total_minutes)
    ));
    lines.push(format!(
        "Average session: {}  Best day: {}  Streak: {} day(s)",
        format_duration(overall.avg_session_minutes),
        format_duration(overall.best_day_minutes),
        overall.current_streak
    ));
    lines.join("\n")
}

pub fn daily_report(days: &[DailyStats]) -> String {
    if days.is_empty() {
        return "No sessions in that window".to_string();
    }
    days.iter()
        .map(|day| {
            format!(
                "{}  {:>8}  {} session(s), {} completed",
                day.date,
                format_duration(day.total_minutes),
                day.sessions_count,
                day.completed_count
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn recent_report(days: &[RecentDay]) -> String {
    if days.is_empty() {
        return "No sessions yet".to_string();
    }
    days.iter()
        .map(|day| {
            format!(
                "{:<12} {:>3} session(s)  {:>8}{}",
                day.display_date,
                day.sessions,
                day.duration,
                if day.completed { "" } else { "  (some abandoned)" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn history_report(groups: &[SessionGroup]) -> String {
    if groups.is_empty() {
        return "No sessions yet".to_string();
    }
    let mut lines = Vec::new();
    for group in groups {
        lines.push(format!(
            "{}  ({})",
            group.display_date,
            format_duration(group.total_minutes)
        ));
        for session in &group.sessions {
            lines.push(format!("  {}", session_line(session, "%H:%M")));
        }
    }
    lines.join("\n")
}

/// Newest-first flat listing.
pub fn sessions_report(sessions: &[Session]) -> String {
    if sessions.is_empty() {
        return "No sessions yet".to_string();
    }
    sessions
        .iter()
        .map(|session| session_line(session, "%Y-%m-%d %H:%M"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn session_line(session: &Session, started_format: &str) -> String {
    let status = match (session.ended_at, session.completed) {
        (_, true) => "completed",
        (Some(_), false) => "cancelled",
        (None, false) => "running",
    };
    format!(
        "#{:<5} {}  {:>3} min  {}",
        session.id,
        session.started_at.format(started_format),
        session.duration_minutes,
        status
    )
}
