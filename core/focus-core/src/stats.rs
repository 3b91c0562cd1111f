//! Read-side aggregates over the session history.
//!
//! All grouping uses the UTC calendar date of `started_at`. Only completed
//! sessions count toward focus time, except where a query says otherwise.

use chrono::{Datelike, Duration, NaiveDate};
use rusqlite::params;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::db::{session_from_row, Db, SESSION_COLUMNS};
use crate::error::{FocusError, Result};
use crate::store::Session;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TodayStats {
    pub total_minutes: u32,
    pub sessions_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    /// Minutes across every session started that day, completed or not.
    pub total_minutes: u32,
    pub sessions_count: u32,
    pub completed_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartDay {
    pub day: String,
    pub hours: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverallStats {
    pub total_sessions: u32,
    pub total_minutes: u32,
    pub avg_session_minutes: u32,
    pub current_streak: u32,
    pub best_day_minutes: u32,
    pub completed_sessions: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentDay {
    pub date: NaiveDate,
    pub display_date: String,
    pub sessions: u32,
    pub duration: String,
    /// True when every session that day ran to completion.
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionGroup {
    pub date: NaiveDate,
    pub display_date: String,
    pub total_minutes: u32,
    pub sessions: Vec<Session>,
}

impl Db {
    pub fn today_stats(&self, today: NaiveDate) -> Result<TodayStats> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(duration_minutes), 0), COUNT(*) \
                 FROM sessions \
                 WHERE substr(started_at, 1, 10) = ?1 AND completed = 1",
                params![date_key(today)],
                |row| {
                    Ok(TodayStats {
                        total_minutes: row.get(0)?,
                        sessions_count: row.get(1)?,
                    })
                },
            )
            .map_err(|err| FocusError::database("Failed to query today stats", err))
        })
    }

    /// Per-day totals for the last `days` calendar days (today included),
    /// newest first. Days without sessions are omitted.
    pub fn daily_stats(&self, days: u32, today: NaiveDate) -> Result<Vec<DailyStats>> {
        let since = today - Duration::days(i64::from(days.max(1)) - 1);
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT substr(started_at, 1, 10) AS day, \
                            COALESCE(SUM(duration_minutes), 0), \
                            COUNT(*), \
                            SUM(CASE WHEN completed = 1 THEN 1 ELSE 0 END) \
                     FROM sessions \
                     WHERE substr(started_at, 1, 10) >= ?1 \
                     GROUP BY day \
                     ORDER BY day DESC",
                )
                .map_err(|err| FocusError::database("Failed to prepare daily stats", err))?;
            let rows = stmt
                .query_map(params![date_key(since)], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u32>(3)?,
                    ))
                })
                .map_err(|err| FocusError::database("Failed to query daily stats", err))?;

            let mut stats = Vec::new();
            for row in rows {
                let (day, total_minutes, sessions_count, completed_count) =
                    row.map_err(|err| FocusError::database("Failed to decode daily row", err))?;
                let Some(date) = parse_date_key(&day) else {
                    continue;
                };
                stats.push(DailyStats {
                    date,
                    total_minutes,
                    sessions_count,
                    completed_count,
                });
            }
            Ok(stats)
        })
    }

    /// Seven entries, oldest first, ending today; missing days are zero.
    pub fn weekly_chart(&self, today: NaiveDate) -> Result<Vec<ChartDay>> {
        let since = today - Duration::days(6);
        let minutes_by_day = self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT substr(started_at, 1, 10) AS day, COALESCE(SUM(duration_minutes), 0) \
                     FROM sessions \
                     WHERE substr(started_at, 1, 10) >= ?1 AND completed = 1 \
                     GROUP BY day",
                )
                .map_err(|err| FocusError::database("Failed to prepare weekly chart", err))?;
            let rows = stmt
                .query_map(params![date_key(since)], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
                })
                .map_err(|err| FocusError::database("Failed to query weekly chart", err))?;

            let mut map = HashMap::new();
            for row in rows {
                let (day, minutes) =
                    row.map_err(|err| FocusError::database("Failed to decode chart row", err))?;
                map.insert(day, minutes);
            }
            Ok(map)
        })?;

        Ok((0..7)
            .rev()
            .map(|offset| {
                let date = today - Duration::days(offset);
                let minutes = minutes_by_day.get(&date_key(date)).copied().unwrap_or(0);
                ChartDay {
                    day: DAY_NAMES[date.weekday().num_days_from_sunday() as usize].to_string(),
                    hours: minutes_to_hours(minutes),
                    date,
                }
            })
            .collect())
    }

    pub fn current_streak(&self, today: NaiveDate) -> Result<u32> {
        let dates = self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT substr(started_at, 1, 10) AS day \
                     FROM sessions WHERE completed = 1 ORDER BY day DESC",
                )
                .map_err(|err| FocusError::database("Failed to prepare streak query", err))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|err| FocusError::database("Failed to query streak days", err))?;

            let mut dates = Vec::new();
            for row in rows {
                let day =
                    row.map_err(|err| FocusError::database("Failed to decode streak row", err))?;
                if let Some(date) = parse_date_key(&day) {
                    dates.push(date);
                }
            }
            Ok(dates)
        })?;

        Ok(compute_streak(&dates, today))
    }

    pub fn overall_stats(&self, today: NaiveDate) -> Result<OverallStats> {
        let (total_sessions, total_minutes, completed_sessions, best_day_minutes) = self
            .with_connection(|conn| {
                let totals = conn
                    .query_row(
                        "SELECT COUNT(*), \
                                COALESCE(SUM(duration_minutes), 0), \
                                COALESCE(SUM(CASE WHEN completed = 1 THEN 1 ELSE 0 END), 0) \
                         FROM sessions",
                        [],
                        |row| {
                            Ok((
                                row.get::<_, u32>(0)?,
                                row.get::<_, u32>(1)?,
                                row.get::<_, u32>(2)?,
                            ))
                        },
                    )
                    .map_err(|err| FocusError::database("Failed to query totals", err))?;
                let best_day = conn
                    .query_row(
                        "SELECT COALESCE(MAX(daily_total), 0) FROM ( \
                            SELECT SUM(duration_minutes) AS daily_total \
                            FROM sessions WHERE completed = 1 \
                            GROUP BY substr(started_at, 1, 10))",
                        [],
                        |row| row.get::<_, u32>(0),
                    )
                    .map_err(|err| FocusError::database("Failed to query best day", err))?;
                Ok((totals.0, totals.1, totals.2, best_day))
            })?;

        let avg_session_minutes = if completed_sessions > 0 {
            (f64::from(total_minutes) / f64::from(completed_sessions)).round() as u32
        } else {
            0
        };

        Ok(OverallStats {
            total_sessions,
            total_minutes,
            avg_session_minutes,
            current_streak: self.current_streak(today)?,
            best_day_minutes,
            completed_sessions,
        })
    }

    pub fn recent_sessions(&self, limit: usize, today: NaiveDate) -> Result<Vec<RecentDay>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT substr(started_at, 1, 10) AS day, \
                            COUNT(*), \
                            COALESCE(SUM(duration_minutes), 0), \
                            MIN(completed) \
                     FROM sessions \
                     GROUP BY day \
                     ORDER BY day DESC \
                     LIMIT ?1",
                )
                .map_err(|err| FocusError::database("Failed to prepare recent query", err))?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                })
                .map_err(|err| FocusError::database("Failed to query recent sessions", err))?;

            let mut days = Vec::new();
            for row in rows {
                let (day, sessions, minutes, completed) =
                    row.map_err(|err| FocusError::database("Failed to decode recent row", err))?;
                let Some(date) = parse_date_key(&day) else {
                    continue;
                };
                days.push(RecentDay {
                    date,
                    display_date: display_date(date, today, "%b %-d"),
                    sessions,
                    duration: format_duration(minutes),
                    completed,
                });
            }
            Ok(days)
        })
    }

    /// Every session, newest first, grouped per day. `total_minutes` counts
    /// completed sessions only.
    pub fn sessions_grouped_by_date(&self, today: NaiveDate) -> Result<Vec<SessionGroup>> {
        let sessions = self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM sessions ORDER BY started_at DESC, id DESC",
                SESSION_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|err| FocusError::database("Failed to prepare history query", err))?;
            let rows = stmt
                .query_map([], session_from_row)
                .map_err(|err| FocusError::database("Failed to query history", err))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(
                    row.map_err(|err| FocusError::database("Failed to decode session row", err))?,
                );
            }
            Ok(sessions)
        })?;

        Ok(group_by_date(sessions, today))
    }
}

pub fn group_by_date(sessions: Vec<Session>, today: NaiveDate) -> Vec<SessionGroup> {
    let mut groups: Vec<SessionGroup> = Vec::new();
    for session in sessions {
        let date = session.started_at.date_naive();
        let needs_group = groups.last().map(|group| group.date != date).unwrap_or(true);
        if needs_group {
            groups.push(SessionGroup {
                date,
                display_date: display_date(date, today, "%a, %b %-d"),
                total_minutes: 0,
                sessions: Vec::new(),
            });
        }
        if let Some(group) = groups.last_mut() {
            if session.completed {
                group.total_minutes += session.duration_minutes;
            }
            group.sessions.push(session);
        }
    }
    groups
}

/// Consecutive days with a completed session, ending today, or ending
/// yesterday when nothing has been completed yet today.
pub fn compute_streak(dates: &[NaiveDate], today: NaiveDate) -> u32 {
    let days: HashSet<NaiveDate> = dates.iter().copied().collect();
    let mut cursor = if days.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };

    let mut streak = 0;
    while days.contains(&cursor) {
        streak += 1;
        cursor -= Duration::days(1);
    }
    streak
}

pub fn format_duration(minutes: u32) -> String {
    if minutes < 60 {
        return format!("{}m", minutes);
    }
    let hours = minutes / 60;
    let mins = minutes % 60;
    if mins > 0 {
        format!("{}h {}m", hours, mins)
    } else {
        format!("{}h", hours)
    }
}

fn minutes_to_hours(minutes: u32) -> f64 {
    (f64::from(minutes) / 60.0 * 10.0).round() / 10.0
}

fn display_date(date: NaiveDate, today: NaiveDate, pattern: &str) -> String {
    if date == today {
        "Today".to_string()
    } else if date == today - Duration::days(1) {
        "Yesterday".to_string()
    } else {
        date.format(pattern).to_string()
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date_key(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionStore;
    use chrono::{DateTime, Utc};

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("parse timestamp")
            .with_timezone(&Utc)
    }

    fn day(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("parse date")
    }

    fn seeded_db() -> (tempfile::TempDir, Db) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = Db::new(temp_dir.path().join("focusflow.db")).expect("db init");

        // 2026-01-30 (today): 25 completed, 45 completed, 10 cancelled
        let a = db.create(25, at("2026-01-30T08:00:00Z")).expect("create");
        db.complete(a, at("2026-01-30T08:25:00Z")).expect("complete");
        let b = db.create(45, at("2026-01-30T09:00:00Z")).expect("create");
        db.complete(b, at("2026-01-30T09:45:00Z")).expect("complete");
        let c = db.create(10, at("2026-01-30T11:00:00Z")).expect("create");
        db.cancel(c, at("2026-01-30T11:02:00Z")).expect("cancel");

        // 2026-01-29: 60 completed
        let d = db.create(60, at("2026-01-29T14:00:00Z")).expect("create");
        db.complete(d, at("2026-01-29T15:00:00Z")).expect("complete");

        // 2026-01-27: 30 completed (gap on the 28th)
        let e = db.create(30, at("2026-01-27T10:00:00Z")).expect("create");
        db.complete(e, at("2026-01-27T10:30:00Z")).expect("complete");

        (temp_dir, db)
    }

    #[test]
    fn today_counts_completed_sessions_only() {
        let (_temp_dir, db) = seeded_db();
        let stats = db.today_stats(day("2026-01-30")).expect("today");
        assert_eq!(
            stats,
            TodayStats {
                total_minutes: 70,
                sessions_count: 2
            }
        );
    }

    #[test]
    fn daily_stats_cover_requested_window() {
        let (_temp_dir, db) = seeded_db();
        let stats = db.daily_stats(2, day("2026-01-30")).expect("daily");
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].date, day("2026-01-30"));
        assert_eq!(stats[0].total_minutes, 80);
        assert_eq!(stats[0].sessions_count, 3);
        assert_eq!(stats[0].completed_count, 2);
        assert_eq!(stats[1].date, day("2026-01-29"));
    }

    #[test]
    fn weekly_chart_has_seven_zero_filled_days() {
        let (_temp_dir, db) = seeded_db();
        let chart = db.weekly_chart(day("2026-01-30")).expect("chart");

        assert_eq!(chart.len(), 7);
        assert_eq!(chart[0].date, day("2026-01-24"));
        assert_eq!(chart[6].date, day("2026-01-30"));
        assert_eq!(chart[6].day, "Fri");
        assert!((chart[6].hours - 1.2).abs() < f64::EPSILON);
        assert!((chart[5].hours - 1.0).abs() < f64::EPSILON);
        assert_eq!(chart[4].hours, 0.0);
    }

    #[test]
    fn overall_stats_aggregate_history() {
        let (_temp_dir, db) = seeded_db();
        let stats = db.overall_stats(day("2026-01-30")).expect("overall");

        assert_eq!(stats.total_sessions, 5);
        assert_eq!(stats.total_minutes, 170);
        assert_eq!(stats.completed_sessions, 4);
        assert_eq!(stats.avg_session_minutes, 43);
        assert_eq!(stats.best_day_minutes, 70);
        assert_eq!(stats.current_streak, 2);
    }

    #[test]
    fn recent_sessions_label_today_and_yesterday() {
        let (_temp_dir, db) = seeded_db();
        let recent = db.recent_sessions(5, day("2026-01-30")).expect("recent");

        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].display_date, "Today");
        assert_eq!(recent[0].sessions, 3);
        assert_eq!(recent[0].duration, "1h 20m");
        assert!(!recent[0].completed);
        assert_eq!(recent[1].display_date, "Yesterday");
        assert!(recent[1].completed);
        assert_eq!(recent[2].display_date, "Jan 27");
    }

    #[test]
    fn grouped_history_credits_completed_minutes() {
        let (_temp_dir, db) = seeded_db();
        let groups = db
            .sessions_grouped_by_date(day("2026-01-30"))
            .expect("grouped");

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].display_date, "Today");
        assert_eq!(groups[0].sessions.len(), 3);
        assert_eq!(groups[0].total_minutes, 70);
        assert_eq!(groups[2].display_date, "Tue, Jan 27");
    }

    #[test]
    fn streak_counts_back_from_today() {
        let dates = vec![day("2026-01-30"), day("2026-01-29"), day("2026-01-28")];
        assert_eq!(compute_streak(&dates, day("2026-01-30")), 3);
    }

    #[test]
    fn streak_survives_until_today_is_done() {
        let dates = vec![day("2026-01-29"), day("2026-01-28")];
        assert_eq!(compute_streak(&dates, day("2026-01-30")), 2);
    }

    #[test]
    fn streak_breaks_on_gap() {
        let dates = vec![day("2026-01-28"), day("2026-01-27")];
        assert_eq!(compute_streak(&dates, day("2026-01-30")), 0);
        assert_eq!(compute_streak(&[], day("2026-01-30")), 0);
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(0), "0m");
        assert_eq!(format_duration(45), "45m");
        assert_eq!(format_duration(60), "1h");
        assert_eq!(format_duration(95), "1h 35m");
    }
}
