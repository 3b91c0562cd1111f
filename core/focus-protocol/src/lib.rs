//! Event and payload contracts for the FocusFlow timer.
//!
//! This crate is shared by the controller library and its hosts so the shapes
//! of lock/unlock signals, background-expiry events and completion notices
//! cannot drift. The controller remains the authority on what an event means;
//! this crate only decides whether a payload is well-formed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Channel names used by the platform lock observer.
pub const LOCK_CHANNEL: &str = "onDeviceLock";
pub const UNLOCK_CHANNEL: &str = "onDeviceUnlock";

/// Alternating wait/vibrate durations in milliseconds, starting with a wait.
pub const VIBRATION_PATTERN_MS: [u64; 6] = [0, 1000, 500, 1000, 500, 1000];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LockSignalKind {
    Locked,
    Unlocked,
}

impl LockSignalKind {
    pub fn channel(&self) -> &'static str {
        match self {
            LockSignalKind::Locked => LOCK_CHANNEL,
            LockSignalKind::Unlocked => UNLOCK_CHANNEL,
        }
    }
}

/// A discrete lock or unlock observation from the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LockSignal {
    pub kind: LockSignalKind,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl LockSignal {
    pub fn locked(at: DateTime<Utc>) -> Self {
        Self {
            kind: LockSignalKind::Locked,
            timestamp: at.timestamp_millis(),
        }
    }

    pub fn unlocked(at: DateTime<Utc>) -> Self {
        Self {
            kind: LockSignalKind::Unlocked,
            timestamp: at.timestamp_millis(),
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_timestamp(self.timestamp)
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// Delivered by the background scheduler once per arm, at or after the
/// deadline it was armed for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimerExpiredEvent {
    pub session_id: i64,
    pub duration_minutes: u32,
    /// Epoch milliseconds at delivery.
    pub timestamp: i64,
}

impl TimerExpiredEvent {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.session_id <= 0 {
            return Err(ErrorInfo::new(
                "invalid_session_id",
                "session_id must be positive",
            ));
        }
        if self.duration_minutes == 0 {
            return Err(ErrorInfo::new(
                "invalid_duration",
                "duration_minutes must be positive",
            ));
        }
        require_timestamp(self.timestamp)
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// Title and body of a completion alert. Wording is cosmetic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionNotice {
    pub title: String,
    pub body: String,
}

/// One line of input accepted by a controller host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    DeviceLock {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    DeviceUnlock {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    TimerCompleted {
        session_id: i64,
        duration_minutes: u32,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    AppForeground,
    AppBackground,
    Start {
        minutes: i64,
    },
    Finish,
    Cancel,
    Status,
    Quit,
}

impl InboundEvent {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self {
            InboundEvent::DeviceLock { timestamp } | InboundEvent::DeviceUnlock { timestamp } => {
                require_optional_timestamp(*timestamp)
            }
            InboundEvent::TimerCompleted {
                session_id,
                duration_minutes,
                timestamp,
            } => {
                require_optional_timestamp(*timestamp)?;
                TimerExpiredEvent {
                    session_id: *session_id,
                    duration_minutes: *duration_minutes,
                    timestamp: timestamp.unwrap_or(1),
                }
                .validate()
            }
            InboundEvent::Start { minutes } => {
                if *minutes <= 0 {
                    Err(ErrorInfo::new(
                        "invalid_duration",
                        "minutes must be a positive integer",
                    ))
                } else {
                    Ok(())
                }
            }
            InboundEvent::AppForeground
            | InboundEvent::AppBackground
            | InboundEvent::Finish
            | InboundEvent::Cancel
            | InboundEvent::Status
            | InboundEvent::Quit => Ok(()),
        }
    }
}

pub fn parse_inbound(line: &str) -> Result<InboundEvent, ErrorInfo> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ErrorInfo::new(
            "line_too_large",
            "input line exceeded maximum size",
        ));
    }
    if line.trim().is_empty() {
        return Err(ErrorInfo::new("empty_line", "input line was empty"));
    }

    let event: InboundEvent = serde_json::from_str(line.trim()).map_err(|err| {
        ErrorInfo::new(
            "invalid_event",
            format!("input line is not a valid event: {}", err),
        )
    })?;
    event.validate()?;
    Ok(event)
}

fn require_timestamp(timestamp: i64) -> Result<(), ErrorInfo> {
    if timestamp <= 0 || DateTime::from_timestamp_millis(timestamp).is_none() {
        return Err(ErrorInfo::new(
            "invalid_timestamp",
            "timestamp must be positive epoch milliseconds",
        ));
    }
    Ok(())
}

fn require_optional_timestamp(timestamp: Option<i64>) -> Result<(), ErrorInfo> {
    match timestamp {
        Some(value) => require_timestamp(value),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lock_with_timestamp() {
        let event = parse_inbound(r#"{"event":"device_lock","timestamp":1769774400000}"#)
            .expect("parse lock");
        assert_eq!(
            event,
            InboundEvent::DeviceLock {
                timestamp: Some(1_769_774_400_000)
            }
        );
    }

    #[test]
    fn parses_unit_events() {
        assert_eq!(
            parse_inbound(r#"{"event":"app_foreground"}"#).expect("parse"),
            InboundEvent::AppForeground
        );
        assert_eq!(
            parse_inbound(r#"{"event":"quit"}"#).expect("parse"),
            InboundEvent::Quit
        );
    }

    #[test]
    fn rejects_empty_line() {
        let err = parse_inbound("   ").expect_err("empty");
        assert_eq!(err.code, "empty_line");
    }

    #[test]
    fn rejects_unknown_event() {
        let err = parse_inbound(r#"{"event":"reboot"}"#).expect_err("unknown");
        assert_eq!(err.code, "invalid_event");
    }

    #[test]
    fn rejects_non_positive_start() {
        let err = parse_inbound(r#"{"event":"start","minutes":0}"#).expect_err("zero");
        assert_eq!(err.code, "invalid_duration");
    }

    #[test]
    fn rejects_timer_completed_without_session() {
        let err = parse_inbound(
            r#"{"event":"timer_completed","session_id":0,"duration_minutes":25}"#,
        )
        .expect_err("bad session");
        assert_eq!(err.code, "invalid_session_id");
    }

    #[test]
    fn rejects_negative_signal_timestamp() {
        let signal = LockSignal {
            kind: LockSignalKind::Unlocked,
            timestamp: -5,
        };
        assert!(signal.validate().is_err());
    }

    #[test]
    fn expired_event_uses_camel_case_on_the_wire() {
        let event = TimerExpiredEvent {
            session_id: 7,
            duration_minutes: 25,
            timestamp: 1_769_774_400_000,
        };
        let value = serde_json::to_value(event).expect("serialize");
        assert_eq!(value["sessionId"], 7);
        assert_eq!(value["durationMinutes"], 25);
    }

    #[test]
    fn rejects_oversized_line() {
        let line = format!(r#"{{"event":"status","pad":"{}"}}"#, "x".repeat(MAX_LINE_BYTES));
        let err = parse_inbound(&line).expect_err("too large");
        assert_eq!(err.code, "line_too_large");
    }
}
