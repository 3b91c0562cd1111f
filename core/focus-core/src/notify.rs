//! Completion alerts.
//!
//! The controller only needs "deliver a completion signal with the elapsed
//! minutes"; how it is shown (and how the device vibrates) belongs to the sink.

use chrono::{DateTime, Utc};
use focusflow_protocol::CompletionNotice;
use rand::Rng;
use tracing::info;

const MINUTES_PLACEHOLDER: &str = "{minutes}";

const COMPLETION_TEMPLATES: [(&str, &str); 8] = [
    (
        "Time Gone Forever",
        "You just spent {minutes} minutes on your phone. Your competition is working.",
    ),
    (
        "Phone Wins Again",
        "{minutes} minutes down the drain. You could have built something.",
    ),
    (
        "Wake Up Call",
        "Another {minutes} minutes gone. Make the next {minutes} count.",
    ),
    (
        "Reality Check",
        "That's {minutes} minutes you'll never get back. Use the next session wisely.",
    ),
    (
        "Course Correction",
        "{minutes} minutes passed, but you can turn this around. Start now.",
    ),
    (
        "Still Got Time",
        "{minutes} minutes are behind you and the day isn't over. Prove yourself.",
    ),
    (
        "Build Something",
        "Another {minutes} minutes on screens. Your goals need action.",
    ),
    (
        "Focus Check",
        "{minutes} minutes elapsed. Learn from it and lock in next time.",
    ),
];

/// One elapsed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub session_id: i64,
    pub duration_minutes: u32,
    pub completed_at: DateTime<Utc>,
}

pub trait CompletionNotifier: Send {
    /// Fire-and-forget; delivery failures stay inside the sink.
    fn notify(&mut self, completion: &Completion);
}

/// Picks one of the fixed templates and fills in the minutes.
pub fn completion_notice(minutes: u32, rng: &mut impl Rng) -> CompletionNotice {
    let (title, body) = COMPLETION_TEMPLATES[rng.gen_range(0..COMPLETION_TEMPLATES.len())];
    CompletionNotice {
        title: title.to_string(),
        body: body.replace(MINUTES_PLACEHOLDER, &minutes.to_string()),
    }
}

/// Records completions in the log only. Used when notifications are
/// disabled and by headless hosts.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl CompletionNotifier for LogNotifier {
    fn notify(&mut self, completion: &Completion) {
        info!(
            session_id = completion.session_id,
            duration_minutes = completion.duration_minutes,
            completed_at = %completion.completed_at.to_rfc3339(),
            "Focus session completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn notice_substitutes_every_placeholder() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..32 {
            let notice = completion_notice(25, &mut rng);
            assert!(!notice.title.is_empty());
            assert!(notice.body.contains("25"));
            assert!(!notice.body.contains(MINUTES_PLACEHOLDER));
        }
    }
}
