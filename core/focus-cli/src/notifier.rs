//! Terminal completion alerts.

use focusflow_core::{completion_notice, Completion, CompletionNotifier};
use focusflow_protocol::VIBRATION_PATTERN_MS;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Write;
use std::thread;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

const BELL: &str = "\x07";

/// Prints the notice and rings the terminal bell once per vibration pulse.
pub struct TerminalNotifier {
    rng: StdRng,
}

impl TerminalNotifier {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for TerminalNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionNotifier for TerminalNotifier {
    fn notify(&mut self, completion: &Completion) {
        let notice = completion_notice(completion.duration_minutes, &mut self.rng);
        info!(
            session_id = completion.session_id,
            duration_minutes = completion.duration_minutes,
            title = %notice.title,
            "Completion notice delivered"
        );

        let mut stdout = std::io::stdout().lock();
        if let Err(err) = writeln!(stdout, "\n{}\n{}\n", notice.title, notice.body) {
            warn!(error = %err, "Failed to print completion notice");
            return;
        }
        let _ = stdout.flush();
        drop(stdout);

        let offsets = pulse_offsets(&VIBRATION_PATTERN_MS);
        let spawned = thread::Builder::new()
            .name("focusflow-bell".to_string())
            .spawn(move || ring(&offsets));
        if let Err(err) = spawned {
            warn!(error = %err, "Failed to start bell thread");
        }
    }
}

fn ring(offsets: &[u64]) {
    let mut elapsed = 0;
    for offset in offsets {
        thread::sleep(StdDuration::from_millis(offset.saturating_sub(elapsed)));
        elapsed = *offset;
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(BELL.as_bytes());
        let _ = stderr.flush();
    }
}

/// Start times of each vibrate segment in a wait/vibrate pattern.
fn pulse_offsets(pattern: &[u64]) -> Vec<u64> {
    let mut offsets = Vec::new();
    let mut at = 0;
    for segment in pattern.chunks(2) {
        at += segment[0];
        if let Some(vibrate) = segment.get(1) {
            offsets.push(at);
            at += vibrate;
        }
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulses_start_after_each_wait() {
        assert_eq!(pulse_offsets(&VIBRATION_PATTERN_MS), vec![0, 1500, 3000]);
    }

    #[test]
    fn trailing_wait_adds_no_pulse() {
        assert_eq!(pulse_offsets(&[200, 100, 300]), vec![200]);
    }
}
