//! Tracing setup: warnings to stderr for the operator, a daily-rolling file
//! under the data directory with the full record.

use std::env;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "focusflow.log";
const DEBUG_ENV: &str = "FOCUSFLOW_DEBUG_LOG";

fn debug_enabled() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn filter(default_level: &str) -> EnvFilter {
    if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    }
}

/// Installs the global subscriber. The returned guard flushes the file
/// writer on drop and must be held for the life of the process. Without a
/// usable log directory only stderr is used.
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_filter(filter("warn"));

    let appender = log_dir.and_then(|dir| match fs_err::create_dir_all(dir) {
        Ok(()) => Some(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX)),
        Err(err) => {
            eprintln!("focusflow: file logging disabled: {}", err);
            None
        }
    });

    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_timer(UtcTime::rfc_3339())
                .with_ansi(false)
                .with_filter(filter("info"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    guard
}
