//! focusflow: command-line host for the FocusFlow session timer.
//!
//! Every invocation reconciles the persisted timer before doing anything
//! else, so a session that expired while no process was running is credited
//! and restarted on the next command.
//!
//! ## Subcommands
//!
//! - `start`, `finish`, `cancel`, `status`: drive the timer
//! - `unlock`, `expire`: deliver platform events by hand
//! - `run`: long-lived foreground host reading JSON-lines events from stdin
//! - `stats`, `history`, `delete`, `clear`: session history
//!
//! Locking is a soft pause that lives only in a running process, so it is
//! reported through `run` rather than as a one-shot command.

mod commands;
mod error;
mod host;
mod logging;
mod notifier;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use focusflow_core::{load_config, FocusConfig, SignalFlavor};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "focusflow")]
#[command(about = "Focus timer that restarts whenever you unlock your device")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.focusflow/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start a focus session
    Start {
        /// Session length in minutes (defaults to the configured duration)
        #[arg(long, short)]
        minutes: Option<i64>,
    },

    /// Finish the running session and credit it
    Finish,

    /// Abandon the running session without credit
    Cancel,

    /// Show the timer
    Status,

    /// Report that the device was unlocked (forfeits the running session)
    Unlock,

    /// Deliver a background expiry event
    Expire {
        #[arg(long)]
        session_id: i64,

        #[arg(long)]
        duration: u32,
    },

    /// Run a foreground host that reads JSON-lines events from stdin
    Run {
        /// Poll the desktop session lock state through loginctl
        #[arg(long)]
        poll_lock: bool,

        /// How app foreground/background transitions relate to lock signals
        #[arg(long, value_enum, default_value_t = FlavorArg::Keyguard)]
        signal_flavor: FlavorArg,
    },

    /// Show today, weekly and overall totals
    Stats {
        /// Also break down the last N days
        #[arg(long, value_name = "DAYS")]
        days: Option<u32>,
    },

    /// Show session history grouped by day
    History {
        /// Summarize the most recent N days instead of listing sessions
        #[arg(long, value_name = "DAYS", conflicts_with = "last")]
        recent: Option<usize>,

        /// List the N most recent sessions, newest first
        #[arg(long, value_name = "N")]
        last: Option<usize>,
    },

    /// Delete a session from history
    Delete {
        #[arg(value_name = "SESSION_ID")]
        session_id: i64,
    },

    /// Delete all session history (refused while a session runs)
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum FlavorArg {
    /// Only real lock changes pause or forfeit; backgrounding is silent
    Keyguard,
    /// Leaving the app counts as locking, returning counts as unlocking
    AppActiveProxy,
}

impl From<FlavorArg> for SignalFlavor {
    fn from(arg: FlavorArg) -> Self {
        match arg {
            FlavorArg::Keyguard => SignalFlavor::Keyguard,
            FlavorArg::AppActiveProxy => SignalFlavor::AppActiveProxy,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let (config, config_error) = match load_config(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(err) => (FocusConfig::default(), Some(err)),
    };
    let log_dir = config.log_dir().ok();
    let _logging_guard = logging::init(log_dir.as_deref());
    if let Some(err) = config_error {
        tracing::warn!(error = %err, "Falling back to default configuration");
    }

    if let Err(err) = commands::dispatch(cli.command, config, cli.json) {
        tracing::error!(error = %err, "focusflow failed");
        eprintln!("focusflow: {}", err);
        std::process::exit(1);
    }
}
