//! Structured logger with dry-run awareness and summary collection.
use std::path::PathBuf;
use std::sync::Mutex;

use super::types::{Log, OutcomeEntry, OutcomeStatus};
use super::utils::log_file_path;

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Structured logger with dry-run awareness and summary collection.
///
/// Messages become [`tracing`] events; the subscriber installed by
/// [`init_subscriber`](super::subscriber::init_subscriber) decides where they
/// end up.
#[derive(Debug)]
pub struct Logger {
    outcomes: Mutex<Vec<OutcomeEntry>>,
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Create a new logger for `command`.
    ///
    /// Stores the log file path for display in the run summary; the file is
    /// created by the subscriber's file layer, not here.
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            log_file: log_file_path(command),
        }
    }

    /// Return the log file path, if available.
    #[cfg(test)]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Return a clone of all recorded outcomes.
    #[must_use]
    pub fn outcomes(&self) -> Vec<OutcomeEntry> {
        self.outcomes.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: "gp_startup::stage", "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Log a debug message (suppressed on console unless verbose).
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Log a dry-run action message.
    pub fn dry_run(&self, msg: &str) {
        tracing::info!(target: "gp_startup::dry_run", "{msg}");
    }

    /// Record a policy outcome for the summary.
    pub fn record_outcome(&self, name: &str, status: OutcomeStatus, message: Option<&str>) {
        if let Ok(mut guard) = self.outcomes.lock() {
            guard.push(OutcomeEntry {
                name: name.to_string(),
                status,
                message: message.map(String::from),
            });
        }
    }

    /// Count the number of failed policies.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.outcomes.lock().map_or(0, |guard| {
            guard
                .iter()
                .filter(|t| t.status == OutcomeStatus::Failed)
                .count()
        })
    }

    /// Print the summary of all recorded outcomes.
    pub fn print_summary(&self) {
        let outcomes = self.outcomes();
        if outcomes.is_empty() {
            return;
        }

        self.stage("Summary");

        let mut ok = 0u32;
        let mut not_applicable = 0u32;
        let mut removed = 0u32;
        let mut dry_run = 0u32;
        let mut failed = 0u32;

        for outcome in &outcomes {
            let (icon, color) = match outcome.status {
                OutcomeStatus::Ok => {
                    ok += 1;
                    ("✓", "\x1b[32m")
                }
                OutcomeStatus::NotApplicable => {
                    not_applicable += 1;
                    ("·", "\x1b[2m")
                }
                OutcomeStatus::Removed => {
                    removed += 1;
                    ("-", "\x1b[33m")
                }
                OutcomeStatus::DryRun => {
                    dry_run += 1;
                    ("~", "\x1b[37m")
                }
                OutcomeStatus::Failed => {
                    failed += 1;
                    ("✗", "\x1b[31m")
                }
            };

            let suffix = outcome
                .message
                .as_ref()
                .map_or_else(String::new, |msg| format!(" ({msg})"));

            self.info(&format!("{color}{icon} {}{suffix}\x1b[0m", outcome.name));
        }

        let total = ok + not_applicable + removed + dry_run + failed;
        self.info(&format!(
            "{total} policies: \x1b[32m{ok} ok\x1b[0m, \x1b[2m{not_applicable} n/a\x1b[0m, \x1b[33m{removed} removed\x1b[0m, \x1b[37m{dry_run} dry-run\x1b[0m, \x1b[31m{failed} failed\x1b[0m"
        ));

        if let Some(path) = &self.log_file {
            self.info(&format!("\x1b[2mlog: {}\x1b[0m", path.display()));
        }
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error, dry_run);

    fn record_outcome(&self, name: &str, status: OutcomeStatus, message: Option<&str>) {
        self.record_outcome(name, status, message);
    }
}
