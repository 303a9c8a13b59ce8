//! Core logging types: outcome entries, status, and the [`Log`] trait.

/// Per-policy outcome recorded for the run summary.
#[derive(Debug, Clone)]
pub struct OutcomeEntry {
    /// Policy object name (or guid when the name is unknown).
    pub name: String,
    /// Final status of the policy object.
    pub status: OutcomeStatus,
    /// Optional detail message (e.g., counters or a failure description).
    pub message: Option<String>,
}

/// Status of a processed policy object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Every setting was applied or already current.
    Ok,
    /// The policy had no manifest and was left alone.
    NotApplicable,
    /// The policy was removed and its artifacts unapplied.
    Removed,
    /// The pass ran in dry-run mode; nothing was changed.
    DryRun,
    /// At least one setting failed.
    Failed,
}

/// Abstraction over logging backends.
///
/// [`Logger`](super::logger::Logger) is the production implementation; the
/// engine only sees this trait so tests can capture or silence output.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record a policy outcome for the summary.
    fn record_outcome(&self, name: &str, status: OutcomeStatus, message: Option<&str>);
}
