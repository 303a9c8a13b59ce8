//! Counters and failures collected over one reconciliation pass.
use std::fmt;

/// Result of one engine operation on one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeOutcome {
    /// The applier ran and the new record was committed.
    Applied,
    /// A dry run found the attribute out of date.
    WouldApply,
    /// The stored record already matches.
    Unchanged,
    /// Every artifact was removed and the record deleted.
    Removed,
    /// A dry run found the attribute to be removed.
    WouldRemove,
    /// The operation failed; details are in [`ReconcileReport::failures`].
    Failed,
}

/// Which engine operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Applying a desired setting.
    Apply,
    /// Removing a setting's artifacts and record.
    Unapply,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => f.write_str("apply"),
            Self::Unapply => f.write_str("unapply"),
        }
    }
}

/// One attribute that could not be brought to its desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeFailure {
    /// Policy object guid.
    pub guid: String,
    /// Attribute key.
    pub attribute: String,
    /// Operation that failed.
    pub operation: Operation,
    /// Error chain rendered as text.
    pub message: String,
}

impl fmt::Display for AttributeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{}: {}",
            self.operation, self.guid, self.attribute, self.message
        )
    }
}

/// Aggregate outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Attributes applied (or that would be applied in a dry run).
    pub applied: u32,
    /// Attributes already current.
    pub unchanged: u32,
    /// Attributes removed (or that would be removed in a dry run).
    pub removed: u32,
    /// Current policy objects skipped for lack of a usable manifest.
    pub skipped_policies: u32,
    /// Per-attribute failures, in the order they occurred.
    pub failures: Vec<AttributeFailure>,
}

impl ReconcileReport {
    /// Create an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an outcome.
    ///
    /// [`AttributeOutcome::Failed`] is not counted here; failures are
    /// recorded with [`push_failure`](Self::push_failure).
    pub const fn count(&mut self, outcome: AttributeOutcome) {
        match outcome {
            AttributeOutcome::Applied | AttributeOutcome::WouldApply => self.applied += 1,
            AttributeOutcome::Unchanged => self.unchanged += 1,
            AttributeOutcome::Removed | AttributeOutcome::WouldRemove => self.removed += 1,
            AttributeOutcome::Failed => {}
        }
    }

    /// Record a failed attribute.
    pub fn push_failure(
        &mut self,
        guid: &str,
        attribute: &str,
        operation: Operation,
        error: &anyhow::Error,
    ) {
        self.failures.push(AttributeFailure {
            guid: guid.to_string(),
            attribute: attribute.to_string(),
            operation,
            message: format!("{error:#}"),
        });
    }

    /// What happened since `earlier`, a snapshot of this same report.
    #[must_use]
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            applied: self.applied.saturating_sub(earlier.applied),
            unchanged: self.unchanged.saturating_sub(earlier.unchanged),
            removed: self.removed.saturating_sub(earlier.removed),
            skipped_policies: self.skipped_policies.saturating_sub(earlier.skipped_policies),
            failures: self
                .failures
                .get(earlier.failures.len()..)
                .unwrap_or_default()
                .to_vec(),
        }
    }

    /// Returns `true` if no attribute failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Format the summary string (e.g. "2 applied, 5 unchanged, 1 removed").
    ///
    /// # Examples
    ///
    /// ```
    /// use gp_startup::engine::ReconcileReport;
    ///
    /// let report = ReconcileReport { applied: 2, unchanged: 5, removed: 1, ..Default::default() };
    /// assert_eq!(report.summary(false), "2 applied, 5 unchanged, 1 removed");
    /// assert_eq!(report.summary(true), "2 would apply, 5 unchanged, 1 would remove");
    /// ```
    #[must_use]
    pub fn summary(&self, dry_run: bool) -> String {
        let (apply_verb, remove_verb) = if dry_run {
            ("would apply", "would remove")
        } else {
            ("applied", "removed")
        };
        let mut parts = vec![
            format!("{} {apply_verb}", self.applied),
            format!("{} unchanged", self.unchanged),
            format!("{} {remove_verb}", self.removed),
        ];
        if self.skipped_policies > 0 {
            parts.push(format!("{} policies skipped", self.skipped_policies));
        }
        if !self.failures.is_empty() {
            parts.push(format!("{} failed", self.failures.len()));
        }
        parts.join(", ")
    }
}
