//! The reconciliation engine: diffs desired settings against the State Store
//! and drives the appliers.
//!
//! A pass processes removed policy objects first, then every current policy
//! object in caller order. Failures are isolated per attribute and collected
//! into a [`ReconcileReport`]; only an unusable State Store aborts the pass.
mod report;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

pub use report::{AttributeFailure, AttributeOutcome, Operation, ReconcileReport};

use crate::appliers::Appliers;
use crate::config::EngineConfig;
use crate::config::manifest::{ManifestSource, TomlManifestSource};
use crate::error::{ApplyError, StoreError};
use crate::exec::Executor;
use crate::logging::{Log, OutcomeStatus};
use crate::operations::{FileSystemOps, SystemFileSystemOps};
use crate::policy::{PolicyObject, RemovedPolicy};
use crate::settings::{self, SettingDescriptor};
use crate::state::{StateRecord, StateStore};

/// Collaborators shared by every operation of a pass.
pub struct Context {
    /// Engine settings.
    pub config: Arc<EngineConfig>,
    /// Logger for output and outcome recording.
    pub log: Arc<dyn Log>,
    /// Whether to preview decisions without side effects.
    pub dry_run: bool,
    /// Run-once and scheduled appliers.
    pub appliers: Appliers,
    /// Where manifests come from.
    pub source: Arc<dyn ManifestSource>,
    /// Filesystem operation abstraction (injectable for testing).
    pub fs_ops: Arc<dyn FileSystemOps>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("log", &"<dyn Log>")
            .field("dry_run", &self.dry_run)
            .field("appliers", &self.appliers)
            .field("source", &self.source)
            .field("fs_ops", &self.fs_ops)
            .finish()
    }
}

impl Context {
    /// Production context: TOML manifests, real filesystem, scripts run
    /// through `executor` and boot jobs written to the configured cron
    /// directory.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        log: Arc<dyn Log>,
        dry_run: bool,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let appliers = Appliers::system(executor, config.cron_dir.clone());
        Self {
            config: Arc::new(config),
            log,
            dry_run,
            appliers,
            source: Arc::new(TomlManifestSource),
            fs_ops: Arc::new(SystemFileSystemOps),
        }
    }

    /// Replace the appliers.
    #[must_use]
    pub fn with_appliers(mut self, appliers: Appliers) -> Self {
        self.appliers = appliers;
        self
    }

    /// Replace the manifest source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn ManifestSource>) -> Self {
        self.source = source;
        self
    }

    /// Replace the filesystem operations.
    #[must_use]
    pub fn with_fs_ops(mut self, fs_ops: Arc<dyn FileSystemOps>) -> Self {
        self.fs_ops = fs_ops;
        self
    }
}

/// Which attributes [`Reconciler::clean`] should unapply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanFilter {
    /// Unapply every recorded attribute not in the set.
    Keep(BTreeSet<String>),
    /// Unapply exactly the recorded attributes in the set.
    Remove(BTreeSet<String>),
}

impl CleanFilter {
    fn selects(&self, attribute: &str) -> bool {
        match self {
            Self::Keep(keep) => !keep.contains(attribute),
            Self::Remove(remove) => remove.contains(attribute),
        }
    }
}

/// Drives one reconciliation pass against a State Store.
#[derive(Debug)]
pub struct Reconciler<'a> {
    ctx: &'a Context,
    store: &'a mut dyn StateStore,
    report: ReconcileReport,
}

impl<'a> Reconciler<'a> {
    /// Create a reconciler over `store`.
    pub fn new(ctx: &'a Context, store: &'a mut dyn StateStore) -> Self {
        Self {
            ctx,
            store,
            report: ReconcileReport::new(),
        }
    }

    /// Counters and failures collected so far.
    #[must_use]
    pub const fn report(&self) -> &ReconcileReport {
        &self.report
    }

    /// Finish and return the collected report.
    #[must_use]
    pub fn into_report(self) -> ReconcileReport {
        self.report
    }

    /// Run a full pass: unapply `removed`, then apply and clean `current`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the State Store cannot be written; the pass
    /// stops at that point. Per-attribute failures are in the report.
    pub fn reconcile(
        mut self,
        removed: &[RemovedPolicy],
        current: &[PolicyObject],
    ) -> Result<ReconcileReport, StoreError> {
        let ctx = self.ctx;
        let log = &*ctx.log;

        if !removed.is_empty() {
            log.stage("Removing startup scripts of deleted policies");
            for gone in removed {
                self.remove_policy(gone)?;
            }
        }

        if !current.is_empty() {
            log.stage("Applying startup scripts");
            for policy in current {
                self.process_policy(policy)?;
            }
        }

        log.info(&self.report.summary(ctx.dry_run));
        Ok(self.report)
    }

    /// Bring one attribute of `guid` in line with `setting`.
    ///
    /// Nothing happens when the stored hash matches, unless enforce mode is
    /// on or a recorded artifact has disappeared. Otherwise the applier runs
    /// first; only after it succeeds are the previous artifacts removed and
    /// the new record committed.
    ///
    /// Superseded artifacts that an earlier update could not remove are
    /// retried on every call, whether or not the setting changed, and the
    /// attribute is reported as failed while any of them remain.
    ///
    /// # Errors
    ///
    /// Returns an error only if the State Store cannot be written.
    pub fn apply(
        &mut self,
        guid: &str,
        setting: &SettingDescriptor,
    ) -> Result<AttributeOutcome, StoreError> {
        let ctx = self.ctx;
        let key = &setting.attribute_key;
        let mut existing = self.lookup(guid, key);
        let mut leftover = match existing.as_mut() {
            Some(record) => self.retry_pending(guid, key, record)?,
            None => None,
        };

        let Some(reason) = self.apply_reason(existing.as_ref(), setting) else {
            if let Some(err) = leftover {
                return Ok(self.fail(guid, key, Operation::Apply, &err.into()));
            }
            ctx.log
                .debug(&format!("unchanged: {}", setting.script_path.display()));
            self.report.count(AttributeOutcome::Unchanged);
            return Ok(AttributeOutcome::Unchanged);
        };

        let applier = ctx.appliers.for_setting(setting);
        let args = setting.apply_args();
        let description = applier.describe(&args);

        if ctx.dry_run {
            ctx.log.dry_run(&format!("would {description} ({reason})"));
            self.report.count(AttributeOutcome::WouldApply);
            return Ok(AttributeOutcome::WouldApply);
        }

        ctx.log.debug(&format!("{description} ({reason})"));
        let paths = match applier.apply(&args) {
            Ok(paths) => paths,
            Err(e) => return Ok(self.fail(guid, key, Operation::Apply, &e)),
        };

        let mut record = StateRecord::new(setting.content_hash.clone(), paths);
        if let Some(old) = existing {
            record.pending_removal = old.pending_removal;
            let stale: Vec<PathBuf> = old
                .artifact_paths
                .into_iter()
                .filter(|p| !record.artifact_paths.contains(p))
                .collect();
            if let Err(err) = self.remove_artifacts(&stale) {
                // Keep ownership of what could not be removed
                if let ApplyError::RemovalFailed { paths, .. } = &err {
                    record.pending_removal.extend(paths.iter().cloned());
                }
                leftover = Some(err);
            }
        }

        self.store.set(guid, key, &record)?;
        self.store.commit()?;

        if let Some(err) = leftover {
            return Ok(self.fail(guid, key, Operation::Apply, &err.into()));
        }
        ctx.log.info(&description);
        self.report.count(AttributeOutcome::Applied);
        Ok(AttributeOutcome::Applied)
    }

    /// Remove every artifact of one attribute and forget its record.
    ///
    /// `known` supplements the stored record with caller-side knowledge; the
    /// artifacts of both are removed. Artifacts already gone count as
    /// removed. If any artifact cannot be removed the record is rewritten to
    /// list only those and the attribute is reported as failed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the State Store cannot be written.
    pub fn unapply(
        &mut self,
        guid: &str,
        attribute: &str,
        known: Option<StateRecord>,
    ) -> Result<AttributeOutcome, StoreError> {
        let ctx = self.ctx;
        let stored = self.lookup(guid, attribute);
        let last_hash = stored
            .as_ref()
            .or(known.as_ref())
            .map(|r| r.last_hash.clone())
            .unwrap_or_default();

        let mut paths: Vec<PathBuf> = Vec::new();
        for path in stored
            .into_iter()
            .chain(known)
            .flat_map(|r| r.artifact_paths.into_iter().chain(r.pending_removal))
        {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }

        if ctx.dry_run {
            ctx.log.dry_run(&format!(
                "would remove {guid}/{attribute} ({} artifact(s))",
                paths.len()
            ));
            self.report.count(AttributeOutcome::WouldRemove);
            return Ok(AttributeOutcome::WouldRemove);
        }

        match self.remove_artifacts(&paths) {
            Ok(()) => {
                self.store.delete(guid, attribute);
                self.store.commit()?;
                ctx.log.info(&format!(
                    "removed {guid}/{attribute} ({} artifact(s))",
                    paths.len()
                ));
                self.report.count(AttributeOutcome::Removed);
                Ok(AttributeOutcome::Removed)
            }
            Err(err) => {
                if let ApplyError::RemovalFailed {
                    paths: remaining, ..
                } = &err
                {
                    self.store
                        .set(guid, attribute, &StateRecord::new(last_hash, remaining.clone()))?;
                    self.store.commit()?;
                }
                Ok(self.fail(guid, attribute, Operation::Unapply, &err.into()))
            }
        }
    }

    /// Unapply the attributes recorded under `guid` that `filter` selects.
    ///
    /// Returns the attribute keys that were processed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the State Store cannot be written.
    pub fn clean(&mut self, guid: &str, filter: &CleanFilter) -> Result<Vec<String>, StoreError> {
        let targets: Vec<String> = self
            .store
            .attributes(guid)
            .into_iter()
            .filter(|a| filter.selects(a))
            .collect();
        for attribute in &targets {
            self.unapply(guid, attribute, None)?;
        }
        Ok(targets)
    }

    fn remove_policy(&mut self, gone: &RemovedPolicy) -> Result<(), StoreError> {
        let ctx = self.ctx;
        let guid = gone.policy.guid.as_str();
        let before = self.report.clone();

        let mut attributes: BTreeSet<String> = self.store.attributes(guid).into_iter().collect();
        attributes.extend(gone.recorded.keys().cloned());
        ctx.log.debug(&format!(
            "{}: {} recorded attribute(s)",
            gone.policy.label(),
            attributes.len()
        ));

        for attribute in &attributes {
            self.unapply(guid, attribute, gone.recorded.get(attribute).cloned())?;
        }

        let delta = self.report.since(&before);
        ctx.log.record_outcome(
            gone.policy.label(),
            outcome_status(&delta, ctx.dry_run, OutcomeStatus::Removed),
            Some(delta.summary(ctx.dry_run).as_str()),
        );
        Ok(())
    }

    fn process_policy(&mut self, policy: &PolicyObject) -> Result<(), StoreError> {
        let ctx = self.ctx;
        let Some(settings) = self.settings_for(policy) else {
            self.report.skipped_policies += 1;
            ctx.log
                .record_outcome(policy.label(), OutcomeStatus::NotApplicable, None);
            return Ok(());
        };

        ctx.log.info(&format!(
            "{} ({}): {} startup script(s)",
            policy.label(),
            policy.guid,
            settings.len()
        ));
        let before = self.report.clone();

        let mut keep = BTreeSet::new();
        for setting in &settings {
            self.apply(&policy.guid, setting)?;
            keep.insert(setting.attribute_key.clone());
        }
        self.clean(&policy.guid, &CleanFilter::Keep(keep))?;

        let delta = self.report.since(&before);
        ctx.log.record_outcome(
            policy.label(),
            outcome_status(&delta, ctx.dry_run, OutcomeStatus::Ok),
            Some(delta.summary(ctx.dry_run).as_str()),
        );
        Ok(())
    }

    /// Extract the settings of `policy`, or `None` when it has no usable
    /// manifest.
    fn settings_for(&self, policy: &PolicyObject) -> Option<Vec<SettingDescriptor>> {
        let ctx = self.ctx;
        let manifest = match ctx.source.load(policy) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => {
                ctx.log
                    .debug(&format!("{}: no startup scripts manifest", policy.label()));
                return None;
            }
            Err(e) => {
                ctx.log
                    .warn(&format!("{}: manifest unavailable: {e:#}", policy.label()));
                return None;
            }
        };
        match settings::extract(&manifest, &ctx.config.cache_dir) {
            Ok(settings) => Some(settings),
            Err(e) => {
                ctx.log.warn(&format!("{}: {e}", policy.label()));
                None
            }
        }
    }

    fn apply_reason(
        &self,
        existing: Option<&StateRecord>,
        setting: &SettingDescriptor,
    ) -> Option<&'static str> {
        match existing {
            None => Some("new"),
            Some(record) if record.last_hash != setting.content_hash => Some("changed"),
            Some(_) if self.ctx.config.enforce => Some("enforced"),
            Some(record)
                if record
                    .artifact_paths
                    .iter()
                    .any(|p| !self.ctx.fs_ops.exists(p)) =>
            {
                Some("artifact missing")
            }
            Some(_) => None,
        }
    }

    /// Retry removing superseded artifacts left behind by an earlier update.
    ///
    /// The record is rewritten to whatever is still left; the returned error
    /// names those paths.
    fn retry_pending(
        &mut self,
        guid: &str,
        attribute: &str,
        record: &mut StateRecord,
    ) -> Result<Option<ApplyError>, StoreError> {
        if record.pending_removal.is_empty() {
            return Ok(None);
        }
        let ctx = self.ctx;
        if ctx.dry_run {
            ctx.log.dry_run(&format!(
                "would retry removal of {} stale artifact(s) of {guid}/{attribute}",
                record.pending_removal.len()
            ));
            return Ok(None);
        }

        let leftover = match self.remove_artifacts(&record.pending_removal) {
            Ok(()) => {
                record.pending_removal.clear();
                None
            }
            Err(err) => {
                if let ApplyError::RemovalFailed { paths, .. } = &err {
                    record.pending_removal.clone_from(paths);
                }
                Some(err)
            }
        };
        self.store.set(guid, attribute, record)?;
        self.store.commit()?;
        Ok(leftover)
    }

    /// Read a record, downgrading a corrupt one to "no record".
    fn lookup(&self, guid: &str, attribute: &str) -> Option<StateRecord> {
        match self.store.get(guid, attribute) {
            Ok(record) => record,
            Err(e) => {
                self.ctx.log.warn(&format!("{e}; treating as not applied"));
                None
            }
        }
    }

    /// Remove `paths`; already-missing files count as removed.
    fn remove_artifacts(&self, paths: &[PathBuf]) -> Result<(), ApplyError> {
        let mut remaining = Vec::new();
        let mut first_error = None;
        for path in paths {
            match self.ctx.fs_ops.remove_file(path) {
                Ok(()) => self.ctx.log.debug(&format!("removed {}", path.display())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    self.ctx
                        .log
                        .debug(&format!("already gone: {}", path.display()));
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e.to_string());
                    }
                    remaining.push(path.clone());
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(message) => Err(ApplyError::RemovalFailed {
                paths: remaining,
                message,
            }),
        }
    }

    fn fail(
        &mut self,
        guid: &str,
        attribute: &str,
        operation: Operation,
        err: &anyhow::Error,
    ) -> AttributeOutcome {
        self.ctx
            .log
            .error(&format!("{operation} failed for {guid}/{attribute}: {err:#}"));
        self.report.push_failure(guid, attribute, operation, err);
        AttributeOutcome::Failed
    }
}

/// Summary status of one policy object from its share of the report.
const fn outcome_status(
    delta: &ReconcileReport,
    dry_run: bool,
    done: OutcomeStatus,
) -> OutcomeStatus {
    if !delta.failures.is_empty() {
        OutcomeStatus::Failed
    } else if dry_run {
        OutcomeStatus::DryRun
    } else {
        done
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests;
