//! Artifact appliers: the side effects that realize a startup-script setting.
pub mod run_once;
pub mod scheduled;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::exec::Executor;
use crate::settings::SettingDescriptor;

pub use run_once::RunOnceApplier;
pub use scheduled::ScheduledApplier;

/// Everything an applier needs to realize one setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyArgs {
    /// Identity the script should run as.
    pub run_as: String,
    /// Resolved local script path.
    pub script_path: PathBuf,
    /// Parameter string passed to the script.
    pub parameters: String,
}

/// A side effect that realizes a setting on the host.
///
/// Implementations return the artifacts they created so the engine can
/// record them and remove them later.
pub trait ArtifactApplier: Send + Sync + std::fmt::Debug {
    /// Human-readable description of what [`apply`](Self::apply) would do.
    fn describe(&self, args: &ApplyArgs) -> String;

    /// Perform the side effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the side effect could not be completed. Nothing
    /// may be left behind in that case.
    fn apply(&self, args: &ApplyArgs) -> Result<Vec<PathBuf>>;
}

/// The pair of appliers the engine chooses between per setting.
#[derive(Debug, Clone)]
pub struct Appliers {
    run_once: Arc<dyn ArtifactApplier>,
    scheduled: Arc<dyn ArtifactApplier>,
}

impl Appliers {
    /// Combine a run-once and a scheduled applier.
    #[must_use]
    pub fn new(run_once: Arc<dyn ArtifactApplier>, scheduled: Arc<dyn ArtifactApplier>) -> Self {
        Self {
            run_once,
            scheduled,
        }
    }

    /// Production appliers: scripts run through `executor`, boot jobs are
    /// written to `cron_dir`.
    #[must_use]
    pub fn system(executor: Arc<dyn Executor>, cron_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            Arc::new(RunOnceApplier::new(executor)),
            Arc::new(ScheduledApplier::new(cron_dir)),
        )
    }

    /// The applier responsible for `setting`.
    #[must_use]
    pub fn for_setting(&self, setting: &SettingDescriptor) -> &dyn ArtifactApplier {
        if setting.run_once {
            self.run_once.as_ref()
        } else {
            self.scheduled.as_ref()
        }
    }
}
