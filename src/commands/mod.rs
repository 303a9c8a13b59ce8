//! Top-level subcommand orchestration.
pub mod apply;
pub mod rsop;
pub mod unapply;
pub mod version;

use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::cli::GlobalOpts;
use crate::config::{EngineConfig, ValidationWarning};
use crate::engine::{Context, ReconcileReport};
use crate::exec::SystemExecutor;
use crate::logging::{Log, Logger};
use crate::state::FileStateStore;

/// Shared state produced by the common command setup sequence.
///
/// Encapsulates configuration loading, command-line overrides, and
/// validation so that each command does not have to repeat the boilerplate.
#[derive(Debug)]
pub struct CommandSetup {
    /// Effective engine configuration.
    pub config: EngineConfig,
}

impl CommandSetup {
    /// Load the engine configuration, apply overrides, and report warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but fails to parse.
    pub fn init(global: &GlobalOpts, log: &Logger) -> Result<Self> {
        log.stage("Loading configuration");
        let config = EngineConfig::load(&global.config)?.with_overrides(&global.overrides());

        log.debug(&format!("config: {}", global.config.display()));
        log.debug(&format!("cron dir: {}", config.cron_dir.display()));
        log.debug(&format!("cache dir: {}", config.cache_dir.display()));
        log.debug(&format!("state file: {}", config.state_file.display()));
        if config.enforce {
            log.info("enforce mode: every setting is re-applied");
        }

        report_warnings(&config.validate(), log);
        Ok(Self { config })
    }

    /// Open the persistent State Store named by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file exists but cannot be read.
    pub fn open_store(&self) -> Result<FileStateStore> {
        FileStateStore::open(&self.config.state_file)
            .with_context(|| format!("opening {}", self.config.state_file.display()))
    }

    /// Build the production engine context.
    #[must_use]
    pub fn context(&self, global: &GlobalOpts, log: &Arc<Logger>) -> Context {
        Context::new(
            self.config.clone(),
            Arc::clone(log) as Arc<dyn Log>,
            global.dry_run,
            Arc::new(SystemExecutor),
        )
    }
}

/// Display configuration warnings, if any.
pub fn report_warnings(warnings: &[ValidationWarning], log: &Logger) {
    if warnings.is_empty() {
        return;
    }
    log.warn(&format!(
        "found {} configuration warning(s):",
        warnings.len()
    ));
    for warning in warnings {
        log.warn(&format!(
            "  {} [{}]: {}",
            warning.source, warning.item, warning.message
        ));
    }
}

/// Print the summary and bail if any attribute failed.
///
/// # Errors
///
/// Returns an error if the report carries one or more failures.
pub fn finish(report: &ReconcileReport, log: &Logger) -> Result<()> {
    log.print_summary();

    for failure in &report.failures {
        log.error(&failure.to_string());
    }
    let count = report.failures.len();
    if count > 0 {
        anyhow::bail!("{count} attribute(s) failed");
    }
    Ok(())
}
