//! Engine configuration, refresh lists, and policy manifests.
pub mod manifest;
pub mod toml_loader;
pub mod validation;

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policy::{PolicyObject, RemovedPolicy};
use validation::{ConfigValidator as _, EngineConfigValidator, RefreshListValidator};

pub use validation::ValidationWarning;

/// Default location of the engine configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/gp-startup/config.toml";

/// Engine settings.
///
/// ```toml
/// cron_dir = "/etc/cron.d"
/// cache_dir = "/var/cache/gp-startup/gpo_cache"
/// state_file = "/var/lib/gp-startup/state.toml"
/// enforce = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Directory boot-time job files are written to.
    pub cron_dir: PathBuf,
    /// Local mirror of policy files; script paths resolve beneath it.
    pub cache_dir: PathBuf,
    /// Location of the persistent state file.
    pub state_file: PathBuf,
    /// Re-apply every setting on every pass, ignoring stored hashes.
    pub enforce: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cron_dir: PathBuf::from("/etc/cron.d"),
            cache_dir: PathBuf::from("/var/cache/gp-startup/gpo_cache"),
            state_file: PathBuf::from("/var/lib/gp-startup/state.toml"),
            enforce: false,
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Replacement for [`EngineConfig::cron_dir`].
    pub cron_dir: Option<PathBuf>,
    /// Replacement for [`EngineConfig::cache_dir`].
    pub cache_dir: Option<PathBuf>,
    /// Replacement for [`EngineConfig::state_file`].
    pub state_file: Option<PathBuf>,
    /// Force enforce mode on.
    pub enforce: bool,
}

impl EngineConfig {
    /// Load the configuration at `path`; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        toml_loader::load_config(path)
    }

    /// Apply command-line overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(dir) = &overrides.cron_dir {
            self.cron_dir.clone_from(dir);
        }
        if let Some(dir) = &overrides.cache_dir {
            self.cache_dir.clone_from(dir);
        }
        if let Some(file) = &overrides.state_file {
            self.state_file.clone_from(file);
        }
        self.enforce |= overrides.enforce;
        self
    }

    /// Check for suspicious settings.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationWarning> {
        EngineConfigValidator::new(self).validate()
    }
}

/// Policy objects handed over by the policy-distribution layer for one pass.
///
/// ```toml
/// [[removed]]
/// guid = "{6AC1786C-016F-11D2-945F-00C04FB984F9}"
/// name = "Old Policy"
///
/// [[current]]
/// guid = "{31B2F340-016D-11D2-945F-00C04FB984F9}"
/// name = "Default Domain Policy"
/// file_sys_path = "/var/cache/gp-startup/gpo_cache/example.com/sysvol/example.com/Policies/{31B2F340-016D-11D2-945F-00C04FB984F9}"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshList {
    /// Policy objects currently in effect, in precedence order.
    pub current: Vec<PolicyObject>,
    /// Policy objects removed since the last pass.
    pub removed: Vec<PolicyObject>,
}

impl RefreshList {
    /// Load a refresh list; the file must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        toml_loader::load_required(path)
    }

    /// Removed policy objects without caller-side records; the engine reads
    /// what it needs from the State Store.
    #[must_use]
    pub fn removed_policies(&self) -> Vec<RemovedPolicy> {
        self.removed.iter().cloned().map(RemovedPolicy::new).collect()
    }

    /// Check for suspicious entries.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationWarning> {
        RefreshListValidator::new(self).validate()
    }
}
