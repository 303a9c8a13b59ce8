//! Non-fatal configuration checks reported as warnings before a pass.
use std::collections::HashSet;

use super::{EngineConfig, RefreshList};

/// A validation warning detected during configuration loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// The configuration source (e.g., "config.toml", "refresh list").
    pub source: String,
    /// The specific item that triggered the warning.
    pub item: String,
    /// Human-readable warning message.
    pub message: String,
}

impl ValidationWarning {
    /// Create a warning.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        item: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            item: item.into(),
            message: message.into(),
        }
    }
}

/// Trait for configuration validators.
pub trait ConfigValidator {
    /// Validate the configuration and return any warnings found.
    fn validate(&self) -> Vec<ValidationWarning>;

    /// Return a human-readable name for this validator.
    fn name(&self) -> &'static str;
}

/// Validator for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigValidator<'a> {
    config: &'a EngineConfig,
}

impl<'a> EngineConfigValidator<'a> {
    /// Validate `config`.
    #[must_use]
    pub const fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }
}

impl ConfigValidator for EngineConfigValidator<'_> {
    fn validate(&self) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        let paths = [
            ("cron_dir", &self.config.cron_dir),
            ("cache_dir", &self.config.cache_dir),
            ("state_file", &self.config.state_file),
        ];
        for (item, path) in paths {
            if !path.is_absolute() {
                warnings.push(ValidationWarning::new(
                    self.name(),
                    item,
                    format!("path is relative: {}", path.display()),
                ));
            }
        }
        if !self.config.cron_dir.is_dir() {
            warnings.push(ValidationWarning::new(
                self.name(),
                "cron_dir",
                format!(
                    "directory does not exist: {}",
                    self.config.cron_dir.display()
                ),
            ));
        }
        warnings
    }

    fn name(&self) -> &'static str {
        "config.toml"
    }
}

/// Validator for a [`RefreshList`].
#[derive(Debug)]
pub struct RefreshListValidator<'a> {
    list: &'a RefreshList,
}

impl<'a> RefreshListValidator<'a> {
    /// Validate `list`.
    #[must_use]
    pub const fn new(list: &'a RefreshList) -> Self {
        Self { list }
    }
}

impl ConfigValidator for RefreshListValidator<'_> {
    fn validate(&self) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();

        for policy in self.list.current.iter().chain(&self.list.removed) {
            if policy.guid.trim().is_empty() {
                warnings.push(ValidationWarning::new(
                    self.name(),
                    &policy.name,
                    "policy object has an empty guid",
                ));
            } else if !seen.insert(policy.guid.as_str()) {
                warnings.push(ValidationWarning::new(
                    self.name(),
                    &policy.guid,
                    "policy object listed more than once",
                ));
            }
        }

        for policy in &self.list.current {
            if policy.file_sys_path.is_none() {
                warnings.push(ValidationWarning::new(
                    self.name(),
                    policy.label(),
                    "current policy object has no file_sys_path and will be skipped",
                ));
            }
        }

        warnings
    }

    fn name(&self) -> &'static str {
        "refresh list"
    }
}
