//! Policy objects handed to the engine by the policy-distribution layer.
use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::state::StateRecord;

/// A named source of desired configuration with a stable identity.
///
/// # Examples
///
/// ```
/// use gp_startup::policy::PolicyObject;
///
/// let gpo = PolicyObject::new("{31B2F340-016D-11D2-945F-00C04FB984F9}", "Default Domain Policy")
///     .with_file_sys_path("/var/cache/gpo/{31B2F340-016D-11D2-945F-00C04FB984F9}");
/// assert!(gpo.file_sys_path.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolicyObject {
    /// Stable identity used as the State Store key.
    pub guid: String,
    /// Human-readable display name.
    pub name: String,
    /// Local root of the policy's files; `None` when nothing was fetched.
    #[serde(default)]
    pub file_sys_path: Option<PathBuf>,
}

impl PolicyObject {
    /// Create a policy object without a filesystem root.
    #[must_use]
    pub fn new(guid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            file_sys_path: None,
        }
    }

    /// Set the filesystem root.
    #[must_use]
    pub fn with_file_sys_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_sys_path = Some(path.into());
        self
    }

    /// Name for log output: the display name, or the guid when it is blank.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.guid
        } else {
            &self.name
        }
    }
}

/// A policy object removed since the last pass, paired with the attribute
/// records the caller knows it produced.
///
/// The engine unapplies the union of `recorded` and whatever the State Store
/// holds for the guid, so `recorded` may be left empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovedPolicy {
    /// The removed policy object.
    pub policy: PolicyObject,
    /// Attribute records supplied by the caller, keyed by attribute key.
    pub recorded: BTreeMap<String, StateRecord>,
}

impl RemovedPolicy {
    /// Pair a removed policy with no caller-side records.
    #[must_use]
    pub const fn new(policy: PolicyObject) -> Self {
        Self {
            policy,
            recorded: BTreeMap::new(),
        }
    }
}

impl Default for PolicyObject {
    fn default() -> Self {
        Self::new("", "")
    }
}
