//! Resultant-state reporting: what a policy object asks of this host.
//!
//! The projection uses exactly the same extraction as the engine and never
//! consults the State Store, so it reports intent, not history.
use std::collections::BTreeMap;

use anyhow::{Context as _, Result};

use crate::config::EngineConfig;
use crate::config::manifest::ManifestSource;
use crate::policy::PolicyObject;
use crate::settings;

/// Label the report is keyed by.
pub const EXTENSION_LABEL: &str = "VGP/Unix Settings/Startup Scripts";

/// Compute the effective startup-script settings of `policy`.
///
/// Returns an empty map when the policy has no manifest; otherwise a single
/// entry under [`EXTENSION_LABEL`] with one line per setting in manifest
/// order.
///
/// # Errors
///
/// Returns an error if the manifest exists but cannot be read, parsed, or
/// resolved safely.
pub fn compute_effective(
    policy: &PolicyObject,
    source: &dyn ManifestSource,
    config: &EngineConfig,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut output = BTreeMap::new();
    let Some(manifest) = source.load(policy)? else {
        return Ok(output);
    };
    let settings = settings::extract(&manifest, &config.cache_dir)
        .with_context(|| format!("resolving scripts of {}", policy.label()))?;
    if !settings.is_empty() {
        output.insert(
            EXTENSION_LABEL.to_string(),
            settings.iter().map(settings::SettingDescriptor::effective_line).collect(),
        );
    }
    Ok(output)
}
