//! Setting extraction: turns a manifest into ordered [`SettingDescriptor`]s.
//!
//! This is the single place where manifest defaults are applied and script
//! paths are resolved, so the engine and the resultant-state reporter can
//! never disagree about what a policy object asks for.
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest as _, Sha256};

use crate::appliers::{ApplyArgs, scheduled::cron_entry};
use crate::config::manifest::Manifest;
use crate::error::ManifestError;

/// Identity scripts run as when the manifest names none.
pub const DEFAULT_RUN_AS: &str = "root";

/// Path component below which policy files are mirrored into the cache.
const SYSVOL: &str = "sysvol";

/// One desired startup-script setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingDescriptor {
    /// Stable identity of the setting within its policy object.
    pub attribute_key: String,
    /// Opaque content hash taken from the manifest.
    pub content_hash: String,
    /// Identity to run the script as.
    pub run_as: String,
    /// Run immediately, once, instead of scheduling at boot.
    pub run_once: bool,
    /// Resolved local path of the script.
    pub script_path: PathBuf,
    /// Parameter string passed to the script.
    pub parameters: String,
}

impl SettingDescriptor {
    /// Arguments handed to an artifact applier for this setting.
    #[must_use]
    pub fn apply_args(&self) -> ApplyArgs {
        ApplyArgs {
            run_as: self.run_as.clone(),
            script_path: self.script_path.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Human-readable statement of the setting's effect.
    ///
    /// Scheduled settings render as the exact cron entry written to disk.
    #[must_use]
    pub fn effective_line(&self) -> String {
        if self.run_once {
            format!(
                "Run once as: {} `{} {}`",
                self.run_as,
                self.script_path.display(),
                self.parameters
            )
        } else {
            cron_entry(&self.run_as, &self.script_path, &self.parameters)
        }
    }
}

/// Compute the attribute key for a script invocation.
///
/// Lowercase hex SHA-256 of the script path and the parameter string,
/// separated by a NUL byte so `("a b", "c")` and `("a", "b c")` differ.
#[must_use]
pub fn attribute_key(script_path: &Path, parameters: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script_path.as_os_str().as_encoded_bytes());
    hasher.update([0u8]);
    hasher.update(parameters.as_bytes());
    let mut hex = String::with_capacity(64);
    for b in hasher.finalize() {
        write!(hex, "{b:02x}").unwrap_or(());
    }
    hex
}

/// Reduce a policy file path to its location relative to the sysvol share.
///
/// Everything up to and including the first `sysvol` component
/// (case-insensitive) is dropped; without one, the path is made relative by
/// dropping its root. Both `/` and `\` separate components.
///
/// # Errors
///
/// Returns [`ManifestError::UnsafePath`] if any remaining component is `..`.
pub fn safe_relative_path(path: &str) -> Result<PathBuf, ManifestError> {
    let components: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|c| !c.is_empty())
        .collect();
    let start = components
        .iter()
        .position(|c| c.eq_ignore_ascii_case(SYSVOL))
        .map_or(0, |i| i + 1);
    let tail = components.get(start..).unwrap_or_default();
    if tail.contains(&"..") {
        return Err(ManifestError::UnsafePath(path.to_string()));
    }
    Ok(tail.iter().collect())
}

/// Resolve a script reference against its manifest and the local cache.
///
/// The result is `cache_dir/UPPER(dirname(safe(manifest)))/UPPER(script)`.
///
/// # Errors
///
/// Returns [`ManifestError::UnsafePath`] if the manifest path or the script
/// reference would escape the cache directory, or if the reference names no
/// file at all.
pub fn resolve_script_path(
    cache_dir: &Path,
    manifest_path: &Path,
    script: &str,
) -> Result<PathBuf, ManifestError> {
    let relative = safe_relative_path(&manifest_path.to_string_lossy())?;
    let dir = relative.parent().unwrap_or_else(|| Path::new(""));
    let script = Path::new(script);
    if !script.components().any(|c| matches!(c, Component::Normal(_)))
        || script
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(ManifestError::UnsafePath(script.display().to_string()));
    }
    Ok(cache_dir
        .join(dir.to_string_lossy().to_uppercase())
        .join(script.to_string_lossy().to_uppercase()))
}

/// Reject values that would add lines to a job file or a report.
fn single_line(field: &'static str, value: &str) -> Result<(), ManifestError> {
    if value.chars().any(char::is_control) {
        return Err(ManifestError::ControlCharacter {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Extract the ordered setting descriptors of a manifest.
///
/// Applies the defaults (`run_as = "root"`, empty parameters) and resolves
/// every script path under `cache_dir`.
///
/// # Errors
///
/// Returns [`ManifestError::UnsafePath`] if any script path is unsafe, or
/// [`ManifestError::ControlCharacter`] if a script, parameter, or `run_as`
/// value contains a control character; the manifest is then rejected as a
/// whole.
pub fn extract(
    manifest: &Manifest,
    cache_dir: &Path,
) -> Result<Vec<SettingDescriptor>, ManifestError> {
    manifest
        .entries
        .iter()
        .map(|entry| {
            single_line("script", &entry.script)?;
            if let Some(parameters) = &entry.parameters {
                single_line("parameters", parameters)?;
            }
            if let Some(run_as) = &entry.run_as {
                single_line("run_as", run_as)?;
            }
            let script_path = resolve_script_path(cache_dir, &manifest.path, &entry.script)?;
            let parameters = entry.parameters.clone().unwrap_or_default();
            Ok(SettingDescriptor {
                attribute_key: attribute_key(&script_path, &parameters),
                content_hash: entry.hash.clone(),
                run_as: entry
                    .run_as
                    .clone()
                    .unwrap_or_else(|| DEFAULT_RUN_AS.to_string()),
                run_once: entry.run_once,
                script_path,
                parameters,
            })
        })
        .collect()
}
