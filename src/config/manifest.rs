//! Startup-script manifest loading.
//!
//! The manifest lives at [`MANIFEST_REL_PATH`] under a policy's filesystem
//! root and lists one `[[listelement]]` table per script:
//!
//! ```toml
//! [[listelement]]
//! script = "setup.sh"
//! parameters = "-x"
//! hash = "5F2A..."
//! run_as = "admin"
//! run_once = true
//! ```
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::error::ManifestError;
use crate::policy::PolicyObject;

/// Manifest location relative to a policy object's filesystem root.
pub const MANIFEST_REL_PATH: &str = "MACHINE/VGP/VTLA/Unix/Scripts/Startup/manifest.toml";

/// One script entry as written in the manifest, before defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Script reference relative to the manifest's directory.
    pub script: String,
    /// Parameter string, if present.
    pub parameters: Option<String>,
    /// Opaque content hash of the script.
    pub hash: String,
    /// Identity to run as, if present.
    pub run_as: Option<String>,
    /// Whether the entry asks for a single immediate run.
    pub run_once: bool,
}

/// A parsed manifest together with the path it was read from.
///
/// The path matters: script references are resolved against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Location of the manifest file.
    pub path: PathBuf,
    /// Entries in manifest order.
    pub entries: Vec<ManifestEntry>,
}

/// Source of startup-script manifests for policy objects.
///
/// Implement this to read a different manifest format; the engine and the
/// reporter only depend on this trait.
pub trait ManifestSource: Send + Sync + std::fmt::Debug {
    /// Load the manifest for `policy`.
    ///
    /// Returns `Ok(None)` when the policy has no manifest at all.
    ///
    /// # Errors
    ///
    /// Returns an error when a manifest exists but cannot be read or parsed.
    fn load(&self, policy: &PolicyObject) -> Result<Option<Manifest>>;
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    listelement: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    script: String,
    #[serde(default)]
    parameters: Option<String>,
    hash: String,
    #[serde(default)]
    run_as: Option<String>,
    #[serde(default)]
    run_once: Option<toml::Value>,
}

impl From<RawEntry> for ManifestEntry {
    fn from(raw: RawEntry) -> Self {
        // Presence of the key marks a run-once script; only an explicit
        // `false` opts back out.
        let run_once = !matches!(raw.run_once, None | Some(toml::Value::Boolean(false)));
        Self {
            script: raw.script,
            parameters: raw.parameters,
            hash: raw.hash,
            run_as: raw.run_as,
            run_once,
        }
    }
}

/// Parse manifest TOML text.
///
/// # Errors
///
/// Returns [`ManifestError::Unparsable`] if `content` is not a valid manifest.
pub fn parse(path: &Path, content: &str) -> Result<Manifest, ManifestError> {
    let file: ManifestFile = toml::from_str(content).map_err(|e| ManifestError::Unparsable {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })?;
    Ok(Manifest {
        path: path.to_path_buf(),
        entries: file.listelement.into_iter().map(ManifestEntry::from).collect(),
    })
}

/// Reads `manifest.toml` from each policy's filesystem root.
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlManifestSource;

impl ManifestSource for TomlManifestSource {
    fn load(&self, policy: &PolicyObject) -> Result<Option<Manifest>> {
        let Some(root) = &policy.file_sys_path else {
            return Ok(None);
        };
        let path = root.join(MANIFEST_REL_PATH);
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        Ok(Some(parse(&path, &content)?))
    }
}
