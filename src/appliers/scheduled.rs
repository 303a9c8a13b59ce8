//! Boot-time execution through a cron drop-in file.
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Result;

use super::{ApplyArgs, ArtifactApplier};
use crate::error::ApplyError;

/// Fixed preamble of every generated job file.
pub const JOB_HEADER: &str = "
### autogenerated by gp-startup
#
# This file is generated by the Startup Scripts policy extension.
# To modify the contents of this file, modify the appropriate
# policy objects which apply to this machine. DO NOT MODIFY THIS
# FILE DIRECTLY.
#

";

/// Prefix of visible job files.
pub const JOB_PREFIX: &str = "gp_";

/// Mode of written job files.
const JOB_MODE: u32 = 0o700;

/// Attempts at finding a free visible name before giving up.
const NAME_ATTEMPTS: usize = 8;

/// Render the cron entry for a boot-time script.
///
/// The parameter field is always present, so an empty parameter string
/// leaves a trailing space.
#[must_use]
pub fn cron_entry(run_as: &str, script_path: &Path, parameters: &str) -> String {
    format!("@reboot {run_as} {} {parameters}", script_path.display())
}

/// Writes one uniquely named `@reboot` job file per apply.
#[derive(Debug, Clone)]
pub struct ScheduledApplier {
    cron_dir: PathBuf,
}

impl ScheduledApplier {
    /// Create an applier that writes job files into `cron_dir`.
    #[must_use]
    pub fn new(cron_dir: impl Into<PathBuf>) -> Self {
        Self {
            cron_dir: cron_dir.into(),
        }
    }

    fn job_error(&self, source: std::io::Error) -> ApplyError {
        ApplyError::JobFile {
            dir: self.cron_dir.clone(),
            source,
        }
    }

    /// Write `content` to a hidden temporary file, then move it to a fresh
    /// visible name without overwriting anything.
    fn write_job(&self, content: &str) -> Result<PathBuf, ApplyError> {
        let mut last_err = None;
        for _ in 0..NAME_ATTEMPTS {
            let mut tmp = tempfile::Builder::new()
                .prefix(&format!(".{JOB_PREFIX}"))
                .tempfile_in(&self.cron_dir)
                .map_err(|e| self.job_error(e))?;
            tmp.write_all(content.as_bytes())
                .map_err(|e| self.job_error(e))?;
            set_job_mode(tmp.as_file()).map_err(|e| self.job_error(e))?;
            tmp.as_file().sync_all().map_err(|e| self.job_error(e))?;

            let visible = tmp
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().trim_start_matches('.').to_string())
                .ok_or_else(|| self.job_error(std::io::Error::other("unnamed temp file")))?;
            let target = self.cron_dir.join(visible);

            match tmp.persist_noclobber(&target) {
                Ok(_) => return Ok(target),
                // The temp file is dropped (and deleted) with the error
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                    last_err = Some(e.error);
                }
                Err(e) => return Err(self.job_error(e.error)),
            }
        }
        Err(self.job_error(last_err.unwrap_or_else(|| {
            std::io::Error::from(std::io::ErrorKind::AlreadyExists)
        })))
    }
}

#[cfg(unix)]
fn set_job_mode(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    file.set_permissions(std::fs::Permissions::from_mode(JOB_MODE))
}

#[cfg(not(unix))]
fn set_job_mode(_file: &std::fs::File) -> std::io::Result<()> {
    let _ = JOB_MODE;
    Ok(())
}

impl ArtifactApplier for ScheduledApplier {
    fn describe(&self, args: &ApplyArgs) -> String {
        format!(
            "schedule in {}: {}",
            self.cron_dir.display(),
            cron_entry(&args.run_as, &args.script_path, &args.parameters).trim_end()
        )
    }

    fn apply(&self, args: &ApplyArgs) -> Result<Vec<PathBuf>> {
        let content = format!(
            "{JOB_HEADER}{}\n",
            cron_entry(&args.run_as, &args.script_path, &args.parameters)
        );
        let path = self.write_job(&content)?;
        Ok(vec![path])
    }
}
