//! Immediate, single execution of a startup script.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::{ApplyArgs, ArtifactApplier};
use crate::error::ApplyError;
use crate::exec::Executor;

/// Shell used to run scripts.
const SHELL: &str = "/bin/sh";

/// Runs the script once, synchronously, and leaves no artifact behind.
///
/// The script is run as the agent's own identity; `run_as` is only
/// reported, never switched to.
#[derive(Debug, Clone)]
pub struct RunOnceApplier {
    executor: Arc<dyn Executor>,
}

impl RunOnceApplier {
    /// Create an applier that runs scripts through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

/// The shell command line that runs a script with its parameters.
fn command_line(args: &ApplyArgs) -> String {
    format!("{SHELL} {} {}", args.script_path.display(), args.parameters)
}

impl ArtifactApplier for RunOnceApplier {
    fn describe(&self, args: &ApplyArgs) -> String {
        format!("run once: {}", command_line(args).trim_end())
    }

    fn apply(&self, args: &ApplyArgs) -> Result<Vec<PathBuf>> {
        let line = command_line(args);
        let result = self
            .executor
            .run_unchecked(SHELL, &["-c", &line])
            .with_context(|| format!("running {}", args.script_path.display()))?;
        if !result.success {
            return Err(ApplyError::ScriptFailed {
                script: args.script_path.display().to_string(),
                exit_code: result.code.unwrap_or(-1),
                stderr: result.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(Vec::new())
    }
}
