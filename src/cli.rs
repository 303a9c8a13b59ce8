//! Command-line interface definitions.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{ConfigOverrides, DEFAULT_CONFIG_PATH};

/// Top-level CLI entry point for the startup-script policy engine.
#[derive(Parser, Debug)]
#[command(
    name = "gp-startup",
    about = "Reconcile startup-script policies with this host",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Options shared across all subcommands.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// Engine configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override the state file location
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Override the directory boot jobs are written to
    #[arg(long, global = true)]
    pub cron_dir: Option<PathBuf>,

    /// Override the local policy file cache
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Preview changes without applying
    #[arg(short = 'd', long, global = true)]
    pub dry_run: bool,

    /// Re-apply every setting, ignoring recorded hashes
    #[arg(long, global = true)]
    pub enforce: bool,
}

impl GlobalOpts {
    /// Command-line overrides for the engine configuration.
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            cron_dir: self.cron_dir.clone(),
            cache_dir: self.cache_dir.clone(),
            state_file: self.state.clone(),
            enforce: self.enforce,
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a reconciliation pass from a refresh list
    Apply(ApplyOpts),
    /// Print the effective startup scripts of one policy object
    Rsop(RsopOpts),
    /// Remove everything recorded for the given policy objects
    Unapply(UnapplyOpts),
    /// Print version information
    Version,
}

/// Options for the `apply` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ApplyOpts {
    /// TOML file listing current and removed policy objects
    pub refresh_list: PathBuf,
}

/// Options for the `rsop` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct RsopOpts {
    /// Policy object guid
    pub guid: String,
    /// Policy object display name
    pub name: String,
    /// Local root of the policy object's files
    pub path: PathBuf,
}

/// Options for the `unapply` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct UnapplyOpts {
    /// Guids of the policy objects to remove
    #[arg(required = true)]
    pub guids: Vec<String>,
}
