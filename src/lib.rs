//! Startup-script policy engine.
//!
//! Reconciles the startup scripts requested by centrally managed policy
//! objects with the host: scripts marked run-once are executed immediately
//! and exactly once, the rest become `@reboot` jobs in a cron drop-in
//! directory. A persistent State Store remembers what every setting produced
//! so that changed, removed, or drifted settings can be undone precisely.
//!
//! The public API is organised into layers:
//!
//! - **[`config`]**: engine settings, refresh lists, and policy manifests
//! - **[`settings`]**: manifest entries turned into attribute-keyed settings
//! - **[`appliers`]**: the side effects of one setting (run now, or schedule)
//! - **[`state`]**: what each attribute produced, persisted across runs
//! - **[`engine`]**: the apply / unapply / clean / reconcile pass
//! - **[`rsop`]**: the effective settings of a policy object, for reporting
//! - **[`commands`]**: top-level subcommand orchestration
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod appliers;
pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod logging;
pub mod operations;
pub mod policy;
pub mod rsop;
pub mod settings;
pub mod state;
