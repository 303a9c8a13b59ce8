//! Command-line entry point for gp-startup.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use gp_startup::{cli, commands, logging};

fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = cli::Cli::parse();

    let command = match &args.command {
        cli::Command::Apply(_) => "apply",
        cli::Command::Rsop(_) => "rsop",
        cli::Command::Unapply(_) => "unapply",
        cli::Command::Version => {
            commands::version::run();
            return Ok(());
        }
    };
    let report_on_stdout = matches!(args.command, cli::Command::Rsop(_));
    logging::init_subscriber(args.verbose, command, report_on_stdout);
    let log = Arc::new(logging::Logger::new(command));

    match args.command {
        cli::Command::Apply(opts) => commands::apply::run(&args.global, &opts, &log),
        cli::Command::Rsop(opts) => commands::rsop::run(&args.global, &opts, &log),
        cli::Command::Unapply(opts) => commands::unapply::run(&args.global, &opts, &log),
        cli::Command::Version => Ok(()),
    }
}
