//! Rsop command implementation.
use anyhow::Result;

use crate::cli::{GlobalOpts, RsopOpts};
use crate::config::manifest::TomlManifestSource;
use crate::logging::Logger;
use crate::policy::PolicyObject;
use crate::rsop::compute_effective;

/// Run the rsop command: print what one policy object asks of this host.
///
/// The report goes to stdout, one `label` line followed by indented
/// settings. All logging for this command goes to stderr, so stdout holds
/// nothing but the report.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the manifest
/// exists but cannot be read, parsed, or resolved safely.
#[allow(clippy::print_stdout)]
pub fn run(global: &GlobalOpts, opts: &RsopOpts, log: &Logger) -> Result<()> {
    let setup = super::CommandSetup::init(global, log)?;
    let policy =
        PolicyObject::new(opts.guid.as_str(), opts.name.as_str()).with_file_sys_path(&opts.path);

    let effective = compute_effective(&policy, &TomlManifestSource, &setup.config)?;
    if effective.is_empty() {
        log.info(&format!("{}: no startup scripts", policy.label()));
        return Ok(());
    }
    for (label, lines) in &effective {
        println!("{label}");
        for line in lines {
            println!("    {line}");
        }
    }
    Ok(())
}
