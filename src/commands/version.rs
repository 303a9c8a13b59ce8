//! Command: print version information.

/// Version string: the release tag when built by a pipeline, else the crate
/// version.
#[must_use]
pub fn version() -> &'static str {
    option_env!("GP_STARTUP_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Print the gp-startup version to stdout.
#[allow(clippy::print_stdout)]
pub fn run() {
    println!("gp-startup {}", version());
}
