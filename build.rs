//! Build script for gp-startup.

use std::process::Command;

fn main() {
    // GP_STARTUP_VERSION wins when set by a release pipeline; local builds
    // fall back to git describe.
    if let Ok(version) = std::env::var("GP_STARTUP_VERSION") {
        println!("cargo:rustc-env=GP_STARTUP_VERSION={version}");
    } else if let Ok(output) = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        && output.status.success()
    {
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GP_STARTUP_VERSION={version}");
    }

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
    println!("cargo:rerun-if-env-changed=GP_STARTUP_VERSION");
}
