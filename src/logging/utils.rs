//! Log file location, rotation, ANSI stripping, and timestamps.
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the log directory.
pub(super) const LOG_DIR_ENV: &str = "GP_STARTUP_LOG_DIR";

/// A command's log is rotated to `<command>.log.1` once it grows past this.
pub(super) const MAX_LOG_BYTES: u64 = 1024 * 1024;

/// Strip ANSI escape sequences from a string.
///
/// Handles SGR sequences (ending in `m`) and other CSI sequences (ending
/// in any letter in the `@`..`~` range).
pub(super) fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            out.push(c);
            continue;
        }
        if chars.next() == Some('[') {
            for inner in chars.by_ref() {
                if ('@'..='~').contains(&inner) {
                    break;
                }
            }
        }
    }
    out
}

/// Directory the per-command logs live in, created if needed.
///
/// `$GP_STARTUP_LOG_DIR` wins; otherwise `$XDG_CACHE_HOME/gp-startup`, then
/// `$HOME/.cache/gp-startup`. Returns `None` when none of them is set or the
/// directory cannot be created, in which case only the console is logged to.
pub(super) fn log_dir() -> Option<PathBuf> {
    let dir = if let Some(dir) = std::env::var_os(LOG_DIR_ENV) {
        PathBuf::from(dir)
    } else if let Some(cache) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(cache).join("gp-startup")
    } else {
        PathBuf::from(std::env::var_os("HOME")?)
            .join(".cache")
            .join("gp-startup")
    };
    fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Return the log file path for `command`.
pub(super) fn log_file_path(command: &str) -> Option<PathBuf> {
    Some(log_dir()?.join(format!("{command}.log")))
}

/// Move `path` aside to `<path>.1` when it is larger than `limit` bytes.
///
/// Passes append to their command's log, so without this a host that
/// refreshes policy all day would grow the file without bound.
pub(super) fn rotate_if_large(path: &Path, limit: u64) -> std::io::Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > limit => {
            let mut rotated = path.as_os_str().to_owned();
            rotated.push(".1");
            fs::rename(path, rotated)
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Format the current UTC time as `YYYY-MM-DD HH:MM:SS`.
pub(super) fn format_utc_datetime() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format the current UTC time as `HH:MM:SS`.
pub(super) fn format_utc_time() -> String {
    chrono::Utc::now().format("%H:%M:%S").to_string()
}
