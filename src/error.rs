//! Domain-specific error types for the reconciliation engine.
//!
//! Internal modules return typed errors (e.g., [`StoreError`], [`ApplyError`])
//! where callers need to tell failures apart, and [`anyhow::Error`] with
//! context everywhere else.  Command handlers at the CLI boundary convert
//! everything to [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! PolicyError
//! ├── Config(ConfigError)     : engine config and refresh list loading
//! ├── Manifest(ManifestError) : unsafe or unreadable policy manifests
//! ├── Store(StoreError)       : state file I/O, locking, parsing
//! └── Apply(ApplyError)       : artifact applier failures
//! ```

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the engine.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Configuration-related error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Manifest location or content error.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// State store error.
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    /// Artifact applier error.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),
}

/// Errors that arise from loading engine configuration and refresh lists.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The TOML file contains a syntax or type error.
    #[error("Invalid TOML in {path}: {message}")]
    InvalidSyntax {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// An I/O error occurred while reading a config file.
    #[error("IO error reading config file {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Errors that arise from locating or reading a policy manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The manifest path escapes its policy root.
    #[error("unsafe manifest path: {0}")]
    UnsafePath(String),

    /// A field would break out of the single line it is rendered into.
    #[error("control character in {field}: {value:?}")]
    ControlCharacter {
        /// Manifest field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// The manifest could not be parsed.
    #[error("unparsable manifest {path}: {message}")]
    Unparsable {
        /// Manifest file path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
}

/// Errors that make the state store unusable for the whole pass.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The state file could not be read, written, or locked.
    #[error("state file {path}: {source}")]
    Io {
        /// State file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The state file exists but is not valid TOML.
    #[error("state file {path} is not valid TOML: {message}")]
    Unreadable {
        /// State file path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// The in-memory state could not be serialized.
    #[error("failed to serialize state: {0}")]
    Serialize(String),

    /// A single attribute record does not have the expected shape.
    #[error("corrupt record for {guid}/{attribute}: {message}")]
    CorruptRecord {
        /// Policy object guid.
        guid: String,
        /// Attribute key.
        attribute: String,
        /// Deserializer message.
        message: String,
    },
}

/// Errors raised by an artifact applier.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// A script exited with a non-zero status.
    #[error("script '{script}' failed (exit {exit_code}): {stderr}")]
    ScriptFailed {
        /// Script that was run.
        script: String,
        /// Exit code, or -1 when terminated by a signal.
        exit_code: i32,
        /// Captured standard error output.
        stderr: String,
    },

    /// Previously written artifacts could not be removed.
    #[error("could not remove {}: {message}", display_paths(.paths))]
    RemovalFailed {
        /// Artifacts still on disk.
        paths: Vec<PathBuf>,
        /// First underlying error.
        message: String,
    },

    /// A scheduled-job file could not be created.
    #[error("failed to write job file in {dir}: {source}")]
    JobFile {
        /// Target directory.
        dir: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
