// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed host (policy cache, cron drop-in
// directory, state file) and a fluent builder so each integration test can
// set up an isolated environment without repeating filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gp_startup::config::EngineConfig;
use gp_startup::config::manifest::MANIFEST_REL_PATH;
use gp_startup::engine::{Context, ReconcileReport, Reconciler};
use gp_startup::exec::SystemExecutor;
use gp_startup::logging::{Log, Logger};
use gp_startup::policy::{PolicyObject, RemovedPolicy};
use gp_startup::settings;
use gp_startup::state::{FileStateStore, StateRecord, StateStore};

/// Domain every test policy object lives in.
pub const DOMAIN: &str = "example.com";

/// An isolated host backed by a [`tempfile::TempDir`].
///
/// Layout:
/// - `gpo/sysvol/<domain>/Policies/<guid>/`: policy object roots
/// - `cache/`: local script cache
/// - `cron/`: boot job drop-in directory
/// - `state.toml`: persistent State Store
pub struct IntegrationTestContext {
    /// Temporary directory containing the host layout.
    pub root: tempfile::TempDir,
    /// Engine configuration pointing into `root`.
    pub config: EngineConfig,
}

impl IntegrationTestContext {
    /// Create a new host with empty cache and cron directories.
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        let config = EngineConfig {
            cron_dir: root.path().join("cron"),
            cache_dir: root.path().join("cache"),
            state_file: root.path().join("state.toml"),
            enforce: false,
        };
        std::fs::create_dir_all(&config.cron_dir).expect("create cron dir");
        std::fs::create_dir_all(&config.cache_dir).expect("create cache dir");
        Self { root, config }
    }

    /// Filesystem root of the policy object `guid`.
    pub fn policy_root(&self, guid: &str) -> PathBuf {
        self.root
            .path()
            .join("gpo/sysvol")
            .join(DOMAIN)
            .join("Policies")
            .join(guid)
    }

    /// Write (or overwrite) the manifest of `guid` and return its policy
    /// object.
    pub fn write_manifest(&self, guid: &str, content: &str) -> PolicyObject {
        let path = self.policy_root(guid).join(MANIFEST_REL_PATH);
        std::fs::create_dir_all(path.parent().expect("manifest dir")).expect("create manifest dir");
        std::fs::write(&path, content).expect("write manifest");
        self.policy(guid)
    }

    /// Policy object for `guid` rooted in this host.
    pub fn policy(&self, guid: &str) -> PolicyObject {
        PolicyObject::new(guid, format!("Policy {guid}")).with_file_sys_path(self.policy_root(guid))
    }

    /// Local cache location of `script` as referenced by the manifest of
    /// `guid`.
    pub fn script_path(&self, guid: &str, script: &str) -> PathBuf {
        let manifest = self.policy_root(guid).join(MANIFEST_REL_PATH);
        settings::resolve_script_path(&self.config.cache_dir, &manifest, script)
            .expect("resolve script path")
    }

    /// Write a script into the local cache for `guid`.
    pub fn write_script(&self, guid: &str, script: &str, body: &str) -> PathBuf {
        let path = self.script_path(guid, script);
        std::fs::create_dir_all(path.parent().expect("script dir")).expect("create script dir");
        std::fs::write(&path, body).expect("write script");
        path
    }

    /// Visible boot job files, sorted by name.
    pub fn cron_jobs(&self) -> Vec<PathBuf> {
        let mut jobs: Vec<PathBuf> = std::fs::read_dir(&self.config.cron_dir)
            .expect("read cron dir")
            .map(|e| e.expect("dir entry").path())
            .filter(|p| {
                !p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with('.'))
            })
            .collect();
        jobs.sort();
        jobs
    }

    /// Open the State Store as a fresh process would.
    pub fn open_store(&self) -> FileStateStore {
        FileStateStore::open(&self.config.state_file).expect("open state store")
    }

    /// Stored record for one attribute, read from disk.
    pub fn record(&self, guid: &str, attribute: &str) -> Option<StateRecord> {
        self.open_store().get(guid, attribute).expect("read record")
    }

    /// Stored attribute keys for `guid`, read from disk.
    pub fn attributes(&self, guid: &str) -> Vec<String> {
        self.open_store().attributes(guid)
    }

    /// Build an engine context against this host.
    pub fn context(&self, dry_run: bool) -> Context {
        let log: Arc<dyn Log> = Arc::new(Logger::new("test"));
        Context::new(self.config.clone(), log, dry_run, Arc::new(SystemExecutor))
    }

    /// Run one reconciliation pass with a freshly opened State Store.
    pub fn reconcile(&self, removed: &[RemovedPolicy], current: &[PolicyObject]) -> ReconcileReport {
        self.reconcile_with(false, removed, current)
    }

    /// Run one reconciliation pass, optionally as a dry run.
    pub fn reconcile_with(
        &self,
        dry_run: bool,
        removed: &[RemovedPolicy],
        current: &[PolicyObject],
    ) -> ReconcileReport {
        let ctx = self.context(dry_run);
        let mut store = self.open_store();
        Reconciler::new(&ctx, &mut store)
            .reconcile(removed, current)
            .expect("reconcile")
    }

    /// Path of a file in the temp root, for scripts to leave markers in.
    pub fn marker(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }
}

/// Fluent builder for [`IntegrationTestContext`].
///
/// Allows individual tests to customise the host before the context is
/// finalised without modifying the shared setup.
pub struct TestContextBuilder {
    ctx: IntegrationTestContext,
}

impl TestContextBuilder {
    /// Begin building a new host.
    pub fn new() -> Self {
        Self {
            ctx: IntegrationTestContext::new(),
        }
    }

    /// Turn enforce mode on.
    pub fn enforce(mut self) -> Self {
        self.ctx.config.enforce = true;
        self
    }

    /// Use a cache directory at `relative` inside the temp root.
    pub fn cache_dir(mut self, relative: &str) -> Self {
        let dir = self.ctx.root.path().join(relative);
        std::fs::create_dir_all(&dir).expect("create cache dir");
        self.ctx.config.cache_dir = dir;
        self
    }

    /// Finalise and return the context.
    pub fn build(self) -> IntegrationTestContext {
        self.ctx
    }
}

/// Read a file to a string.
pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).expect("read file")
}
