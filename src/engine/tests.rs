use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::*;
use crate::appliers::test_helpers::RecordingApplier;
use crate::config::manifest::{Manifest, ManifestEntry};
use crate::exec::test_helpers::RecordingExecutor;
use crate::logging::isolated_logger;
use crate::operations::MockFileSystemOps;
use crate::state::MemoryStateStore;

const MANIFEST_PATH: &str = "/gpo/sysvol/example.com/Policies/{A}/MACHINE/VGP/VTLA/Unix/Scripts/Startup/manifest.toml";

/// Manifest source backed by a map from guid to manifest.
#[derive(Debug, Default)]
struct FakeSource {
    manifests: HashMap<String, Manifest>,
    broken: HashSet<String>,
}

impl FakeSource {
    fn with(mut self, guid: &str, entries: Vec<ManifestEntry>) -> Self {
        self.manifests.insert(
            guid.to_string(),
            Manifest {
                path: PathBuf::from(MANIFEST_PATH),
                entries,
            },
        );
        self
    }

    fn with_broken(mut self, guid: &str) -> Self {
        self.broken.insert(guid.to_string());
        self
    }
}

impl ManifestSource for FakeSource {
    fn load(&self, policy: &PolicyObject) -> anyhow::Result<Option<Manifest>> {
        if self.broken.contains(&policy.guid) {
            anyhow::bail!("unparsable manifest");
        }
        Ok(self.manifests.get(&policy.guid).cloned())
    }
}

fn entry(script: &str, hash: &str) -> ManifestEntry {
    ManifestEntry {
        script: script.to_string(),
        parameters: None,
        hash: hash.to_string(),
        run_as: None,
        run_once: false,
    }
}

fn once(script: &str, hash: &str) -> ManifestEntry {
    ManifestEntry {
        run_once: true,
        ..entry(script, hash)
    }
}

struct Harness {
    ctx: Context,
    run_once: Arc<RecordingApplier>,
    scheduled: Arc<RecordingApplier>,
    _tmp: tempfile::TempDir,
    _guard: tracing::dispatcher::DefaultGuard,
}

impl Harness {
    fn new(source: FakeSource) -> Self {
        Self::build(
            source,
            Arc::new(RecordingApplier::producing_files()),
            Arc::new(MockFileSystemOps::new()),
            false,
            false,
        )
    }

    fn build(
        source: FakeSource,
        scheduled: Arc<RecordingApplier>,
        fs_ops: Arc<dyn FileSystemOps>,
        dry_run: bool,
        enforce: bool,
    ) -> Self {
        let (log, tmp, guard) = isolated_logger();
        let run_once = Arc::new(RecordingApplier::without_files());
        let config = EngineConfig {
            cache_dir: PathBuf::from("/cache"),
            enforce,
            ..EngineConfig::default()
        };
        let ctx = Context::new(
            config,
            Arc::new(log),
            dry_run,
            Arc::new(RecordingExecutor::succeeding()),
        )
        .with_appliers(Appliers::new(run_once.clone(), scheduled.clone()))
        .with_source(Arc::new(source))
        .with_fs_ops(fs_ops);
        Self {
            ctx,
            run_once,
            scheduled,
            _tmp: tmp,
            _guard: guard,
        }
    }

    fn pass(&self, store: &mut MemoryStateStore, current: &[PolicyObject]) -> ReconcileReport {
        Reconciler::new(&self.ctx, store)
            .reconcile(&[], current)
            .unwrap()
    }
}

fn policy(guid: &str) -> PolicyObject {
    PolicyObject::new(guid, format!("policy {guid}")).with_file_sys_path("/gpo")
}

fn record_of(store: &MemoryStateStore, guid: &str) -> Vec<StateRecord> {
    store
        .attributes(guid)
        .iter()
        .map(|a| store.get(guid, a).unwrap().unwrap())
        .collect()
}

#[test]
fn first_pass_applies_and_records() {
    let h = Harness::new(FakeSource::default().with("{A}", vec![entry("s.sh", "H1")]));
    let mut store = MemoryStateStore::new();

    let report = h.pass(&mut store, &[policy("{A}")]);

    assert_eq!(report.applied, 1);
    assert!(report.is_success());
    assert_eq!(h.scheduled.calls().len(), 1);
    let records = record_of(&store, "{A}");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].last_hash, "H1");
    assert_eq!(records[0].artifact_paths, vec![PathBuf::from("/jobs/gp_1")]);
}

#[test]
fn second_identical_pass_is_a_no_op() {
    let h = Harness::build(
        FakeSource::default().with("{A}", vec![entry("s.sh", "H1")]),
        Arc::new(RecordingApplier::producing_files()),
        Arc::new(MockFileSystemOps::new().with_file("/jobs/gp_1")),
        false,
        false,
    );
    let mut store = MemoryStateStore::new();

    h.pass(&mut store, &[policy("{A}")]);
    let commits = store.commits();
    let report = h.pass(&mut store, &[policy("{A}")]);

    assert_eq!(report.applied, 0);
    assert_eq!(report.unchanged, 1);
    assert_eq!(h.scheduled.calls().len(), 1);
    assert_eq!(store.commits(), commits);
}

#[test]
fn hash_change_replaces_artifact() {
    let fs = Arc::new(MockFileSystemOps::new().with_file("/jobs/gp_1"));
    let scheduled = Arc::new(RecordingApplier::producing_files());
    let h1 = Harness::build(
        FakeSource::default().with("{A}", vec![entry("s.sh", "H1")]),
        scheduled.clone(),
        fs.clone(),
        false,
        false,
    );
    let mut store = MemoryStateStore::new();
    h1.pass(&mut store, &[policy("{A}")]);
    drop(h1);

    let h2 = Harness::build(
        FakeSource::default().with("{A}", vec![entry("s.sh", "H2")]),
        scheduled.clone(),
        fs.clone(),
        false,
        false,
    );
    let report = h2.pass(&mut store, &[policy("{A}")]);

    assert_eq!(report.applied, 1);
    assert_eq!(scheduled.calls().len(), 2);
    assert!(!fs.exists(Path::new("/jobs/gp_1")), "old artifact removed");
    let records = record_of(&store, "{A}");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].last_hash, "H2");
    assert_eq!(records[0].artifact_paths, vec![PathBuf::from("/jobs/gp_2")]);
}

#[test]
fn dropped_setting_is_cleaned() {
    let fs = Arc::new(
        MockFileSystemOps::new()
            .with_file("/jobs/gp_1")
            .with_file("/jobs/gp_2"),
    );
    let h1 = Harness::build(
        FakeSource::default().with("{A}", vec![entry("a.sh", "H1"), entry("b.sh", "H1")]),
        Arc::new(RecordingApplier::producing_files()),
        fs.clone(),
        false,
        false,
    );
    let mut store = MemoryStateStore::new();
    h1.pass(&mut store, &[policy("{A}")]);
    assert_eq!(store.attributes("{A}").len(), 2);
    drop(h1);

    let h2 = Harness::build(
        FakeSource::default().with("{A}", vec![entry("a.sh", "H1")]),
        Arc::new(RecordingApplier::producing_files()),
        fs.clone(),
        false,
        false,
    );
    let report = h2.pass(&mut store, &[policy("{A}")]);

    assert_eq!(report.unchanged, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(store.attributes("{A}").len(), 1);
    assert!(fs.exists(Path::new("/jobs/gp_1")));
    assert!(!fs.exists(Path::new("/jobs/gp_2")));
}

#[test]
fn removed_policy_is_unapplied_completely() {
    let fs = Arc::new(MockFileSystemOps::new().with_file("/jobs/gp_1"));
    let h = Harness::build(
        FakeSource::default().with("{A}", vec![entry("s.sh", "H1"), once("o.sh", "H1")]),
        Arc::new(RecordingApplier::producing_files()),
        fs.clone(),
        false,
        false,
    );
    let mut store = MemoryStateStore::new();
    h.pass(&mut store, &[policy("{A}")]);
    assert_eq!(store.attributes("{A}").len(), 2);

    let report = Reconciler::new(&h.ctx, &mut store)
        .reconcile(&[RemovedPolicy::new(policy("{A}"))], &[])
        .unwrap();

    assert_eq!(report.removed, 2);
    assert!(store.attributes("{A}").is_empty());
    assert!(!fs.exists(Path::new("/jobs/gp_1")));
}

#[test]
fn removed_policy_uses_caller_records() {
    let fs = Arc::new(MockFileSystemOps::new().with_file("/etc/cron.d/gp_old"));
    let h = Harness::build(
        FakeSource::default(),
        Arc::new(RecordingApplier::producing_files()),
        fs.clone(),
        false,
        false,
    );
    let mut store = MemoryStateStore::new();
    let mut gone = RemovedPolicy::new(policy("{B}"));
    gone.recorded.insert(
        "k".to_string(),
        StateRecord::new("H", vec![PathBuf::from("/etc/cron.d/gp_old")]),
    );

    let report = Reconciler::new(&h.ctx, &mut store)
        .reconcile(&[gone], &[])
        .unwrap();

    assert_eq!(report.removed, 1);
    assert!(!fs.exists(Path::new("/etc/cron.d/gp_old")));
}

#[test]
fn missing_artifact_on_unapply_is_success() {
    let h = Harness::new(FakeSource::default());
    let mut store = MemoryStateStore::new();
    store
        .set(
            "{A}",
            "k",
            &StateRecord::new("H", vec![PathBuf::from("/jobs/vanished")]),
        )
        .unwrap();

    let outcome = Reconciler::new(&h.ctx, &mut store)
        .unapply("{A}", "k", None)
        .unwrap();

    assert_eq!(outcome, AttributeOutcome::Removed);
    assert!(store.attributes("{A}").is_empty());
}

#[test]
fn locked_artifact_keeps_record_and_reports_failure() {
    let fs = Arc::new(
        MockFileSystemOps::new()
            .with_file("/jobs/free")
            .with_locked("/jobs/locked"),
    );
    let h = Harness::build(
        FakeSource::default(),
        Arc::new(RecordingApplier::producing_files()),
        fs.clone(),
        false,
        false,
    );
    let mut store = MemoryStateStore::new();
    store
        .set(
            "{A}",
            "k",
            &StateRecord::new(
                "H",
                vec![PathBuf::from("/jobs/free"), PathBuf::from("/jobs/locked")],
            ),
        )
        .unwrap();

    let mut reconciler = Reconciler::new(&h.ctx, &mut store);
    let outcome = reconciler.unapply("{A}", "k", None).unwrap();
    let report = reconciler.into_report();

    assert_eq!(outcome, AttributeOutcome::Failed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].operation, Operation::Unapply);
    let record = store.get("{A}", "k").unwrap().unwrap();
    assert_eq!(record.artifact_paths, vec![PathBuf::from("/jobs/locked")]);
    assert!(!fs.exists(Path::new("/jobs/free")));
}

#[test]
fn stale_artifact_is_retried_until_removed() {
    let fs = Arc::new(
        MockFileSystemOps::new()
            .with_file("/jobs/gp_1")
            .with_locked("/jobs/old"),
    );
    let h = Harness::build(
        FakeSource::default().with("{A}", vec![entry("s.sh", "H1")]),
        Arc::new(RecordingApplier::producing_files()),
        fs.clone(),
        false,
        false,
    );
    let key = settings::extract(
        &Manifest {
            path: PathBuf::from(MANIFEST_PATH),
            entries: vec![entry("s.sh", "H1")],
        },
        Path::new("/cache"),
    )
    .unwrap()[0]
        .attribute_key
        .clone();
    let mut store = MemoryStateStore::new();
    store
        .set("{A}", &key, &StateRecord::new("H0", vec![PathBuf::from("/jobs/old")]))
        .unwrap();

    let first = h.pass(&mut store, &[policy("{A}")]);
    assert_eq!(first.failures.len(), 1);
    let record = store.get("{A}", &key).unwrap().unwrap();
    assert_eq!(record.last_hash, "H1");
    assert_eq!(record.artifact_paths, vec![PathBuf::from("/jobs/gp_1")]);
    assert_eq!(record.pending_removal, vec![PathBuf::from("/jobs/old")]);

    let second = h.pass(&mut store, &[policy("{A}")]);
    assert_eq!(second.failures.len(), 1, "still failing while the job remains");
    assert_eq!(second.unchanged, 0);
    assert_eq!(h.scheduled.calls().len(), 1, "no re-apply for a matching hash");

    fs.unlock(Path::new("/jobs/old"));
    let third = h.pass(&mut store, &[policy("{A}")]);
    assert!(third.is_success());
    assert_eq!(third.unchanged, 1);
    assert!(!fs.exists(Path::new("/jobs/old")));
    assert!(store.get("{A}", &key).unwrap().unwrap().pending_removal.is_empty());
}

#[test]
fn unapply_also_removes_stale_artifacts() {
    let fs = Arc::new(
        MockFileSystemOps::new()
            .with_file("/jobs/new")
            .with_file("/jobs/old"),
    );
    let h = Harness::build(
        FakeSource::default(),
        Arc::new(RecordingApplier::producing_files()),
        fs.clone(),
        false,
        false,
    );
    let mut record = StateRecord::new("H", vec![PathBuf::from("/jobs/new")]);
    record.pending_removal = vec![PathBuf::from("/jobs/old")];
    let mut store = MemoryStateStore::new();
    store.set("{A}", "k", &record).unwrap();

    let outcome = Reconciler::new(&h.ctx, &mut store)
        .unapply("{A}", "k", None)
        .unwrap();

    assert_eq!(outcome, AttributeOutcome::Removed);
    assert!(!fs.exists(Path::new("/jobs/new")));
    assert!(!fs.exists(Path::new("/jobs/old")));
}

#[test]
fn run_once_script_runs_only_once() {
    let h = Harness::new(FakeSource::default().with("{A}", vec![once("o.sh", "H1")]));
    let mut store = MemoryStateStore::new();

    h.pass(&mut store, &[policy("{A}")]);
    h.pass(&mut store, &[policy("{A}")]);

    assert_eq!(h.run_once.calls().len(), 1);
    assert!(h.scheduled.calls().is_empty());
    assert!(record_of(&store, "{A}")[0].artifact_paths.is_empty());
}

#[test]
fn lost_store_reruns_run_once_scripts() {
    let h = Harness::new(FakeSource::default().with("{A}", vec![once("o.sh", "H1")]));

    h.pass(&mut MemoryStateStore::new(), &[policy("{A}")]);
    h.pass(&mut MemoryStateStore::new(), &[policy("{A}")]);

    assert_eq!(h.run_once.calls().len(), 2);
}

#[test]
fn missing_manifest_skips_policy_without_cleanup() {
    let h = Harness::new(FakeSource::default());
    let mut store = MemoryStateStore::new();
    store.set("{A}", "k", &StateRecord::new("H", vec![])).unwrap();

    let report = h.pass(&mut store, &[policy("{A}")]);

    assert_eq!(report.skipped_policies, 1);
    assert_eq!(store.attributes("{A}"), vec!["k"]);
}

#[test]
fn broken_manifest_skips_policy() {
    let h = Harness::new(
        FakeSource::default()
            .with_broken("{A}")
            .with("{B}", vec![entry("s.sh", "H1")]),
    );
    let mut store = MemoryStateStore::new();

    let report = h.pass(&mut store, &[policy("{A}"), policy("{B}")]);

    assert_eq!(report.skipped_policies, 1);
    assert_eq!(report.applied, 1);
    assert!(report.is_success());
}

#[test]
fn unsafe_manifest_path_skips_policy() {
    let h = Harness::new(
        FakeSource::default().with("{A}", vec![entry("../../etc/passwd", "H1")]),
    );
    let mut store = MemoryStateStore::new();

    let report = h.pass(&mut store, &[policy("{A}")]);

    assert_eq!(report.skipped_policies, 1);
    assert!(h.scheduled.calls().is_empty());
}

#[test]
fn applier_failure_is_isolated() {
    let h = Harness::build(
        FakeSource::default()
            .with("{A}", vec![entry("s.sh", "H1")])
            .with("{B}", vec![once("o.sh", "H1")]),
        Arc::new(RecordingApplier::failing()),
        Arc::new(MockFileSystemOps::new()),
        false,
        false,
    );
    let mut store = MemoryStateStore::new();

    let report = h.pass(&mut store, &[policy("{A}"), policy("{B}")]);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].guid, "{A}");
    assert_eq!(report.failures[0].operation, Operation::Apply);
    assert_eq!(report.applied, 1);
    assert!(store.attributes("{A}").is_empty(), "no record after failure");
    assert_eq!(store.attributes("{B}").len(), 1);
}

#[test]
fn failed_update_keeps_previous_record() {
    let fs = Arc::new(MockFileSystemOps::new().with_file("/jobs/gp_1"));
    let h1 = Harness::build(
        FakeSource::default().with("{A}", vec![entry("s.sh", "H1")]),
        Arc::new(RecordingApplier::producing_files()),
        fs.clone(),
        false,
        false,
    );
    let mut store = MemoryStateStore::new();
    h1.pass(&mut store, &[policy("{A}")]);
    drop(h1);

    let h2 = Harness::build(
        FakeSource::default().with("{A}", vec![entry("s.sh", "H2")]),
        Arc::new(RecordingApplier::failing()),
        fs.clone(),
        false,
        false,
    );
    let report = h2.pass(&mut store, &[policy("{A}")]);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(record_of(&store, "{A}")[0].last_hash, "H1");
    assert!(fs.exists(Path::new("/jobs/gp_1")));
}

#[test]
fn missing_artifact_triggers_reapply() {
    let h = Harness::new(FakeSource::default().with("{A}", vec![entry("s.sh", "H1")]));
    let mut store = MemoryStateStore::new();

    // The mock filesystem never contains the fabricated artifact
    h.pass(&mut store, &[policy("{A}")]);
    let report = h.pass(&mut store, &[policy("{A}")]);

    assert_eq!(report.applied, 1);
    assert_eq!(h.scheduled.calls().len(), 2);
}

#[test]
fn enforce_mode_reapplies_current_settings() {
    let h = Harness::build(
        FakeSource::default().with("{A}", vec![once("o.sh", "H1")]),
        Arc::new(RecordingApplier::producing_files()),
        Arc::new(MockFileSystemOps::new()),
        false,
        true,
    );
    let mut store = MemoryStateStore::new();

    h.pass(&mut store, &[policy("{A}")]);
    h.pass(&mut store, &[policy("{A}")]);

    assert_eq!(h.run_once.calls().len(), 2);
}

#[test]
fn dry_run_changes_nothing() {
    let fs = Arc::new(MockFileSystemOps::new().with_file("/jobs/stale"));
    let h = Harness::build(
        FakeSource::default().with("{A}", vec![entry("s.sh", "H1")]),
        Arc::new(RecordingApplier::producing_files()),
        fs.clone(),
        true,
        false,
    );
    let mut store = MemoryStateStore::new();
    store
        .set("{A}", "stale", &StateRecord::new("H0", vec![PathBuf::from("/jobs/stale")]))
        .unwrap();

    let report = h.pass(&mut store, &[policy("{A}")]);

    assert_eq!(report.applied, 1);
    assert_eq!(report.removed, 1);
    assert!(h.scheduled.calls().is_empty());
    assert!(fs.exists(Path::new("/jobs/stale")));
    assert_eq!(store.attributes("{A}"), vec!["stale"]);
    assert_eq!(store.commits(), 0);
}

#[test]
fn corrupt_record_is_treated_as_absent() {
    let h = Harness::new(FakeSource::default().with("{A}", vec![once("o.sh", "H1")]));
    let mut store = MemoryStateStore::new();
    let key = settings::attribute_key(
        &settings::resolve_script_path(Path::new("/cache"), Path::new(MANIFEST_PATH), "o.sh")
            .unwrap(),
        "",
    );
    store.insert_raw("{A}", &key, toml::Value::String("garbage".to_string()));

    let report = h.pass(&mut store, &[policy("{A}")]);

    assert_eq!(report.applied, 1);
    assert_eq!(h.run_once.calls().len(), 1);
    assert_eq!(store.get("{A}", &key).unwrap().unwrap().last_hash, "H1");
}

#[test]
fn clean_with_remove_set_targets_only_listed() {
    let h = Harness::new(FakeSource::default());
    let mut store = MemoryStateStore::new();
    for key in ["a", "b", "c"] {
        store.set("{A}", key, &StateRecord::new("H", vec![])).unwrap();
    }

    let removed = Reconciler::new(&h.ctx, &mut store)
        .clean(
            "{A}",
            &CleanFilter::Remove(["b".to_string(), "zzz".to_string()].into()),
        )
        .unwrap();

    assert_eq!(removed, vec!["b"]);
    assert_eq!(store.attributes("{A}"), vec!["a", "c"]);
}

#[test]
fn clean_with_keep_set_removes_the_rest() {
    let h = Harness::new(FakeSource::default());
    let mut store = MemoryStateStore::new();
    for key in ["a", "b", "c"] {
        store.set("{A}", key, &StateRecord::new("H", vec![])).unwrap();
    }

    Reconciler::new(&h.ctx, &mut store)
        .clean("{A}", &CleanFilter::Keep(["a".to_string()].into()))
        .unwrap();

    assert_eq!(store.attributes("{A}"), vec!["a"]);
}

#[test]
fn policy_outcomes_are_recorded() {
    let (log, _tmp, _guard) = isolated_logger();
    let log = Arc::new(log);
    let ctx = Context::new(
        EngineConfig::default(),
        log.clone(),
        false,
        Arc::new(RecordingExecutor::succeeding()),
    )
    .with_appliers(Appliers::new(
        Arc::new(RecordingApplier::without_files()),
        Arc::new(RecordingApplier::producing_files()),
    ))
    .with_source(Arc::new(
        FakeSource::default().with("{A}", vec![entry("s.sh", "H1")]),
    ))
    .with_fs_ops(Arc::new(MockFileSystemOps::new()));
    let mut store = MemoryStateStore::new();

    Reconciler::new(&ctx, &mut store)
        .reconcile(
            &[RemovedPolicy::new(policy("{Z}"))],
            &[policy("{A}"), policy("{B}")],
        )
        .unwrap();

    let outcomes: BTreeMap<String, OutcomeStatus> = log
        .outcomes()
        .into_iter()
        .map(|o| (o.name, o.status))
        .collect();
    assert_eq!(outcomes["policy {Z}"], OutcomeStatus::Removed);
    assert_eq!(outcomes["policy {A}"], OutcomeStatus::Ok);
    assert_eq!(outcomes["policy {B}"], OutcomeStatus::NotApplicable);
}
