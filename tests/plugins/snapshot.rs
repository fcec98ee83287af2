use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use wai::core::config::{Eviction, WaiConfig};
use wai::core::error::WaiError;
use wai::core::events::EventLog;
use wai::core::store::{MANIFEST_NAME, Store};
use wai::plugins::snapshot::{SnapshotManager, read_manifest};

fn setup(root: &Path) -> (Store, SnapshotManager) {
    let mut config = WaiConfig::default();
    config.snapshot.eviction = Eviction::Delete;
    let store = config.store(root);
    let manager = SnapshotManager::new(&store, &config);
    (store, manager)
}

fn seed(root: &Path) {
    fs::create_dir_all(root.join("js/components")).unwrap();
    fs::create_dir_all(root.join(".git")).unwrap();
    fs::write(root.join("index.html"), "<html></html>\n").unwrap();
    fs::write(root.join("js/components/App.js"), "export default 1;\n").unwrap();
    fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
}

/// Keeps consecutive capture names distinct at millisecond resolution.
fn tick() {
    thread::sleep(Duration::from_millis(5));
}

#[test]
fn capture_copies_files_and_writes_manifest() {
    let tmp = tempdir().unwrap();
    seed(tmp.path());
    let (store, manager) = setup(tmp.path());

    let report = manager.capture("before refactor", 3, 5).unwrap();
    let snap = store.snapshot_path(&report.snapshot.name);

    assert!(report.snapshot.name.ends_with("_P3_SNAP"));
    assert_eq!(report.copied, 2);
    assert!(report.previous.is_none());
    assert_eq!(
        fs::read_to_string(snap.join("js/components/App.js")).unwrap(),
        "export default 1;\n"
    );
    assert!(!snap.join(".git").exists());

    let manifest = read_manifest(&snap).unwrap().unwrap();
    assert_eq!(manifest.description, "before refactor");
    assert_eq!(manifest.prompt_index, Some(3));
    assert_eq!(
        manifest.files,
        vec!["index.html".to_string(), "js/components/App.js".to_string()]
    );
    assert!(manifest.created_at.ends_with('Z'));

    let log = fs::read_to_string(store.snapshot_log_path()).unwrap();
    assert!(log.starts_with("# WAI Snapshot Log"));
    assert!(log.contains(&report.snapshot.name));
    assert!(log.contains("before refactor"));
}

#[test]
fn snapshot_root_is_never_captured_into_itself() {
    let tmp = tempdir().unwrap();
    seed(tmp.path());
    let (_, manager) = setup(tmp.path());
    manager.capture("one", 1, 5).unwrap();
    tick();
    let second = manager.capture("two", 2, 5).unwrap();
    assert!(
        second
            .snapshot
            .files
            .iter()
            .all(|f| !f.starts_with("_snapshots/"))
    );
}

#[test]
fn retention_keeps_newest_k() {
    let tmp = tempdir().unwrap();
    seed(tmp.path());
    let (_, manager) = setup(tmp.path());
    let keep = 3;

    let mut names = Vec::new();
    for i in 1..=5u64 {
        let report = manager.capture(&format!("capture {}", i), i, keep).unwrap();
        names.push(report.snapshot.name.clone());
        let surviving = manager.list().unwrap();
        assert_eq!(surviving.len(), (i as usize).min(keep));
        tick();
    }

    let surviving: Vec<String> = manager.list().unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(surviving, names[2..].to_vec());
}

#[test]
fn previous_is_computed_after_retention() {
    let tmp = tempdir().unwrap();
    seed(tmp.path());
    let (_, manager) = setup(tmp.path());

    let a = manager.capture("a", 1, 2).unwrap();
    tick();
    let b = manager.capture("b", 2, 2).unwrap();
    assert_eq!(b.previous.as_deref(), Some(a.snapshot.name.as_str()));
    tick();
    let c = manager.capture("c", 3, 2).unwrap();
    assert_eq!(c.evicted, vec![a.snapshot.name.clone()]);
    assert_eq!(c.previous.as_deref(), Some(b.snapshot.name.as_str()));
}

#[test]
fn retention_of_one_keeps_only_the_new_capture() {
    let tmp = tempdir().unwrap();
    seed(tmp.path());
    let (_, manager) = setup(tmp.path());
    manager.capture("a", 1, 1).unwrap();
    tick();
    let b = manager.capture("b", 2, 1).unwrap();
    assert!(b.previous.is_none());
    let names: Vec<String> = manager.list().unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec![b.snapshot.name]);
}

#[test]
fn list_orders_by_recorded_time_then_legacy_name() {
    let tmp = tempdir().unwrap();
    seed(tmp.path());
    let (store, manager) = setup(tmp.path());

    // Legacy capture: name stamp only, no manifest.
    let legacy = store.snapshot_path("20200101_000000_P1_SNAP");
    fs::create_dir_all(&legacy).unwrap();
    fs::write(legacy.join("index.html"), "old").unwrap();

    let fresh = manager.capture("now", 2, 10).unwrap();
    let names: Vec<String> = manager.list().unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(
        names,
        vec!["20200101_000000_P1_SNAP".to_string(), fresh.snapshot.name]
    );
}

#[test]
fn missing_listed_file_is_skipped() {
    let tmp = tempdir().unwrap();
    seed(tmp.path());
    let (store, manager) = setup(tmp.path());
    let report = manager
        .capture_files(
            "explicit",
            4,
            5,
            vec!["index.html".to_string(), "gone.txt".to_string()],
        )
        .unwrap();
    assert_eq!(report.copied, 1);
    assert_eq!(report.skipped, vec!["gone.txt".to_string()]);
    // The manifest still records the full list it was asked for.
    let manifest = read_manifest(&store.snapshot_path(&report.snapshot.name))
        .unwrap()
        .unwrap();
    assert_eq!(manifest.files.len(), 2);
}

#[test]
fn unparsable_manifest_is_an_error() {
    let tmp = tempdir().unwrap();
    let snap = tmp.path().join("snap");
    fs::create_dir_all(&snap).unwrap();
    fs::write(snap.join(MANIFEST_NAME), "{broken").unwrap();
    assert!(matches!(
        read_manifest(&snap),
        Err(WaiError::ManifestError(_))
    ));
    assert!(read_manifest(tmp.path()).unwrap().is_none());
}

#[test]
fn capture_and_eviction_are_logged() {
    let tmp = tempdir().unwrap();
    seed(tmp.path());
    let (store, manager) = setup(tmp.path());
    manager.capture("a", 1, 1).unwrap();
    tick();
    manager.capture("b", 2, 1).unwrap();

    let ops: Vec<String> = EventLog::new(&store)
        .read_all()
        .unwrap()
        .into_iter()
        .map(|e| e.op)
        .collect();
    assert_eq!(
        ops,
        vec!["snapshot.capture", "snapshot.capture", "snapshot.evict"]
    );
}

#[test]
fn foreign_directories_survive_retention() {
    let tmp = tempdir().unwrap();
    seed(tmp.path());
    let (store, manager) = setup(tmp.path());
    let notes = store.snap_dir.join("operator_notes");
    fs::create_dir_all(&notes).unwrap();
    fs::write(notes.join("keep.md"), "do not delete\n").unwrap();

    let first = manager.capture("x", 1, 1).unwrap();
    assert!(first.evicted.is_empty());
    tick();
    let second = manager.capture("y", 2, 1).unwrap();
    assert_eq!(second.evicted, vec![first.snapshot.name]);

    assert_eq!(
        fs::read_to_string(notes.join("keep.md")).unwrap(),
        "do not delete\n"
    );
    let names: Vec<String> = manager.list().unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec![second.snapshot.name]);
}
