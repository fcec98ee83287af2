use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::tempdir;
use wai::core::config::{Eviction, WaiConfig};
use wai::core::error::WaiError;
use wai::core::prompt::PromptIdAllocator;
use wai::core::store::Store;
use wai::core::vcs::NullVcs;
use wai::plugins::snapshot::{SnapshotManager, read_manifest};
use wai::plugins::update::UpdateOutcome;
use wai::plugins::watcher::{PayloadSource, PayloadWatcher, WatchSummary, install_shutdown_flag};

/// Hands out scripted reads, then raises the shutdown flag.
struct ScriptedSource {
    reads: VecDeque<Result<String, WaiError>>,
    shutdown: Arc<AtomicBool>,
    calls: usize,
}

impl ScriptedSource {
    fn new(reads: Vec<Result<String, WaiError>>, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            reads: reads.into(),
            shutdown,
            calls: 0,
        }
    }
}

impl PayloadSource for ScriptedSource {
    fn read(&mut self) -> Result<String, WaiError> {
        self.calls += 1;
        match self.reads.pop_front() {
            Some(next) => {
                if self.reads.is_empty() {
                    self.shutdown.store(true, Ordering::SeqCst);
                }
                next
            }
            None => {
                self.shutdown.store(true, Ordering::SeqCst);
                Ok(String::new())
            }
        }
    }
}

fn fast_config() -> WaiConfig {
    let mut config = WaiConfig::default();
    config.snapshot.eviction = Eviction::Delete;
    config.watch.poll_interval_ms = 5;
    config.watch.error_backoff_ms = 5;
    config.lock.retry_ms = 2;
    config
}

fn ok(text: &str) -> Result<String, WaiError> {
    Ok(text.to_string())
}

fn run_script(root: &std::path::Path, reads: Vec<Result<String, WaiError>>) -> WatchSummary {
    let config = fast_config();
    let store = config.store(root);
    let watcher = PayloadWatcher::new(&store, &config, Box::new(NullVcs));
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut source = ScriptedSource::new(reads, Arc::clone(&shutdown));
    watcher.run(&mut source, &shutdown).unwrap()
}

fn last_id(store: &Store) -> u64 {
    PromptIdAllocator::new(store, std::time::Duration::from_millis(2))
        .current()
        .unwrap()
        .last_id
}

#[test]
fn repeated_payload_is_dispatched_once() {
    let tmp = tempdir().unwrap();
    let payload = "### [WAI:UPDATE:notes.md]\n# Notes\n";
    let summary = run_script(tmp.path(), vec![ok(payload), ok(payload), ok(payload)]);

    assert_eq!(
        summary,
        WatchSummary {
            payloads_seen: 1,
            update_batches: 1,
            snapshots: 0,
        }
    );
    assert_eq!(
        fs::read_to_string(tmp.path().join("notes.md")).unwrap(),
        "# Notes\n"
    );
}

#[test]
fn snapshot_trigger_captures_with_description() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("index.html"), "<p>hi</p>\n").unwrap();
    let summary = run_script(
        tmp.path(),
        vec![ok("### [WAI:LOCAL_SNAPSHOT:before   the\nbig change]")],
    );
    assert_eq!(summary.snapshots, 1);

    let config = fast_config();
    let store = config.store(tmp.path());
    let entries = SnapshotManager::new(&store, &config).list().unwrap();
    assert_eq!(entries.len(), 1);
    let manifest = read_manifest(&entries[0].path).unwrap().unwrap();
    assert_eq!(manifest.description, "before the big change");
    assert_eq!(manifest.prompt_index, Some(1));
    assert_eq!(manifest.files, vec!["index.html".to_string()]);
}

#[test]
fn unclosed_snapshot_marker_does_nothing() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("index.html"), "x\n").unwrap();
    let summary = run_script(tmp.path(), vec![ok("### [WAI:LOCAL_SNAPSHOT:no closing bracket")]);

    assert_eq!(summary.payloads_seen, 1);
    assert_eq!(summary.snapshots, 0);
    let config = fast_config();
    let store = config.store(tmp.path());
    assert!(SnapshotManager::new(&store, &config).list().unwrap().is_empty());
    assert_eq!(last_id(&store), 0);
}

#[test]
fn combined_payload_updates_then_snapshots_under_one_id() {
    let tmp = tempdir().unwrap();
    let payload = "### [WAI:UPDATE:app.js]\nlet v = 2;\n### [WAI:LOCAL_SNAPSHOT:after update]\n";
    let config = fast_config();
    let store = config.store(tmp.path());
    let watcher = PayloadWatcher::new(&store, &config, Box::new(NullVcs));

    let dispatched = watcher.dispatch(payload).unwrap();
    let update_id = match dispatched.update {
        Some(UpdateOutcome::Applied(report)) => report.prompt_id,
        other => panic!("expected applied update, got {:?}", other),
    };
    let capture = dispatched.snapshot.unwrap();
    assert_eq!(capture.snapshot.prompt_index, Some(update_id));

    // The capture sees the file the same payload just wrote.
    let snap = store.snapshot_path(&capture.snapshot.name);
    assert_eq!(fs::read_to_string(snap.join("app.js")).unwrap(), "let v = 2;\n");
    assert_eq!(last_id(&store), update_id);
}

#[test]
fn read_errors_back_off_and_recover() {
    let tmp = tempdir().unwrap();
    let summary = run_script(
        tmp.path(),
        vec![
            Err(WaiError::ClipboardError("busy".to_string())),
            Err(WaiError::ClipboardError("busy".to_string())),
            ok("### [WAI:UPDATE:after.txt]\nrecovered\n"),
        ],
    );
    assert_eq!(summary.update_batches, 1);
    assert!(tmp.path().join("after.txt").exists());
}

#[test]
fn ordinary_text_is_ignored() {
    let tmp = tempdir().unwrap();
    let summary = run_script(tmp.path(), vec![ok("hello"), ok("world"), ok("")]);
    assert_eq!(summary.payloads_seen, 2);
    assert_eq!(summary.update_batches, 0);
    assert_eq!(summary.snapshots, 0);
    let store = fast_config().store(tmp.path());
    assert_eq!(last_id(&store), 0);
}

#[test]
fn preset_shutdown_reads_nothing() {
    let tmp = tempdir().unwrap();
    let config = fast_config();
    let store = config.store(tmp.path());
    let watcher = PayloadWatcher::new(&store, &config, Box::new(NullVcs));
    let shutdown = Arc::new(AtomicBool::new(true));
    let mut source = ScriptedSource::new(vec![ok("### [WAI:UPDATE:a]\nx\n")], Arc::clone(&shutdown));

    let summary = watcher.run(&mut source, &shutdown).unwrap();
    assert_eq!(summary, WatchSummary::default());
    assert_eq!(source.calls, 0);
}

#[test]
fn first_interrupt_only_raises_the_flag() {
    let shutdown = install_shutdown_flag().unwrap();
    assert!(!shutdown.load(Ordering::SeqCst));
    // A single signal must not terminate the test process.
    signal_hook::low_level::raise(signal_hook::consts::SIGINT).unwrap();
    assert!(shutdown.load(Ordering::SeqCst));
}
