use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use wai::core::error::WaiError;
use wai::core::events::EventLog;
use wai::core::prompt::PromptIdAllocator;
use wai::core::store::Store;
use wai::core::vcs::{CommitOutcome, NullVcs, VersionControl};
use wai::plugins::update::{UpdateBlockProcessor, UpdateOutcome, UpdateReport};

/// Records every call; `staged` is what the index check reports.
#[derive(Clone, Default)]
struct RecordingVcs {
    calls: Arc<Mutex<Vec<String>>>,
    staged: bool,
    commit_fails: bool,
}

impl RecordingVcs {
    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl VersionControl for RecordingVcs {
    fn is_available(&self) -> bool {
        true
    }

    fn stage(&self, rel_path: &str) -> Result<(), WaiError> {
        self.log(format!("stage {}", rel_path));
        Ok(())
    }

    fn stage_all(&self) -> Result<(), WaiError> {
        self.log("stage -A".to_string());
        Ok(())
    }

    fn commit(&self, message: &str) -> bool {
        self.log(format!("commit {}", message));
        !self.commit_fails
    }

    fn push(&self) -> bool {
        self.log("push".to_string());
        true
    }

    fn has_pending_changes(&self) -> Result<bool, WaiError> {
        Ok(self.staged)
    }

    fn has_staged_changes(&self) -> Result<bool, WaiError> {
        Ok(self.staged)
    }
}

fn processor(root: &Path, vcs: Box<dyn VersionControl>, push: bool) -> (Store, UpdateBlockProcessor) {
    let store = Store::new(root, "_snapshots");
    let ids = PromptIdAllocator::new(&store, Duration::from_millis(2));
    let proc = UpdateBlockProcessor::new(&store, ids, vcs, push);
    (store, proc)
}

fn applied(outcome: UpdateOutcome) -> UpdateReport {
    match outcome {
        UpdateOutcome::Applied(report) => report,
        other => panic!("expected applied updates, got {:?}", other),
    }
}

#[test]
fn single_block_writes_file_and_advances_id() {
    let tmp = tempdir().unwrap();
    let (_, proc) = processor(tmp.path(), Box::new(NullVcs), false);

    let report = applied(proc.process("### [WAI:UPDATE:src/a.txt]\nhello\n").unwrap());

    assert_eq!(report.prompt_id, 1);
    assert_eq!(
        fs::read_to_string(tmp.path().join("src/a.txt")).unwrap(),
        "hello\n"
    );
    assert_eq!(report.commit, CommitOutcome::Unavailable);
}

#[test]
fn two_blocks_share_one_prompt_id_in_order() {
    let tmp = tempdir().unwrap();
    let (store, proc) = processor(tmp.path(), Box::new(NullVcs), false);
    let payload = "### [WAI:UPDATE:a.txt]\nfirst\n### [WAI:UPDATE:b.txt]\nsecond\n";

    let report = applied(proc.process(payload).unwrap());
    assert_eq!(report.prompt_id, 1);
    let positions: Vec<(usize, usize, &str)> = report
        .written
        .iter()
        .map(|w| (w.index, w.total, w.path.as_str()))
        .collect();
    assert_eq!(positions, vec![(1, 2, "a.txt"), (2, 2, "b.txt")]);

    let writes: Vec<(Option<u64>, Option<usize>, Option<String>)> = EventLog::new(&store)
        .read_all()
        .unwrap()
        .into_iter()
        .filter(|e| e.op == "update.write")
        .map(|e| (e.prompt_id, e.index, e.path))
        .collect();
    assert_eq!(
        writes,
        vec![
            (Some(1), Some(1), Some("a.txt".to_string())),
            (Some(1), Some(2), Some("b.txt".to_string())),
        ]
    );
}

#[test]
fn same_payload_twice_rewrites_but_keeps_id() {
    let tmp = tempdir().unwrap();
    let (_, proc) = processor(tmp.path(), Box::new(NullVcs), false);
    let payload = "### [WAI:UPDATE:a.txt]\nv1\n";

    let first = applied(proc.process(payload).unwrap());
    fs::write(tmp.path().join("a.txt"), "local edit\n").unwrap();
    let second = applied(proc.process(payload).unwrap());

    assert_eq!(first.prompt_id, second.prompt_id);
    assert_eq!(fs::read_to_string(tmp.path().join("a.txt")).unwrap(), "v1\n");

    let third = applied(proc.process("### [WAI:UPDATE:a.txt]\nv2\n").unwrap());
    assert_eq!(third.prompt_id, first.prompt_id + 1);
}

#[test]
fn fenced_body_and_trailing_whitespace() {
    let tmp = tempdir().unwrap();
    let (_, proc) = processor(tmp.path(), Box::new(NullVcs), false);
    let payload = "### [WAI:UPDATE:js/app.js]\n\nconsole.log(1);   \n\n```\n";
    applied(proc.process(payload).unwrap());
    assert_eq!(
        fs::read_to_string(tmp.path().join("js/app.js")).unwrap(),
        "console.log(1);\n"
    );
}

#[test]
fn marker_without_valid_block_is_malformed() {
    let tmp = tempdir().unwrap();
    let (store, proc) = processor(tmp.path(), Box::new(NullVcs), false);

    let outcome = proc.process("### [WAI:UPDATE:a.txt").unwrap();
    assert!(matches!(outcome, UpdateOutcome::Malformed));

    let events = EventLog::new(&store).read_all().unwrap();
    assert!(events.iter().any(|e| e.op == "update.malformed"));
    assert!(events.iter().all(|e| e.op != "prompt.allocate"));
    assert!(!store.state_path().exists());
}

#[test]
fn payload_without_marker_is_ignored() {
    let tmp = tempdir().unwrap();
    let (store, proc) = processor(tmp.path(), Box::new(NullVcs), false);
    assert!(matches!(
        proc.process("just some copied text").unwrap(),
        UpdateOutcome::NoMarker
    ));
    assert!(EventLog::new(&store).read_all().unwrap().is_empty());
}

#[test]
fn escaping_path_fails_alone() {
    let tmp = tempdir().unwrap();
    let project = tmp.path().join("project");
    fs::create_dir_all(&project).unwrap();
    let (_, proc) = processor(&project, Box::new(NullVcs), false);
    let payload = "### [WAI:UPDATE:../evil.txt]\nnope\n### [WAI:UPDATE:/ok.txt]\nfine\n";

    let report = applied(proc.process(payload).unwrap());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "../evil.txt");
    assert_eq!(report.written.len(), 1);
    assert_eq!(report.written[0].path, "ok.txt");
    assert_eq!(report.written[0].index, 2);
    assert!(!tmp.path().join("evil.txt").exists());
    assert_eq!(fs::read_to_string(project.join("ok.txt")).unwrap(), "fine\n");
}

#[test]
fn write_failure_does_not_stop_later_blocks() {
    let tmp = tempdir().unwrap();
    // A directory where the file should go makes that single write fail.
    fs::create_dir_all(tmp.path().join("taken")).unwrap();
    let (_, proc) = processor(tmp.path(), Box::new(NullVcs), false);
    let payload = "### [WAI:UPDATE:a.txt]\na\n### [WAI:UPDATE:taken]\nx\n### [WAI:UPDATE:c.txt]\nc\n";

    let report = applied(proc.process(payload).unwrap());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(fs::read_to_string(tmp.path().join("a.txt")).unwrap(), "a\n");
    assert_eq!(fs::read_to_string(tmp.path().join("c.txt")).unwrap(), "c\n");
}

#[test]
fn each_file_staged_then_one_commit_and_push() {
    let tmp = tempdir().unwrap();
    let vcs = RecordingVcs {
        staged: true,
        ..RecordingVcs::default()
    };
    let (_, proc) = processor(tmp.path(), Box::new(vcs.clone()), true);
    let payload = "### [WAI:UPDATE:a.txt]\n1\n### [WAI:UPDATE:docs/b.md]\n2\n";

    let report = applied(proc.process(payload).unwrap());
    assert!(report.written.iter().all(|w| w.staged));
    assert_eq!(
        vcs.calls(),
        vec![
            "stage a.txt".to_string(),
            "stage docs/b.md".to_string(),
            "commit [WAI] Prompt 1: 2 file(s) updated".to_string(),
            "push".to_string(),
        ]
    );
    assert_eq!(
        report.commit,
        CommitOutcome::Attempted {
            message: "[WAI] Prompt 1: 2 file(s) updated".to_string(),
            committed: true,
            pushed: Some(true),
        }
    );
}

#[test]
fn nothing_staged_skips_commit() {
    let tmp = tempdir().unwrap();
    let vcs = RecordingVcs::default();
    let (_, proc) = processor(tmp.path(), Box::new(vcs.clone()), true);

    let report = applied(proc.process("### [WAI:UPDATE:a.txt]\nsame\n").unwrap());
    assert_eq!(report.commit, CommitOutcome::Clean);
    assert_eq!(vcs.calls(), vec!["stage a.txt".to_string()]);
}

#[test]
fn push_runs_even_when_commit_fails() {
    let tmp = tempdir().unwrap();
    let vcs = RecordingVcs {
        staged: true,
        commit_fails: true,
        ..RecordingVcs::default()
    };
    let (store, proc) = processor(tmp.path(), Box::new(vcs.clone()), true);

    let report = applied(proc.process("### [WAI:UPDATE:a.txt]\nx\n").unwrap());
    assert_eq!(
        vcs.calls(),
        vec![
            "stage a.txt".to_string(),
            "commit [WAI] Prompt 1: 1 file(s) updated".to_string(),
            "push".to_string(),
        ]
    );
    assert_eq!(
        report.commit,
        CommitOutcome::Attempted {
            message: "[WAI] Prompt 1: 1 file(s) updated".to_string(),
            committed: false,
            pushed: Some(true),
        }
    );

    let vcs_events: Vec<(String, String)> = EventLog::new(&store)
        .read_all()
        .unwrap()
        .into_iter()
        .filter(|e| e.op.starts_with("vcs."))
        .map(|e| (e.op, e.status))
        .collect();
    assert_eq!(
        vcs_events,
        vec![
            ("vcs.commit".to_string(), "error".to_string()),
            ("vcs.push".to_string(), "success".to_string()),
        ]
    );
}
