//! Operator-facing terminal output.
//!
//! The `*_lines` functions build plain text so they can be asserted on;
//! the `print_*` functions add colour and write to stdout.

use crate::core::error::WaiError;
use crate::core::state::PromptState;
use crate::core::time;
use crate::core::vcs::CommitOutcome;
use crate::plugins::restore::{RestoreOutcome, RestorePlan, RestoreReport};
use crate::plugins::snapshot::{CaptureReport, SnapshotEntry};
use crate::plugins::update::{UpdateOutcome, UpdateReport};
use crate::plugins::watcher::{Dispatched, WatchSummary};
use colored::Colorize;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

pub fn capture_lines(report: &CaptureReport) -> Vec<String> {
    let snap = &report.snapshot;
    let id = snap
        .prompt_index
        .map(|i| format!("P{}", i))
        .unwrap_or_else(|| "P?".to_string());
    let mut lines = vec![
        format!(
            "[{}] {} | {}",
            id,
            time::log_stamp(snap.created_at),
            snap.name
        ),
        format!("  files: {} ({} copied)", snap.files.len(), report.copied),
        format!("  description: {}", compact_line(&snap.description, 120)),
    ];
    if !report.failed.is_empty() {
        lines.push(format!("  copy failures: {}", report.failed.len()));
    }
    for name in &report.evicted {
        lines.push(format!("  evicted: {}", name));
    }
    match &report.previous {
        Some(prev) => lines.push(format!("  restore previous: wai restore {}", prev)),
        None => lines.push("  first snapshot".to_string()),
    }
    lines
}

pub fn update_lines(report: &UpdateReport) -> Vec<String> {
    let clock = time::clock();
    let mut lines: Vec<String> = report
        .written
        .iter()
        .map(|w| {
            format!(
                "[{}] [PROMPT {} {}/{}] {}{}",
                clock,
                report.prompt_id,
                w.index,
                w.total,
                w.path,
                if w.staged { " (staged)" } else { "" }
            )
        })
        .collect();
    for (path, err) in &report.failed {
        lines.push(format!(
            "[{}] [PROMPT {}] failed {}: {}",
            clock, report.prompt_id, path, err
        ));
    }
    lines.extend(commit_line(&report.commit));
    lines
}

pub fn commit_line(commit: &CommitOutcome) -> Option<String> {
    match commit {
        CommitOutcome::Unavailable => None,
        CommitOutcome::Clean => Some("  git: nothing to commit".to_string()),
        CommitOutcome::Attempted {
            message,
            committed,
            pushed,
        } => {
            let commit = if *committed {
                format!("  git: committed \"{}\"", message)
            } else {
                format!("  git: commit failed \"{}\"", message)
            };
            Some(match pushed {
                Some(true) => format!("{}, pushed", commit),
                Some(false) => format!("{}, push failed", commit),
                None => commit,
            })
        }
        CommitOutcome::Failed(err) => Some(format!("  git: {}", err)),
    }
}

pub fn list_lines(entries: &[SnapshotEntry]) -> Vec<String> {
    if entries.is_empty() {
        return vec!["(no snapshots)".to_string()];
    }
    entries
        .iter()
        .map(|e| {
            let when = e
                .created_at
                .map(time::log_stamp)
                .unwrap_or_else(|| "unknown time".to_string());
            match &e.manifest {
                Some(m) => format!(
                    "{}  {}  [{}] {} files  {}",
                    e.name,
                    when,
                    m.prompt_index
                        .map(|i| format!("P{}", i))
                        .unwrap_or_else(|| "P?".to_string()),
                    m.files.len(),
                    compact_line(&m.description, 80)
                ),
                None => format!("{}  {}  (no manifest)", e.name, when),
            }
        })
        .collect()
}

pub fn plan_lines(plan: &RestorePlan) -> Vec<String> {
    let mut lines = vec![format!(
        "Restore {} ({} files) over the working tree?",
        plan.name,
        plan.files.len()
    )];
    if !plan.description().is_empty() {
        lines.push(format!("  description: {}", compact_line(plan.description(), 120)));
    }
    if plan.degraded {
        lines.push("  warning: no manifest; restoring whatever the snapshot directory holds".to_string());
    }
    lines
}

pub fn restore_lines(report: &RestoreReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Restored {}: {} files ({} skipped, {} failed)",
        report.plan.name,
        report.restored.len(),
        report.skipped.len(),
        report.failed.len()
    )];
    for (path, err) in &report.failed {
        lines.push(format!("  failed {}: {}", path, err));
    }
    match &report.post_capture {
        Ok(capture) => lines.extend(capture_lines(capture)),
        Err(e) => lines.push(format!("  post-restore snapshot failed: {}", e)),
    }
    lines.extend(commit_line(&report.commit));
    lines
}

pub fn print_capture(report: &CaptureReport) {
    let mut lines = capture_lines(report).into_iter();
    if let Some(head) = lines.next() {
        println!("{}", head.green().bold());
    }
    for line in lines {
        println!("{}", line);
    }
}

pub fn print_update(outcome: &UpdateOutcome) {
    match outcome {
        UpdateOutcome::NoMarker => println!("{}", "no update blocks in payload".dimmed()),
        UpdateOutcome::Malformed => println!(
            "{}",
            "update marker found but no block could be parsed".yellow()
        ),
        UpdateOutcome::Applied(report) => {
            for line in update_lines(report) {
                println!("{}", line);
            }
        }
    }
}

pub fn print_dispatched(dispatched: &Dispatched) {
    if let Some(update) = &dispatched.update {
        print_update(update);
    }
    if let Some(capture) = &dispatched.snapshot {
        print_capture(capture);
    }
}

pub fn print_list(entries: &[SnapshotEntry]) {
    for line in list_lines(entries) {
        println!("{}", line);
    }
}

pub fn print_plan(plan: &RestorePlan) {
    let mut lines = plan_lines(plan).into_iter();
    if let Some(head) = lines.next() {
        println!("{}", head.bright_white().bold());
    }
    for line in lines {
        println!("{}", line.yellow());
    }
    println!("Type {} to confirm:", "YES".bright_red().bold());
}

pub fn print_restore(outcome: &RestoreOutcome) {
    match outcome {
        RestoreOutcome::Declined(plan) => {
            println!("{} {}", "Restore cancelled:".yellow(), plan.name)
        }
        RestoreOutcome::Restored(report) => {
            let mut lines = restore_lines(report).into_iter();
            if let Some(head) = lines.next() {
                println!("{}", head.green().bold());
            }
            for line in lines {
                println!("{}", line);
            }
        }
    }
}

pub fn print_state(state: &PromptState) {
    println!("last_id:   {}", state.last_id.to_string().bright_white().bold());
    println!(
        "last_hash: {}",
        if state.last_hash.is_empty() {
            "(none)"
        } else {
            state.last_hash.as_str()
        }
    );
}

pub fn print_stopped(summary: &WatchSummary) {
    println!(
        "{} ({} payloads, {} update batches, {} snapshots)",
        "watcher stopped".bright_cyan(),
        summary.payloads_seen,
        summary.update_batches,
        summary.snapshots
    );
}

pub fn print_error(err: &WaiError) {
    eprintln!("{} {}", "error:".bright_red().bold(), err);
}
