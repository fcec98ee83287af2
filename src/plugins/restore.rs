//! Copies a snapshot back over the project tree.
//!
//! A restore is gated on a confirmation callback, then followed by a fresh
//! capture of the restored state and an optional commit of the result.

use crate::core::error::WaiError;
use crate::core::events::{EventLog, WaiEvent};
use crate::core::prompt::PromptIdAllocator;
use crate::core::store::{MANIFEST_NAME, Store};
use crate::core::vcs::{self, CommitOutcome, VersionControl};
use crate::plugins::fileset::relative_slash_path;
use crate::plugins::snapshot::{
    CaptureReport, Manifest, SnapshotManager, copy_file, read_manifest,
};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What a restore would do, resolved before anything is touched.
#[derive(Debug, Clone)]
pub struct RestorePlan {
    pub name: String,
    pub path: PathBuf,
    pub files: Vec<String>,
    /// No manifest: the file set came from walking the snapshot directory.
    pub degraded: bool,
    pub manifest: Option<Manifest>,
}

impl RestorePlan {
    pub fn prompt_index(&self) -> Option<u64> {
        self.manifest.as_ref().and_then(|m| m.prompt_index)
    }

    pub fn description(&self) -> &str {
        self.manifest
            .as_ref()
            .map(|m| m.description.as_str())
            .unwrap_or("")
    }

    pub fn commit_message(&self) -> String {
        match self.prompt_index() {
            Some(idx) => format!("[RESTORE P{}] {}", idx, self.name),
            None => format!("[RESTORE] {}", self.name),
        }
    }

    /// Description given to the capture taken right after restoring.
    pub fn post_capture_description(&self) -> String {
        let desc = self.description().trim();
        if desc.is_empty() {
            format!("RESTORE:{}", self.name)
        } else {
            format!("RESTORE:{} - {}", self.name, desc)
        }
    }
}

#[derive(Debug)]
pub struct RestoreReport {
    pub plan: RestorePlan,
    pub restored: Vec<String>,
    /// Listed files absent from the snapshot.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub post_capture: Result<CaptureReport, WaiError>,
    pub commit: CommitOutcome,
}

#[derive(Debug)]
pub enum RestoreOutcome {
    Declined(RestorePlan),
    Restored(RestoreReport),
}

pub struct RestoreEngine<'a> {
    snapshots: &'a SnapshotManager,
    ids: &'a PromptIdAllocator,
    vcs: &'a dyn VersionControl,
    retention: usize,
    push: bool,
    events: EventLog,
}

impl<'a> RestoreEngine<'a> {
    pub fn new(
        snapshots: &'a SnapshotManager,
        ids: &'a PromptIdAllocator,
        vcs: &'a dyn VersionControl,
        retention: usize,
        push: bool,
    ) -> Self {
        Self {
            events: EventLog::new(snapshots.store()),
            snapshots,
            ids,
            vcs,
            retention,
            push,
        }
    }

    fn store(&self) -> &Store {
        self.snapshots.store()
    }

    pub fn plan(&self, name: &str) -> Result<RestorePlan, WaiError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        let path = self.store().snapshot_path(name);
        if !valid || !path.is_dir() {
            return Err(WaiError::NotFound(format!("snapshot '{}'", name)));
        }

        let manifest = read_manifest(&path)?;
        let (files, degraded) = match &manifest {
            Some(m) => (m.files.clone(), false),
            None => {
                tracing::warn!(snapshot = %name, "no manifest, restoring from directory contents");
                (walk_snapshot(&path), true)
            }
        };
        Ok(RestorePlan {
            name: name.to_string(),
            path,
            files,
            degraded,
            manifest,
        })
    }

    /// Restores `name` if `confirm` approves the resolved plan.
    pub fn restore<F>(&self, name: &str, confirm: F) -> Result<RestoreOutcome, WaiError>
    where
        F: FnOnce(&RestorePlan) -> bool,
    {
        let plan = self.plan(name)?;
        if !confirm(&plan) {
            tracing::info!(snapshot = %name, "restore declined");
            return Ok(RestoreOutcome::Declined(plan));
        }

        let mut restored = Vec::new();
        let mut skipped = Vec::new();
        let mut failed = Vec::new();
        for raw in &plan.files {
            let rel = match Store::normalize_relative(raw) {
                Ok(rel) => rel,
                Err(e) => {
                    tracing::warn!(path = %raw, error = %e, "unsafe manifest path");
                    failed.push((raw.clone(), e.to_string()));
                    continue;
                }
            };
            let src = Store::join_relative(&plan.path, &rel);
            if !src.is_file() {
                skipped.push(rel);
                continue;
            }
            let dst = Store::join_relative(&self.store().root, &rel);
            match copy_file(&src, &dst) {
                Ok(()) => restored.push(rel),
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "restore copy failed");
                    failed.push((rel, e.to_string()));
                }
            }
        }

        let mut event = WaiEvent::new(
            "restore.apply",
            if failed.is_empty() { "success" } else { "partial" },
        )
        .snapshot(&plan.name)
        .message(format!(
            "{} restored, {} skipped, {} failed",
            restored.len(),
            skipped.len(),
            failed.len()
        ));
        if let Some(idx) = plan.prompt_index() {
            event = event.prompt(idx);
        }
        self.events.record(event);
        tracing::info!(snapshot = %plan.name, restored = restored.len(), "restore applied");

        let post_capture = self.capture_after(&plan);
        let commit = self.commit(&plan);

        Ok(RestoreOutcome::Restored(RestoreReport {
            plan,
            restored,
            skipped,
            failed,
            post_capture,
            commit,
        }))
    }

    fn capture_after(&self, plan: &RestorePlan) -> Result<CaptureReport, WaiError> {
        let id = self.ids.allocate_fresh()?;
        let report = self
            .snapshots
            .capture(&plan.post_capture_description(), id, self.retention);
        if let Err(e) = &report {
            tracing::warn!(error = %e, "post-restore capture failed");
        }
        report
    }

    fn commit(&self, plan: &RestorePlan) -> CommitOutcome {
        if !self.vcs.is_available() {
            return CommitOutcome::Unavailable;
        }
        match self.vcs.has_pending_changes() {
            Ok(false) => return CommitOutcome::Clean,
            Ok(true) => {}
            Err(e) => {
                tracing::warn!(error = %e, "status check failed");
                return CommitOutcome::Failed(e.to_string());
            }
        }
        if let Err(e) = self.vcs.stage_all() {
            tracing::warn!(error = %e, "stage all failed");
            self.events.record(
                WaiEvent::new("vcs.stage", "error")
                    .snapshot(&plan.name)
                    .message(e.to_string()),
            );
            return CommitOutcome::Failed(e.to_string());
        }
        vcs::commit_staged(
            self.vcs,
            &plan.commit_message(),
            self.push,
            &self.events,
            plan.prompt_index(),
        )
    }
}

fn walk_snapshot(snap_path: &Path) -> Vec<String> {
    WalkDir::new(snap_path)
        .sort_by_file_name()
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter(|e| !(e.depth() == 1 && e.file_name() == MANIFEST_NAME))
        .filter_map(|e| relative_slash_path(snap_path, e.path()))
        .collect()
}
