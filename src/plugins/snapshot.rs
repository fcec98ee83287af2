//! Point-in-time captures of the project tree with bounded retention.
//!
//! A capture is a directory `<snap_dir>/<stamp>_P<id>_SNAP` holding copies
//! of every file in the file set plus `manifest.json`, the sole record of
//! which files belong to it. Captures are ordered by their recorded
//! `created_at`, with the name stamp as fallback for legacy directories.

use crate::core::config::{Eviction, WaiConfig};
use crate::core::error::WaiError;
use crate::core::events::{EventLog, WaiEvent};
use crate::core::state::prompt_index_from_name;
use crate::core::store::{MANIFEST_NAME, Store};
use crate::core::time;
use crate::plugins::fileset::FileSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Characters that cannot appear in a path component on common platforms.
const INVALID_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub description: String,
    pub prompt_index: Option<u64>,
    pub created_at: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub prompt_index: Option<u64>,
    pub description: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub snapshot: Snapshot,
    /// Files actually copied.
    pub copied: usize,
    /// Listed files that were missing or not regular at copy time.
    pub skipped: Vec<String>,
    /// Listed files whose copy failed, with the error.
    pub failed: Vec<(String, String)>,
    pub evicted: Vec<String>,
    /// Surviving capture immediately before this one, after retention.
    pub previous: Option<String>,
}

/// One directory under the snapshot root, as seen by `list`.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub name: String,
    pub path: PathBuf,
    pub manifest: Option<Manifest>,
    pub created_at: Option<DateTime<Utc>>,
}

impl SnapshotEntry {
    fn order_key(&self) -> (Option<DateTime<Utc>>, &str) {
        (self.created_at, self.name.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotManager {
    store: Store,
    files: FileSet,
    eviction: Eviction,
    events: EventLog,
}

impl SnapshotManager {
    pub fn new(store: &Store, config: &WaiConfig) -> Self {
        Self {
            store: store.clone(),
            files: FileSet::from_config(config),
            eviction: config.snapshot.eviction,
            events: EventLog::new(store),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn capture(
        &self,
        description: &str,
        prompt_index: u64,
        retention: usize,
    ) -> Result<CaptureReport, WaiError> {
        let files = self.files.collect(&self.store.root)?;
        self.capture_files(description, prompt_index, retention, files)
    }

    /// Capture an explicit file list instead of the configured strategy.
    pub fn capture_files(
        &self,
        description: &str,
        prompt_index: u64,
        retention: usize,
        files: Vec<String>,
    ) -> Result<CaptureReport, WaiError> {
        fs::create_dir_all(&self.store.snap_dir).map_err(WaiError::IoError)?;

        let created_at = Utc::now();
        let name = snapshot_name(created_at, prompt_index);
        let snap_path = self.store.snapshot_path(&name);
        // Plain create_dir so a name collision fails instead of merging captures.
        fs::create_dir(&snap_path).map_err(WaiError::IoError)?;

        let mut copied = 0usize;
        let mut skipped = Vec::new();
        let mut failed = Vec::new();
        for rel in &files {
            if rel.is_empty() {
                continue;
            }
            let src = Store::join_relative(&self.store.root, rel);
            if !src.is_file() {
                skipped.push(rel.clone());
                continue;
            }
            let dst = Store::join_relative(&snap_path, rel);
            match copy_file(&src, &dst) {
                Ok(()) => copied += 1,
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "snapshot copy failed");
                    failed.push((rel.clone(), e.to_string()));
                }
            }
        }

        let manifest = Manifest {
            description: description.to_string(),
            prompt_index: Some(prompt_index),
            created_at: time::to_rfc3339(created_at),
            files: files.clone(),
        };
        write_manifest(&snap_path, &manifest)?;

        if let Err(e) = self.append_running_log(created_at, &name, description) {
            tracing::warn!(error = %e, "snapshot log append failed");
        }
        self.events.record(
            WaiEvent::new("snapshot.capture", "success")
                .prompt(prompt_index)
                .snapshot(&name)
                .message(description),
        );
        tracing::info!(snapshot = %name, files = files.len(), copied, "snapshot captured");

        let evicted = self.apply_retention(retention)?;
        let previous = self.previous_of(&name)?;

        Ok(CaptureReport {
            snapshot: Snapshot {
                name,
                created_at,
                prompt_index: Some(prompt_index),
                description: description.to_string(),
                files,
            },
            copied,
            skipped,
            failed,
            evicted,
            previous,
        })
    }

    /// Every snapshot directory, oldest first.
    pub fn list(&self) -> Result<Vec<SnapshotEntry>, WaiError> {
        let dir = match fs::read_dir(&self.store.snap_dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WaiError::IoError(e)),
        };
        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry.map_err(WaiError::IoError)?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();
            if !is_snapshot_dir(&path, &name) {
                tracing::debug!(dir = %name, "not a snapshot, ignoring");
                continue;
            }
            let manifest = read_manifest(&path).ok().flatten();
            let created_at = manifest
                .as_ref()
                .and_then(|m| time::parse_created_at(&m.created_at))
                .or_else(|| time::parse_name_stamp(&name));
            entries.push(SnapshotEntry {
                name,
                path,
                manifest,
                created_at,
            });
        }
        entries.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        Ok(entries)
    }

    /// Evicts the oldest captures beyond `keep` (at least one always
    /// survives); returns the evicted names.
    pub fn apply_retention(&self, keep: usize) -> Result<Vec<String>, WaiError> {
        let keep = keep.max(1);
        let entries = self.list()?;
        if entries.len() <= keep {
            return Ok(Vec::new());
        }
        let excess = entries.len() - keep;
        let mut evicted = Vec::new();
        for entry in entries.into_iter().take(excess) {
            match dispose(&entry.path, self.eviction) {
                Ok(how) => {
                    tracing::info!(snapshot = %entry.name, how, "snapshot evicted");
                    self.events.record(
                        WaiEvent::new("snapshot.evict", "success")
                            .snapshot(&entry.name)
                            .message(how),
                    );
                    evicted.push(entry.name);
                }
                Err(e) => {
                    tracing::warn!(snapshot = %entry.name, error = %e, "snapshot eviction failed");
                    self.events.record(
                        WaiEvent::new("snapshot.evict", "error")
                            .snapshot(&entry.name)
                            .message(e.to_string()),
                    );
                }
            }
        }
        Ok(evicted)
    }

    /// The entry immediately before `name` in capture order.
    pub fn previous_of(&self, name: &str) -> Result<Option<String>, WaiError> {
        let entries = self.list()?;
        let Some(idx) = entries.iter().position(|e| e.name == name) else {
            return Ok(None);
        };
        Ok(idx.checked_sub(1).map(|i| entries[i].name.clone()))
    }

    fn append_running_log(
        &self,
        created_at: DateTime<Utc>,
        name: &str,
        description: &str,
    ) -> Result<(), WaiError> {
        let path = self.store.snapshot_log_path();
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(WaiError::IoError)?;
        if f.metadata().map(|m| m.len() == 0).unwrap_or(true) {
            write!(
                f,
                "# WAI Snapshot Log\n\n| time | snapshot | description |\n|------|----------|-------------|\n"
            )
            .map_err(WaiError::IoError)?;
        }
        let desc = description.replace(['\n', '\r'], " ").replace('|', "/");
        writeln!(
            f,
            "| {} | {} | {} |",
            time::log_stamp(created_at),
            name,
            desc.trim()
        )
        .map_err(WaiError::IoError)
    }
}

/// `<stamp>_P<id>_SNAP`, sanitised for use as a single path component.
pub fn snapshot_name(created_at: DateTime<Utc>, prompt_index: u64) -> String {
    sanitize_component(&format!(
        "{}_P{}_SNAP",
        time::name_stamp(created_at),
        prompt_index
    ))
}

pub fn sanitize_component(raw: &str) -> String {
    let safe: String = raw
        .trim()
        .chars()
        .map(|c| if INVALID_NAME_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let safe = safe.trim().to_string();
    if safe.is_empty() {
        "snapshot".to_string()
    } else {
        safe
    }
}

/// A capture carries a manifest; legacy captures at least carry the
/// `<stamp>_P<n>_SNAP` name. Anything else under the snapshot root is
/// left alone by listing and retention.
fn is_snapshot_dir(path: &Path, name: &str) -> bool {
    if path.join(MANIFEST_NAME).is_file() {
        return true;
    }
    name.ends_with("_SNAP")
        && prompt_index_from_name(name).is_some()
        && time::parse_name_stamp(name).is_some()
}

/// `Ok(None)` when the directory has no manifest.
pub fn read_manifest(snap_path: &Path) -> Result<Option<Manifest>, WaiError> {
    let path = snap_path.join(MANIFEST_NAME);
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path).map_err(WaiError::IoError)?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| WaiError::ManifestError(format!("{}: {}", path.display(), e)))
}

fn write_manifest(snap_path: &Path, manifest: &Manifest) -> Result<(), WaiError> {
    let body = serde_json::to_string_pretty(manifest)
        .map_err(|e| WaiError::ManifestError(format!("encode: {}", e)))?;
    fs::write(snap_path.join(MANIFEST_NAME), body).map_err(WaiError::IoError)
}

pub(crate) fn copy_file(src: &Path, dst: &Path) -> Result<(), WaiError> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(WaiError::IoError)?;
    }
    fs::copy(src, dst).map_err(WaiError::IoError)?;
    Ok(())
}

fn dispose(path: &Path, eviction: Eviction) -> Result<&'static str, WaiError> {
    if eviction == Eviction::Trash {
        match trash::delete(path) {
            Ok(()) if !path.exists() => return Ok("trashed"),
            Ok(()) => tracing::warn!(path = %path.display(), "trash left the directory behind"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "trash failed, deleting"),
        }
    }
    remove_tree(path)?;
    Ok("deleted")
}

/// `remove_dir_all`, retrying once after clearing read-only bits.
fn remove_tree(path: &Path) -> Result<(), WaiError> {
    if fs::remove_dir_all(path).is_ok() || !path.exists() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(path).into_iter().flatten() {
        if let Ok(meta) = entry.metadata() {
            let mut perms = meta.permissions();
            if perms.readonly() {
                perms.set_readonly(false);
                let _ = fs::set_permissions(entry.path(), perms);
            }
        }
    }
    fs::remove_dir_all(path).map_err(WaiError::IoError)
}
