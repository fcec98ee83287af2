//! Project layout for wai's on-disk state.
//!
//! A `Store` pairs the project tree being snapshotted with the snapshot
//! root that holds captures, the prompt state record, its lock sentinel,
//! and the logs. Everything else in the crate derives paths from here.

use crate::core::error::WaiError;
use std::path::{Path, PathBuf};

pub const STATE_FILE_NAME: &str = "prompt_state.json";
pub const LOCK_FILE_NAME: &str = "prompt_state.lock";
pub const SNAPSHOT_LOG_NAME: &str = "snapshot_log.md";
pub const EVENTS_FILE_NAME: &str = "wai.events.jsonl";
pub const MANIFEST_NAME: &str = "manifest.json";

#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the project tree.
    pub root: PathBuf,
    /// Directory holding snapshot captures and coordination metadata.
    pub snap_dir: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>, snap_dir_name: &str) -> Self {
        let root = root.into();
        let snap_dir = root.join(snap_dir_name);
        Self { root, snap_dir }
    }

    pub fn state_path(&self) -> PathBuf {
        self.snap_dir.join(STATE_FILE_NAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.snap_dir.join(LOCK_FILE_NAME)
    }

    pub fn snapshot_log_path(&self) -> PathBuf {
        self.snap_dir.join(SNAPSHOT_LOG_NAME)
    }

    pub fn events_path(&self) -> PathBuf {
        self.snap_dir.join(EVENTS_FILE_NAME)
    }

    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        self.snap_dir.join(name)
    }

    /// Name of the snapshot root as seen from the project root.
    pub fn snap_dir_name(&self) -> Option<String> {
        self.snap_dir
            .strip_prefix(&self.root)
            .ok()
            .and_then(|p| p.components().next())
            .map(|c| c.as_os_str().to_string_lossy().to_string())
    }

    /// Normalises a caller-supplied relative path to `a/b/c` form.
    ///
    /// Leading `/` and `\` are stripped; `.` segments dropped. Anything that
    /// could leave the base directory (`..`, a drive prefix) is rejected.
    pub fn normalize_relative(raw: &str) -> Result<String, WaiError> {
        let unified = raw.trim().replace('\\', "/");
        let stripped = unified.trim_start_matches('/');
        let mut parts = Vec::new();
        for part in stripped.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    return Err(WaiError::PathError(format!(
                        "path escapes project root: {}",
                        raw
                    )));
                }
                p if p.contains(':') => {
                    return Err(WaiError::PathError(format!(
                        "path has a drive or stream prefix: {}",
                        raw
                    )));
                }
                p => parts.push(p),
            }
        }
        if parts.is_empty() {
            return Err(WaiError::PathError(format!("empty path: {:?}", raw)));
        }
        Ok(parts.join("/"))
    }

    /// Resolves a `/`-separated relative path under `base`.
    pub fn join_relative(base: &Path, rel: &str) -> PathBuf {
        let mut out = base.to_path_buf();
        for part in rel.split('/').filter(|p| !p.is_empty()) {
            out.push(part);
        }
        out
    }
}
