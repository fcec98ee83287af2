//! File-set strategies: which project files a capture copies.

use crate::core::config::{FileSetStrategy, WaiConfig};
use crate::core::error::WaiError;
use std::path::Path;
use std::process::Command;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct FileSet {
    pub strategy: FileSetStrategy,
    pub exclude_dirs: Vec<String>,
    pub exclude_suffixes: Vec<String>,
}

impl FileSet {
    pub fn from_config(config: &WaiConfig) -> Self {
        Self {
            strategy: config.snapshot.strategy,
            exclude_dirs: config.effective_exclude_dirs(),
            exclude_suffixes: config.snapshot.exclude_suffixes.clone(),
        }
    }

    /// Relative, `/`-separated paths in a stable order.
    pub fn collect(&self, root: &Path) -> Result<Vec<String>, WaiError> {
        match self.strategy {
            FileSetStrategy::Walk => Ok(self.walk(root)),
            FileSetStrategy::GitTracked => self.git_tracked(root),
        }
    }

    fn walk(&self, root: &Path) -> Vec<String> {
        let mut out = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !(e.file_type().is_dir()
                        && self
                            .exclude_dirs
                            .iter()
                            .any(|d| e.file_name().to_string_lossy() == d.as_str()))
            });
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if self.exclude_suffixes.iter().any(|s| name.ends_with(s.as_str())) {
                continue;
            }
            if let Some(rel) = relative_slash_path(root, entry.path()) {
                out.push(rel);
            }
        }
        out
    }

    fn git_tracked(&self, root: &Path) -> Result<Vec<String>, WaiError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(root)
            .args(["-c", "core.quotepath=false", "ls-files", "-z"])
            .output()
            .map_err(|e| WaiError::CollaboratorFailure(format!("git ls-files: {}", e)))?;
        if !output.status.success() {
            return Err(WaiError::CollaboratorFailure(format!(
                "git ls-files failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let mut files: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .split('\0')
            .filter(|p| !p.is_empty())
            .filter(|p| !self.is_excluded(p))
            .map(|p| p.to_string())
            .collect();
        files.sort();
        Ok(files)
    }

    fn is_excluded(&self, rel: &str) -> bool {
        let mut parts: Vec<&str> = rel.split('/').collect();
        let file = parts.pop().unwrap_or_default();
        parts
            .iter()
            .any(|p| self.exclude_dirs.iter().any(|d| d == p))
            || self.exclude_suffixes.iter().any(|s| file.ends_with(s.as_str()))
    }
}

pub(crate) fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
