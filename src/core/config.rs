//! `wai.toml` loading and project root discovery.

use crate::core::error::WaiError;
use crate::core::store::Store;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "wai.toml";
pub const ROOT_ENV: &str = "WAI_ROOT";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WaiConfig {
    pub snapshot: SnapshotConfig,
    pub watch: WatchConfig,
    pub lock: LockConfig,
    pub vcs: VcsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileSetStrategy {
    /// Every regular file under the root minus the exclusion set.
    Walk,
    /// Whatever `git ls-files` reports.
    GitTracked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Eviction {
    Trash,
    Delete,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub dir: String,
    pub retention: usize,
    pub strategy: FileSetStrategy,
    pub exclude_dirs: Vec<String>,
    pub exclude_suffixes: Vec<String>,
    pub eviction: Eviction,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: "_snapshots".to_string(),
            retention: 5,
            strategy: FileSetStrategy::Walk,
            exclude_dirs: [
                ".git",
                "_snapshots",
                "__pycache__",
                "venv",
                "env",
                ".venv",
                "node_modules",
                ".idea",
                ".vscode",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            exclude_suffixes: vec![".pyc".to_string(), ".pyo".to_string()],
            eviction: Eviction::Trash,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    pub poll_interval_ms: u64,
    pub error_backoff_ms: u64,
    pub source: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            error_backoff_ms: 1000,
            source: "clipboard".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    pub retry_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { retry_ms: 50 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VcsConfig {
    pub enabled: bool,
    pub push: bool,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            push: true,
        }
    }
}

impl WaiConfig {
    /// Loads `<root>/wai.toml`. No file means defaults.
    pub fn load(root: &Path) -> Result<Self, WaiError> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(WaiError::IoError)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| WaiError::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// `snapshot.dir` must be one plain directory name under the root;
    /// directory exclusion matches single path components.
    pub fn validate(&self) -> Result<(), WaiError> {
        let dir = self.snapshot.dir.as_str();
        if dir.trim().is_empty() || dir == "." || dir == ".." || dir.contains(['/', '\\', ':']) {
            return Err(WaiError::ConfigError(format!(
                "snapshot.dir must be a single directory name, got '{}'",
                dir
            )));
        }
        Ok(())
    }

    pub fn store(&self, root: &Path) -> Store {
        Store::new(root, &self.snapshot.dir)
    }

    /// Exclusion set with the snapshot root always present.
    pub fn effective_exclude_dirs(&self) -> Vec<String> {
        let mut dirs = self.snapshot.exclude_dirs.clone();
        if !dirs.iter().any(|d| d == &self.snapshot.dir) {
            dirs.push(self.snapshot.dir.clone());
        }
        dirs
    }
}

/// Resolves the project root: explicit flag, then `WAI_ROOT`, then the
/// nearest ancestor holding `wai.toml` or a `_snapshots` dir, then `start`.
pub fn resolve_project_root(explicit: Option<PathBuf>, start: &Path) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    if let Ok(dir) = std::env::var(ROOT_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    let default_snap = SnapshotConfig::default().dir;
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE_NAME).is_file() || current.join(&default_snap).is_dir() {
            return current;
        }
        if !current.pop() {
            return start.to_path_buf();
        }
    }
}
