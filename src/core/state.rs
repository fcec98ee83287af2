//! The durable `{last_id, last_hash}` record shared by every wai process.
//!
//! All access goes through a held [`StateLock`]; `load` and `save` take the
//! guard by reference so an unlocked read or write does not type-check.

use crate::core::error::WaiError;
use crate::core::lock::StateLock;
use crate::core::store::Store;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static PROMPT_IN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_P(\d+)_").expect("prompt index pattern"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptState {
    pub last_id: u64,
    pub last_hash: String,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    store: Store,
}

impl StateStore {
    pub fn new(store: &Store) -> Self {
        Self {
            store: store.clone(),
        }
    }

    /// Reads the record, falling back to [`StateStore::bootstrap`] when it is
    /// missing or unreadable in any way.
    pub fn load(&self, _lock: &StateLock) -> PromptState {
        let path = self.store.state_path();
        match fs::read_to_string(&path) {
            Ok(content) => match parse_state(&content) {
                Some(state) => return state,
                None => tracing::warn!(path = %path.display(), "prompt state unreadable, bootstrapping"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "prompt state unreadable, bootstrapping")
            }
        }
        self.bootstrap()
    }

    /// Writes a fresh temp record and renames it over the live one.
    pub fn save(&self, _lock: &StateLock, state: &PromptState) -> Result<(), WaiError> {
        fs::create_dir_all(&self.store.snap_dir).map_err(WaiError::IoError)?;
        let body = serde_json::to_string_pretty(state)
            .map_err(|e| WaiError::MalformedInput(format!("state encode: {}", e)))?;
        atomic_write(&self.store.state_path(), &body)
    }

    /// Highest `_P<n>_` id among existing snapshot names, empty hash.
    pub fn bootstrap(&self) -> PromptState {
        let mut max_id = 0u64;
        if let Ok(entries) = fs::read_dir(&self.store.snap_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some(id) = prompt_index_from_name(&name) {
                    max_id = max_id.max(id);
                }
            }
        }
        PromptState {
            last_id: max_id,
            last_hash: String::new(),
        }
    }
}

/// Extracts the embedded prompt id from a snapshot name.
pub fn prompt_index_from_name(name: &str) -> Option<u64> {
    PROMPT_IN_NAME
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
}

/// Lenient decode: `last_id` may be a number or a numeric string, either
/// field may be absent. Anything that is not an object is rejected.
fn parse_state(content: &str) -> Option<PromptState> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    let obj = value.as_object()?;
    let last_id = match obj.get("last_id") {
        None | Some(serde_json::Value::Null) => 0,
        Some(serde_json::Value::Number(n)) => n.as_u64()?,
        Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok()?,
        Some(_) => return None,
    };
    let last_hash = match obj.get("last_hash") {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    Some(PromptState { last_id, last_hash })
}

pub(crate) fn atomic_write(path: &Path, contents: &str) -> Result<(), WaiError> {
    let parent = path
        .parent()
        .ok_or_else(|| WaiError::PathError(format!("invalid path: {}", path.display())))?;
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("state"),
        std::process::id()
    ));
    fs::write(&temp_path, contents).map_err(WaiError::IoError)?;
    fs::rename(&temp_path, path).map_err(WaiError::IoError)
}
