//! Append-only JSONL audit log of every state-changing operation.
//!
//! Each line is one `WaiEvent`. Writes are best effort: a failure to append
//! is reported through tracing and never fails the operation being logged.

use crate::core::error::WaiError;
use crate::core::store::Store;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct WaiEvent {
    pub ts: String,
    pub event_id: String,
    pub op: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl WaiEvent {
    pub fn new(op: &str, status: &str) -> Self {
        Self {
            ts: time::now_rfc3339(),
            event_id: time::new_event_id(),
            op: op.to_string(),
            status: status.to_string(),
            ..Self::default()
        }
    }

    pub fn prompt(mut self, id: u64) -> Self {
        self.prompt_id = Some(id);
        self
    }

    pub fn snapshot(mut self, name: &str) -> Self {
        self.snapshot = Some(name.to_string());
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn position(mut self, index: usize, total: usize) -> Self {
        self.index = Some(index);
        self.total = Some(total);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(store: &Store) -> Self {
        Self {
            path: store.events_path(),
        }
    }

    pub fn record(&self, event: WaiEvent) {
        if let Err(e) = self.append(&event) {
            tracing::warn!(op = %event.op, error = %e, "event log append failed");
        }
    }

    fn append(&self, event: &WaiEvent) -> Result<(), WaiError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(WaiError::IoError)?;
        }
        let line = serde_json::to_string(event)
            .map_err(|e| WaiError::MalformedInput(format!("event encode: {}", e)))?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(WaiError::IoError)?;
        writeln!(f, "{}", line).map_err(WaiError::IoError)
    }

    /// Reads back every parseable event, skipping torn or foreign lines.
    pub fn read_all(&self) -> Result<Vec<WaiEvent>, WaiError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(WaiError::IoError)?;
        Ok(content
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}
