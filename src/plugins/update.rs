//! Update blocks: `### [WAI:UPDATE:<path>]` headers followed by file bodies.
//!
//! Parsing is a line state machine. Every block in one payload shares the
//! prompt id allocated for the payload's hash; each write is independent,
//! so a failed block never undoes or prevents its siblings.

use crate::core::error::WaiError;
use crate::core::events::{EventLog, WaiEvent};
use crate::core::prompt::{PromptIdAllocator, payload_hash};
use crate::core::store::Store;
use crate::core::vcs::{self, CommitOutcome, VersionControl};
use std::fs;

pub const UPDATE_MARKER: &str = "[WAI:UPDATE:";
pub const SNAPSHOT_MARKER: &str = "[WAI:LOCAL_SNAPSHOT:";
const FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateBlock {
    pub relative_path: String,
    pub body: String,
}

enum ParseState {
    Scanning,
    InBody { path: String, body: String },
}

/// Splits `text` into update blocks, in payload order.
pub fn parse_update_blocks(text: &str) -> Vec<UpdateBlock> {
    let mut blocks = Vec::new();
    let mut state = ParseState::Scanning;

    for line in text.split_inclusive('\n') {
        let header = header_path(line);
        state = match state {
            ParseState::Scanning => match header {
                Some(path) => ParseState::InBody {
                    path,
                    body: String::new(),
                },
                None => ParseState::Scanning,
            },
            ParseState::InBody { path, mut body } => {
                if is_boundary(line) {
                    blocks.push(close_block(path, &body));
                    match header {
                        Some(next) => ParseState::InBody {
                            path: next,
                            body: String::new(),
                        },
                        None => ParseState::Scanning,
                    }
                } else {
                    body.push_str(line);
                    ParseState::InBody { path, body }
                }
            }
        };
    }

    if let ParseState::InBody { path, body } = state {
        blocks.push(close_block(path, &body));
    }
    blocks
}

/// Text after `###` and optional whitespace, if the line starts that way.
fn after_hashes(line: &str) -> Option<&str> {
    line.trim_start_matches([' ', '\t'])
        .strip_prefix("###")
        .map(|rest| rest.trim_start())
}

fn header_path(line: &str) -> Option<String> {
    // A header needs its own line terminator; the body starts on the next line.
    if !line.ends_with('\n') {
        return None;
    }
    let rest = after_hashes(line)?.strip_prefix(UPDATE_MARKER)?;
    let close = rest.find(']')?;
    let (path, tail) = (&rest[..close], &rest[close + 1..]);
    if !tail.trim().is_empty() {
        return None;
    }
    let path = path.trim();
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

fn is_boundary(line: &str) -> bool {
    after_hashes(line)
        .map(|rest| rest.starts_with(UPDATE_MARKER) || rest.starts_with(SNAPSHOT_MARKER))
        .unwrap_or(false)
}

fn close_block(path: String, body: &str) -> UpdateBlock {
    let mut body = body.trim_matches(['\r', '\n']);
    if let Some(stripped) = body.strip_suffix(FENCE) {
        body = stripped.trim_end_matches(['\r', '\n']);
    }
    UpdateBlock {
        relative_path: path,
        body: body.to_string(),
    }
}

/// The file content a block produces: exactly one trailing newline.
pub fn file_content(body: &str) -> String {
    format!("{}\n", body.trim_end())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    /// 1-based position within the payload.
    pub index: usize,
    pub total: usize,
    pub path: String,
    pub staged: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub prompt_id: u64,
    pub written: Vec<WrittenFile>,
    /// Blocks that could not be written, with the reason.
    pub failed: Vec<(String, String)>,
    pub commit: CommitOutcome,
}

#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// No update marker in the payload.
    NoMarker,
    /// Marker present but no block parsed.
    Malformed,
    Applied(UpdateReport),
}

pub struct UpdateBlockProcessor {
    store: Store,
    ids: PromptIdAllocator,
    vcs: Box<dyn VersionControl>,
    push: bool,
    events: EventLog,
}

impl UpdateBlockProcessor {
    pub fn new(
        store: &Store,
        ids: PromptIdAllocator,
        vcs: Box<dyn VersionControl>,
        push: bool,
    ) -> Self {
        Self {
            store: store.clone(),
            ids,
            vcs,
            push,
            events: EventLog::new(store),
        }
    }

    pub fn process(&self, payload: &str) -> Result<UpdateOutcome, WaiError> {
        let blocks = parse_update_blocks(payload);
        if blocks.is_empty() {
            if payload.contains(UPDATE_MARKER) {
                tracing::warn!("update marker found but no block parsed");
                self.events.record(
                    WaiEvent::new("update.malformed", "error")
                        .message("update marker present but no valid block"),
                );
                return Ok(UpdateOutcome::Malformed);
            }
            return Ok(UpdateOutcome::NoMarker);
        }

        let prompt_id = self.ids.allocate_for_hash(&payload_hash(payload))?;
        let total = blocks.len();
        let vcs_on = self.vcs.is_available();
        let mut written = Vec::new();
        let mut failed = Vec::new();

        for (i, block) in blocks.iter().enumerate() {
            let index = i + 1;
            match self.write_block(block) {
                Ok(path) => {
                    let staged = vcs_on && self.stage(&path, prompt_id);
                    tracing::info!(prompt_id, index, total, path = %path, "update written");
                    self.events.record(
                        WaiEvent::new("update.write", "success")
                            .prompt(prompt_id)
                            .path(&path)
                            .position(index, total),
                    );
                    written.push(WrittenFile {
                        index,
                        total,
                        path,
                        staged,
                    });
                }
                Err(e) => {
                    tracing::warn!(prompt_id, index, total, path = %block.relative_path, error = %e, "update failed");
                    self.events.record(
                        WaiEvent::new("update.write", "error")
                            .prompt(prompt_id)
                            .path(&block.relative_path)
                            .position(index, total)
                            .message(e.to_string()),
                    );
                    failed.push((block.relative_path.clone(), e.to_string()));
                }
            }
        }

        let commit = if written.is_empty() {
            CommitOutcome::Clean
        } else {
            let message = format!("[WAI] Prompt {}: {} file(s) updated", prompt_id, written.len());
            vcs::commit_staged(
                self.vcs.as_ref(),
                &message,
                self.push,
                &self.events,
                Some(prompt_id),
            )
        };

        Ok(UpdateOutcome::Applied(UpdateReport {
            prompt_id,
            written,
            failed,
            commit,
        }))
    }

    fn write_block(&self, block: &UpdateBlock) -> Result<String, WaiError> {
        let rel = Store::normalize_relative(&block.relative_path)?;
        let target = Store::join_relative(&self.store.root, &rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(WaiError::IoError)?;
        }
        fs::write(&target, file_content(&block.body)).map_err(WaiError::IoError)?;
        Ok(rel)
    }

    fn stage(&self, path: &str, prompt_id: u64) -> bool {
        match self.vcs.stage(path) {
            Ok(()) => {
                self.events.record(
                    WaiEvent::new("vcs.stage", "success")
                        .prompt(prompt_id)
                        .path(path),
                );
                true
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "stage failed");
                self.events.record(
                    WaiEvent::new("vcs.stage", "error")
                        .prompt(prompt_id)
                        .path(path)
                        .message(e.to_string()),
                );
                false
            }
        }
    }
}
