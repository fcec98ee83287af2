//! Polls a payload source and dispatches update blocks and snapshot triggers.
//!
//! Single-threaded: one read per poll, one dispatch per changed payload.
//! Shutdown is cooperative through an `AtomicBool` set by SIGINT/SIGTERM;
//! a second signal while the flag is already set exits immediately.

use crate::core::config::WaiConfig;
use crate::core::error::WaiError;
use crate::core::output;
use crate::core::prompt::{PromptIdAllocator, payload_hash};
use crate::core::store::Store;
use crate::core::vcs::VersionControl;
use crate::plugins::snapshot::{CaptureReport, SnapshotManager};
use crate::plugins::update::{UpdateBlockProcessor, UpdateOutcome};
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

static SNAPSHOT_TRIGGER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)###\s*\[WAI:LOCAL_SNAPSHOT:([^\]]+)\]").expect("static trigger pattern")
});

/// Longest single sleep, so shutdown is noticed promptly.
const NAP_SLICE: Duration = Duration::from_millis(50);

pub trait PayloadSource {
    fn read(&mut self) -> Result<String, WaiError>;
}

/// System clipboard text via `arboard`. The handle is opened lazily and
/// dropped after a failure so a restarted clipboard daemon is picked up.
#[derive(Default)]
pub struct ClipboardSource {
    clipboard: Option<arboard::Clipboard>,
}

impl ClipboardSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadSource for ClipboardSource {
    fn read(&mut self) -> Result<String, WaiError> {
        if self.clipboard.is_none() {
            let cb = arboard::Clipboard::new()
                .map_err(|e| WaiError::ClipboardError(e.to_string()))?;
            self.clipboard = Some(cb);
        }
        let Some(cb) = self.clipboard.as_mut() else {
            return Ok(String::new());
        };
        match cb.get_text() {
            Ok(text) => Ok(text),
            // Empty clipboard or non-text content.
            Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
            Err(e) => {
                self.clipboard = None;
                Err(WaiError::ClipboardError(e.to_string()))
            }
        }
    }
}

/// Re-reads a text file on every poll; a missing file reads as empty.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PayloadSource for FileSource {
    fn read(&mut self) -> Result<String, WaiError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(WaiError::IoError(e)),
        }
    }
}

/// `clipboard` or `file:<path>`.
pub fn parse_source(raw: &str) -> Result<Box<dyn PayloadSource>, WaiError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("clipboard") {
        return Ok(Box::new(ClipboardSource::new()));
    }
    match raw.strip_prefix("file:") {
        Some(path) if !path.trim().is_empty() => Ok(Box::new(FileSource::new(path.trim()))),
        _ => Err(WaiError::ConfigError(format!(
            "unknown payload source '{}' (expected clipboard or file:<path>)",
            raw
        ))),
    }
}

/// Description of the first snapshot trigger, whitespace collapsed.
pub fn parse_snapshot_trigger(text: &str) -> Option<String> {
    let caps = SNAPSHOT_TRIGGER.captures(text)?;
    let raw = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    Some(raw.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// What one payload triggered.
#[derive(Debug, Default)]
pub struct Dispatched {
    pub update: Option<UpdateOutcome>,
    pub snapshot: Option<CaptureReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub payloads_seen: usize,
    pub update_batches: usize,
    pub snapshots: usize,
}

impl WatchSummary {
    fn absorb(&mut self, dispatched: &Dispatched) {
        if matches!(dispatched.update, Some(UpdateOutcome::Applied(_))) {
            self.update_batches += 1;
        }
        if dispatched.snapshot.is_some() {
            self.snapshots += 1;
        }
    }
}

pub struct PayloadWatcher {
    updates: UpdateBlockProcessor,
    snapshots: SnapshotManager,
    ids: PromptIdAllocator,
    retention: usize,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl PayloadWatcher {
    pub fn new(store: &Store, config: &WaiConfig, vcs: Box<dyn VersionControl>) -> Self {
        let ids = PromptIdAllocator::new(store, Duration::from_millis(config.lock.retry_ms));
        Self {
            updates: UpdateBlockProcessor::new(store, ids.clone(), vcs, config.vcs.push),
            snapshots: SnapshotManager::new(store, config),
            ids,
            retention: config.snapshot.retention,
            poll_interval: Duration::from_millis(config.watch.poll_interval_ms),
            error_backoff: Duration::from_millis(config.watch.error_backoff_ms),
        }
    }

    /// Applies update blocks first, then takes the snapshot, so a payload
    /// carrying both captures the updated tree under one prompt id.
    pub fn dispatch(&self, payload: &str) -> Result<Dispatched, WaiError> {
        let mut dispatched = Dispatched::default();
        match self.updates.process(payload)? {
            UpdateOutcome::NoMarker => {}
            outcome => dispatched.update = Some(outcome),
        }
        if let Some(description) = parse_snapshot_trigger(payload) {
            let id = self.ids.allocate_for_hash(&payload_hash(payload))?;
            let report = self.snapshots.capture(&description, id, self.retention)?;
            dispatched.snapshot = Some(report);
        }
        Ok(dispatched)
    }

    /// Reads the source once and dispatches whatever it holds.
    pub fn run_once(&self, source: &mut dyn PayloadSource) -> Result<WatchSummary, WaiError> {
        let mut summary = WatchSummary::default();
        let payload = source.read()?;
        if !payload.is_empty() {
            summary.payloads_seen += 1;
            let dispatched = self.dispatch(&payload)?;
            output::print_dispatched(&dispatched);
            summary.absorb(&dispatched);
        }
        Ok(summary)
    }

    /// Polls until `shutdown` is set.
    pub fn run(
        &self,
        source: &mut dyn PayloadSource,
        shutdown: &AtomicBool,
    ) -> Result<WatchSummary, WaiError> {
        let mut summary = WatchSummary::default();
        let mut last: Option<String> = None;
        let mut failing = false;
        tracing::info!(poll_ms = self.poll_interval.as_millis() as u64, "watcher started");

        while !shutdown.load(Ordering::SeqCst) {
            let payload = match source.read() {
                Ok(p) => {
                    if failing {
                        tracing::info!("payload source recovered");
                    }
                    failing = false;
                    p
                }
                Err(e) => {
                    if !failing {
                        tracing::warn!(error = %e, "payload source read failed");
                        failing = true;
                    }
                    nap(self.error_backoff, shutdown);
                    continue;
                }
            };

            if last.as_deref() != Some(payload.as_str()) {
                if !payload.is_empty() {
                    summary.payloads_seen += 1;
                    match self.dispatch(&payload) {
                        Ok(dispatched) => {
                            output::print_dispatched(&dispatched);
                            summary.absorb(&dispatched);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "payload dispatch failed");
                            output::print_error(&e);
                        }
                    }
                }
                last = Some(payload);
            }
            nap(self.poll_interval, shutdown);
        }

        output::print_stopped(&summary);
        Ok(summary)
    }
}

/// Flag raised by the first SIGINT/SIGTERM. A repeat signal arriving once
/// the flag is set terminates the process with exit code 1.
pub fn install_shutdown_flag() -> Result<Arc<AtomicBool>, WaiError> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        // Registered first so it sees the flag before this signal sets it.
        signal_hook::flag::register_conditional_shutdown(signal, 1, Arc::clone(&flag))?;
        signal_hook::flag::register(signal, Arc::clone(&flag))?;
    }
    Ok(flag)
}

fn nap(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(NAP_SLICE));
    }
}
