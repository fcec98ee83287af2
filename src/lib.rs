//! wai: clipboard-driven project snapshots and multi-file updates.
//!
//! One prompt id space ties together two subsystems that mutate a project
//! tree:
//!
//! - **Snapshots**: point-in-time copies of the project under
//!   `<root>/_snapshots/<stamp>_P<id>_SNAP`, each with a `manifest.json`
//!   recording exactly which files it holds. Retention keeps the newest N.
//! - **Update blocks**: `### [WAI:UPDATE:<path>]` sections in a payload
//!   (usually the clipboard), each written to its path under one shared id.
//!
//! Ids come from `prompt_state.json`, read and written only under an OS
//! file lock, so a watcher and a manual `wai save` never hand out the same
//! id. The same payload seen twice keeps its id.
//!
//! # Examples
//!
//! ```bash
//! # Take a snapshot before a risky change
//! wai save "before auth refactor"
//!
//! # See what is retained, then roll back
//! wai list
//! wai restore 20261019_101500_042_P12_SNAP
//!
//! # Watch the clipboard for update blocks and snapshot triggers
//! wai watch
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: shared primitives (store layout, lock, prompt state, config, events, VCS)
//! - [`plugins`]: snapshot capture, restore, update blocks, and the payload watcher

pub mod core;
pub mod plugins;

use crate::core::{
    config::{self, WaiConfig},
    error::WaiError,
    output,
    prompt::PromptIdAllocator,
    store::Store,
    vcs,
};
use crate::plugins::{
    restore::RestoreEngine,
    snapshot::SnapshotManager,
    watcher::{self, FileSource, PayloadWatcher},
};

use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(
    name = "wai",
    version = env!("CARGO_PKG_VERSION"),
    about = "Project snapshots and clipboard update blocks under one prompt id"
)]
struct Cli {
    /// Project root (defaults to WAI_ROOT, then the nearest ancestor with wai.toml or _snapshots).
    #[clap(long, global = true)]
    root: Option<PathBuf>,
    /// Debug-level diagnostics on stderr.
    #[clap(short, long, global = true)]
    verbose: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture the project tree under a fresh prompt id
    Save {
        /// Free-text description recorded in the manifest
        #[clap(required = true)]
        description: Vec<String>,
    },
    /// List retained snapshots, oldest first
    List,
    /// Copy a snapshot back over the project tree
    Restore {
        /// Snapshot directory name (see `wai list`)
        name: String,
        /// Skip the interactive YES confirmation
        #[clap(long)]
        yes: bool,
    },
    /// Poll a payload source and apply what it carries (Ctrl+C to stop)
    Watch {
        /// `clipboard` or `file:<path>`; defaults to `[watch] source` in wai.toml
        #[clap(long)]
        source: Option<String>,
        /// Read the source once, dispatch, and exit
        #[clap(long)]
        once: bool,
    },
    /// Process a single payload from a file or stdin
    Apply {
        /// Payload file; stdin when omitted
        #[clap(long)]
        file: Option<PathBuf>,
    },
    /// Show the prompt id record
    State,
}

/// Resolved project context shared by every command.
struct Project {
    store: Store,
    config: WaiConfig,
}

impl Project {
    fn open(explicit_root: Option<PathBuf>) -> Result<Self, WaiError> {
        let cwd = std::env::current_dir()?;
        let root = config::resolve_project_root(explicit_root, &cwd);
        let root = if root.is_absolute() {
            root
        } else {
            cwd.join(root)
        };
        if !root.is_dir() {
            return Err(WaiError::NotFound(format!(
                "project root {}",
                root.display()
            )));
        }
        let config = WaiConfig::load(&root)?;
        let store = config.store(&root);
        tracing::debug!(root = %root.display(), snap_dir = %store.snap_dir.display(), "project resolved");
        Ok(Self { store, config })
    }

    fn ids(&self) -> PromptIdAllocator {
        PromptIdAllocator::new(&self.store, Duration::from_millis(self.config.lock.retry_ms))
    }

    fn vcs(&self) -> Box<dyn vcs::VersionControl> {
        vcs::detect(&self.store.root, self.config.vcs.enabled)
    }
}

pub fn run() -> Result<(), WaiError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let project = Project::open(cli.root)?;

    match cli.command {
        Command::Save { description } => run_save(&project, &description.join(" ")),
        Command::List => {
            let snapshots = SnapshotManager::new(&project.store, &project.config);
            output::print_list(&snapshots.list()?);
            Ok(())
        }
        Command::Restore { name, yes } => run_restore(&project, &name, yes),
        Command::Watch { source, once } => run_watch(&project, source, once),
        Command::Apply { file } => run_apply(&project, file.as_deref()),
        Command::State => {
            output::print_state(&project.ids().current()?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "wai=debug" } else { "wai=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run_save(project: &Project, description: &str) -> Result<(), WaiError> {
    let id = project.ids().allocate_fresh()?;
    let snapshots = SnapshotManager::new(&project.store, &project.config);
    let report = snapshots.capture(description, id, project.config.snapshot.retention)?;
    output::print_capture(&report);
    Ok(())
}

fn run_restore(project: &Project, name: &str, yes: bool) -> Result<(), WaiError> {
    let snapshots = SnapshotManager::new(&project.store, &project.config);
    let ids = project.ids();
    let vcs = project.vcs();
    let engine = RestoreEngine::new(
        &snapshots,
        &ids,
        vcs.as_ref(),
        project.config.snapshot.retention,
        project.config.vcs.push,
    );
    let outcome = engine.restore(name, |plan| {
        if yes {
            return true;
        }
        output::print_plan(plan);
        read_confirmation()
    })?;
    output::print_restore(&outcome);
    Ok(())
}

/// One stdin line; only an exact `YES` confirms.
fn read_confirmation() -> bool {
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => line.trim() == "YES",
        Err(e) => {
            tracing::warn!(error = %e, "could not read confirmation");
            false
        }
    }
}

fn run_watch(project: &Project, source: Option<String>, once: bool) -> Result<(), WaiError> {
    let source_name = source.unwrap_or_else(|| project.config.watch.source.clone());
    let mut source = watcher::parse_source(&source_name)?;
    let watcher = PayloadWatcher::new(&project.store, &project.config, project.vcs());

    if once {
        let summary = watcher.run_once(source.as_mut())?;
        tracing::debug!(?summary, "single read done");
        return Ok(());
    }

    let shutdown = watcher::install_shutdown_flag()?;
    println!("watching {} (Ctrl+C to stop)", source_name);
    watcher.run(source.as_mut(), &shutdown)?;
    Ok(())
}

fn run_apply(project: &Project, file: Option<&Path>) -> Result<(), WaiError> {
    let watcher = PayloadWatcher::new(&project.store, &project.config, project.vcs());
    let summary = match file {
        Some(path) => {
            if !path.is_file() {
                return Err(WaiError::NotFound(format!("payload file {}", path.display())));
            }
            watcher.run_once(&mut FileSource::new(path))?
        }
        None => {
            let mut payload = String::new();
            io::stdin().read_to_string(&mut payload)?;
            let mut source = StdinPayload(Some(payload));
            watcher.run_once(&mut source)?
        }
    };
    if summary.update_batches == 0 && summary.snapshots == 0 {
        println!("nothing applied");
    }
    Ok(())
}

/// A payload already read from stdin, handed out once.
struct StdinPayload(Option<String>);

impl watcher::PayloadSource for StdinPayload {
    fn read(&mut self) -> Result<String, WaiError> {
        Ok(self.0.take().unwrap_or_default())
    }
}
