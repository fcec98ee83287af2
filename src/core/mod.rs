//! Core primitives shared by every wai command.
//!
//! Store layout, the prompt-state lock and record, id allocation,
//! configuration, the event log, and the version-control collaborator.

pub mod config;
pub mod error;
pub mod events;
pub mod lock;
pub mod output;
pub mod prompt;
pub mod state;
pub mod store;
pub mod time;
pub mod vcs;
