//! Subsystems built on `core`: snapshot capture and restore, update
//! blocks, and the payload watcher that drives both.

pub mod fileset;
pub mod restore;
pub mod snapshot;
pub mod update;
pub mod watcher;
