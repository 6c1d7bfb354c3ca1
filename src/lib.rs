//! dirsyncd - watch directory trees and mirror them with rsync.
//!
//! The daemon expands a layered configuration into a set of watched
//! directories, attaches a filesystem watcher to each, and coalesces bursts
//! of change events into a minimal number of rsync invocations. Each watched
//! directory runs its own coordinator task; at most one rsync is in flight
//! per directory at any instant.

pub mod cli;
pub mod config;
pub mod logging;
pub mod rsync;
pub mod sync;

/// Process name used for the default config path and log tags.
pub const PROCESS_NAME: &str = "dirsyncd";
