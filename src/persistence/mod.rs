//! Durable local file writes.
//!
//! The file-backed entity store keeps an append-only log of its writes plus a
//! periodically compacted snapshot; the build pipeline rewrites package
//! manifests with the atomic helpers.

pub mod atomic;
pub mod log;

pub use atomic::{fsync_dir, fsync_file, write_all_atomic, write_atomic};
pub use log::{EntryLog, LogError};
