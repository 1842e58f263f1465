//! Per-family workers.
//!
//! Each job family (builds, tests, coverage) has one worker: a notification
//! subscriber feeding a single-flight [`JobQueue`] that runs jobs through a
//! [`JobRunner`].
//!
//! # Module Structure
//!
//! - [`queue`]: the single-flight run list and the runner trait
//! - [`message`]: queue control messages
//! - [`dispatch`]: subscription to queue routing

mod dispatch;
mod message;
mod queue;

pub use dispatch::FamilyWorker;
pub use message::QueueMessage;
pub use queue::{JobQueue, JobRunner, QueueSnapshot};
