//! Queue control messages.
//!
//! A [`super::JobQueue`] is driven by a single task; callers talk to it through
//! these messages over a `tokio::sync::mpsc` channel so that every change to
//! the run list is serialized.

use tokio::sync::oneshot;

use crate::types::JobId;

#[derive(Debug)]
pub enum QueueMessage {
    /// Append a job to the run list (no-op if already queued or running).
    Enqueue(JobId),

    /// Cancel and evict a job. Replies whether the job was known.
    Remove {
        id: JobId,
        reply: oneshot::Sender<bool>,
    },

    /// Stop accepting work, cancel the running job and exit once it returns.
    Shutdown,
}
