//! Notification dispatch for one job family.
//!
//! A [`FamilyWorker`] pairs a topic [`Subscription`] with that family's
//! [`JobQueue`]. Notifications are acknowledged as soon as they are received:
//! run actions enqueue the id, removal actions evict it. Whether the job still
//! needs doing is decided later by the runner, which re-reads the record.
//!
//! ```text
//!  broker ──► subscription(builds)   ──► dispatch ──► JobQueue(builds)   ──► build pipeline
//!         ──► subscription(tests)    ──► dispatch ──► JobQueue(tests)    ──► test scheduler
//!         ──► subscription(coverage) ──► dispatch ──► JobQueue(coverage) ──► coverage runner
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pubsub::{Notification, Subscription};

use super::queue::{JobQueue, JobRunner, QueueSnapshot};

/// A running subscriber/queue pair.
#[derive(Debug)]
pub struct FamilyWorker {
    queue: Arc<JobQueue>,
    task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl FamilyWorker {
    /// Starts dispatching `subscription` into a new queue driving `runner`.
    pub fn spawn<R: JobRunner>(
        name: &'static str,
        subscription: Subscription,
        runner: Arc<R>,
        shutdown: CancellationToken,
    ) -> FamilyWorker {
        let queue = Arc::new(JobQueue::spawn(name, runner, shutdown.clone()));
        let task = tokio::spawn(dispatch_loop(subscription, queue.clone(), shutdown.clone()));
        FamilyWorker {
            queue,
            task,
            shutdown,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    /// Stops dispatching and drains the queue's running job.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!(queue = self.queue.name(), error = %e, "Dispatch task failed");
        }
        self.queue.shutdown().await;
    }
}

async fn dispatch_loop(
    mut subscription: Subscription,
    queue: Arc<JobQueue>,
    shutdown: CancellationToken,
) {
    info!(queue = queue.name(), topic = %subscription.topic(), "Dispatch loop started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(queue = queue.name(), "Shutdown signal received, stopping dispatch");
                break;
            }

            notification = subscription.next() => {
                match notification {
                    Some(notification) => dispatch(&queue, &subscription, notification).await,
                    None => {
                        info!(queue = queue.name(), "Subscription closed");
                        break;
                    }
                }
            }
        }
    }
}

async fn dispatch(queue: &JobQueue, subscription: &Subscription, notification: Notification) {
    let Notification { action, id } = notification;
    if action.topic() != subscription.topic() {
        warn!(
            queue = queue.name(),
            action = ?action,
            job = %id,
            "Notification published on the wrong topic, ignoring"
        );
        return;
    }

    if action.is_removal() {
        let removed = queue.remove(id.clone()).await;
        debug!(queue = queue.name(), job = %id, removed, "Processed removal");
    } else if !queue.enqueue(id.clone()).await {
        warn!(queue = queue.name(), job = %id, "Queue is shut down, dropping notification");
    }
}
