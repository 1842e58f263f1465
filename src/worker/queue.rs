//! Single-flight job queue.
//!
//! Each job family (builds, tests, coverage) owns one [`JobQueue`]. Ids are run
//! strictly in arrival order, one at a time: the queue task spawns the head
//! job, awaits its completion, and only then starts the next. Jobs for the same
//! component therefore never clone or push concurrently within a process.
//!
//! ```text
//!  enqueue(id) ──┐
//!  remove(id)  ──┼──► queue task ──► spawn runner.run(head, token) ──► await ──► next head
//!  shutdown()  ──┘         │
//!                          └── snapshot (running, pending) for observers
//! ```
//!
//! Removal cancels the job's [`CancellationToken`]. A pending job is simply
//! dropped from the list. A running job observes the token at its next check
//! point, stops persisting, and returns; its working tree is released as it
//! unwinds. The next job starts only after the cancelled one has returned.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::types::JobId;

use super::message::QueueMessage;

/// Channel buffer size for queue messages.
const QUEUE_CHANNEL_BUFFER: usize = 100;

/// Runs one job to completion.
///
/// Implementations own the whole job lifecycle: loading the record, running
/// the steps, and persisting the terminal status (unless `cancel` fired).
pub trait JobRunner: Send + Sync + 'static {
    fn run(&self, id: JobId, cancel: CancellationToken) -> impl Future<Output = ()> + Send;
}

/// Point-in-time view of a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub running: Option<JobId>,
    pub pending: Vec<JobId>,
}

impl QueueSnapshot {
    pub fn is_idle(&self) -> bool {
        self.running.is_none() && self.pending.is_empty()
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.running.as_ref() == Some(id) || self.pending.contains(id)
    }
}

/// Handle to a named single-flight queue.
#[derive(Debug)]
pub struct JobQueue {
    name: &'static str,
    tx: mpsc::Sender<QueueMessage>,
    snapshot: Arc<Mutex<QueueSnapshot>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    /// Spawns the queue task.
    ///
    /// The queue stops when `shutdown` is cancelled or [`JobQueue::shutdown`]
    /// is called.
    pub fn spawn<R: JobRunner>(
        name: &'static str,
        runner: Arc<R>,
        shutdown: CancellationToken,
    ) -> JobQueue {
        let (tx, rx) = mpsc::channel(QUEUE_CHANNEL_BUFFER);
        let snapshot = Arc::new(Mutex::new(QueueSnapshot::default()));
        let state = QueueState {
            name,
            runner,
            pending: VecDeque::new(),
            running: None,
            snapshot: snapshot.clone(),
        };
        let task = tokio::spawn(state.run(rx, shutdown));
        info!(queue = name, "Job queue started");

        JobQueue {
            name,
            tx,
            snapshot,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Appends `id` to the run list.
    ///
    /// Returns false if the queue has shut down.
    pub async fn enqueue(&self, id: JobId) -> bool {
        self.tx.send(QueueMessage::Enqueue(id)).await.is_ok()
    }

    /// Cancels and evicts `id`. Returns whether the queue knew the job.
    pub async fn remove(&self, id: JobId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(QueueMessage::Remove { id, reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Current running and pending ids.
    pub fn snapshot(&self) -> QueueSnapshot {
        self.snapshot
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Stops the queue and waits for the running job to return.
    ///
    /// Pending jobs are discarded; their records stay queued for an operator
    /// or a redelivered notification to pick up.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(QueueMessage::Shutdown).await;
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!(queue = self.name, error = %e, "Queue task failed");
        }
    }
}

struct RunningJob {
    id: JobId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct QueueState<R> {
    name: &'static str,
    runner: Arc<R>,
    pending: VecDeque<JobId>,
    running: Option<RunningJob>,
    snapshot: Arc<Mutex<QueueSnapshot>>,
}

impl<R: JobRunner> QueueState<R> {
    #[instrument(skip_all, fields(queue = self.name))]
    async fn run(mut self, mut rx: mpsc::Receiver<QueueMessage>, shutdown: CancellationToken) {
        loop {
            self.start_next(&shutdown);
            self.publish_snapshot();

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping queue");
                    break;
                }

                msg = rx.recv() => {
                    match msg {
                        Some(QueueMessage::Enqueue(id)) => self.enqueue(id),
                        Some(QueueMessage::Remove { id, reply }) => {
                            let _ = reply.send(self.remove(&id));
                        }
                        Some(QueueMessage::Shutdown) => {
                            info!("Shutdown message received");
                            break;
                        }
                        None => {
                            info!("Queue channel closed");
                            break;
                        }
                    }
                }

                // Head job finished (or was cancelled and returned).
                result = async {
                    match self.running.as_mut() {
                        Some(job) => (&mut job.task).await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Some(job) = self.running.take() {
                        match result {
                            Ok(()) => debug!(job = %job.id, "Job completed"),
                            Err(e) => error!(job = %job.id, error = %e, "Job task panicked"),
                        }
                    }
                }
            }
        }

        self.pending.clear();
        if let Some(job) = self.running.take() {
            job.cancel.cancel();
            if let Err(e) = job.task.await {
                error!(job = %job.id, error = %e, "Job task panicked during shutdown");
            }
        }
        self.publish_snapshot();
        info!("Queue stopped");
    }

    fn enqueue(&mut self, id: JobId) {
        let running = self.running.as_ref().is_some_and(|job| job.id == id);
        if running || self.pending.contains(&id) {
            debug!(job = %id, "Job already queued, ignoring duplicate");
            return;
        }
        debug!(job = %id, position = self.pending.len(), "Job enqueued");
        self.pending.push_back(id);
    }

    fn remove(&mut self, id: &JobId) -> bool {
        if let Some(job) = self.running.as_ref()
            && &job.id == id
        {
            info!(job = %id, "Cancelling running job");
            job.cancel.cancel();
            // The job stays `running` until its task returns, so the next
            // head cannot start while it still holds resources.
            return true;
        }

        let before = self.pending.len();
        self.pending.retain(|pending| pending != id);
        let removed = self.pending.len() != before;
        if removed {
            info!(job = %id, "Removed pending job");
        } else {
            warn!(job = %id, "Remove requested for unknown job");
        }
        removed
    }

    fn start_next(&mut self, shutdown: &CancellationToken) {
        if self.running.is_some() {
            return;
        }
        let Some(id) = self.pending.pop_front() else {
            return;
        };

        let cancel = shutdown.child_token();
        let runner = self.runner.clone();
        let job_id = id.clone();
        let job_cancel = cancel.clone();
        info!(job = %id, remaining = self.pending.len(), "Starting job");
        let task = tokio::spawn(async move { runner.run(job_id, job_cancel).await });
        self.running = Some(RunningJob { id, cancel, task });
    }

    fn publish_snapshot(&self) {
        if let Ok(mut snapshot) = self.snapshot.lock() {
            snapshot.running = self.running.as_ref().map(|job| job.id.clone());
            snapshot.pending = self.pending.iter().cloned().collect();
        }
    }
}
