//! Job notification channel.
//!
//! Producers (the webhook handler, operators) publish `{action, id}` messages
//! on one topic per job family; each family's worker subscribes and feeds the
//! ids into its [`crate::worker::JobQueue`].
//!
//! Messages travel as raw JSON bytes, as they would over an external broker.
//! Subscribers decode on receipt; malformed payloads are logged and dropped.
//! Delivery is at-most-once and acknowledged on receipt: a subscriber never
//! asks for redelivery, and handlers tolerate duplicates by re-reading job
//! state from the store.

mod message;

use std::collections::HashMap;
use std::future::Future;

use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace, warn};

pub use message::{Action, Notification, Topic};

/// Channel buffer size per subscription.
const SUBSCRIPTION_BUFFER: usize = 100;

/// Errors from the notification channel.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// The notification could not be encoded.
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    /// Nobody is subscribed to the topic.
    #[error("no subscribers for topic {0}")]
    NoSubscribers(Topic),
}

/// Result type for publish operations.
pub type Result<T> = std::result::Result<T, PubSubError>;

/// Publishes job notifications.
pub trait Publisher: Send + Sync + 'static {
    /// Publishes `notification` on the topic of its action's job family.
    fn publish(&self, notification: &Notification) -> impl Future<Output = Result<()>> + Send;
}

/// In-process topic broker.
///
/// Every subscriber of a topic receives every message published on it.
#[derive(Debug, Default)]
pub struct Broker {
    topics: RwLock<HashMap<Topic, Vec<mpsc::Sender<Vec<u8>>>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `topic`.
    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.topics.write().await.entry(topic).or_default().push(tx);
        debug!(topic = %topic, "New subscription");
        Subscription { topic, rx }
    }

    /// Publishes a raw payload on `topic`.
    ///
    /// Returns the number of subscribers that received it. The topic table is
    /// not locked while sending, so a full subscription only delays this
    /// publish. Closed subscriptions are pruned afterwards.
    pub async fn publish_raw(&self, topic: Topic, payload: Vec<u8>) -> usize {
        let subscribers = match self.topics.read().await.get(&topic) {
            Some(subscribers) => subscribers.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut closed = false;
        for tx in &subscribers {
            if tx.send(payload.clone()).await.is_ok() {
                delivered += 1;
            } else {
                closed = true;
            }
        }

        if closed && let Some(subscribers) = self.topics.write().await.get_mut(&topic) {
            subscribers.retain(|tx| !tx.is_closed());
        }
        delivered
    }
}

impl Publisher for Broker {
    async fn publish(&self, notification: &Notification) -> Result<()> {
        let topic = notification.action.topic();
        let payload = serde_json::to_vec(notification)?;
        let delivered = self.publish_raw(topic, payload).await;
        trace!(topic = %topic, id = %notification.id, delivered, "Published notification");
        if delivered == 0 {
            return Err(PubSubError::NoSubscribers(topic));
        }
        Ok(())
    }
}

/// Receiving end of a topic subscription.
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Waits for the next well-formed notification.
    ///
    /// Returns `None` once the broker is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            let payload = self.rx.recv().await?;
            match serde_json::from_slice::<Notification>(&payload) {
                Ok(notification) => return Some(notification),
                Err(e) => {
                    warn!(
                        topic = %self.topic,
                        error = %e,
                        payload = %String::from_utf8_lossy(&payload),
                        "Dropping malformed notification"
                    );
                }
            }
        }
    }
}
