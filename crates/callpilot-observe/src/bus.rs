//! Pub/sub transport abstraction.
//!
//! [`NatsBus`] talks to an external NATS broker. [`InMemoryBus`] keeps the
//! same subject and queue-group semantics inside the process and backs the
//! tests and single-node deployments without a broker.

use crate::error::PublishError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// A message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Stream of messages for one subscription. Dropping it unsubscribes.
pub type BusSubscription = Pin<Box<dyn Stream<Item = BusMessage> + Send>>;

/// A subject-based publish/subscribe transport.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publishes without waiting for delivery.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError>;

    /// Subscribes to `subject`. Subscribers sharing a `queue_group` split the
    /// messages between them; each message goes to one member of the group.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<BusSubscription, PublishError>;

    /// Flushes buffered publishes to the transport.
    async fn flush(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// NATS-backed bus.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl fmt::Debug for NatsBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsBus").finish_non_exhaustive()
    }
}

impl NatsBus {
    /// Connects to the broker at `url`.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Connect` if the broker cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, PublishError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| PublishError::Connect(e.to_string()))?;
        tracing::info!(url = %url, "connected to message bus");
        Ok(Self { client })
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| PublishError::Bus(e.to_string()))
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<BusSubscription, PublishError> {
        let subscriber = match queue_group {
            Some(group) => {
                self.client
                    .queue_subscribe(subject.to_string(), group.to_string())
                    .await
            }
            None => self.client.subscribe(subject.to_string()).await,
        }
        .map_err(|e| PublishError::Bus(e.to_string()))?;

        Ok(Box::pin(subscriber.map(|message| BusMessage {
            subject: message.subject.to_string(),
            payload: message.payload,
        })))
    }

    async fn flush(&self) -> Result<(), PublishError> {
        self.client
            .flush()
            .await
            .map_err(|e| PublishError::Bus(e.to_string()))
    }
}

struct LocalSubscriber {
    group: Option<String>,
    tx: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Default)]
struct LocalState {
    subscribers: HashMap<String, Vec<LocalSubscriber>>,
    /// Round-robin position per `(subject, group)`.
    cursors: HashMap<(String, String), usize>,
}

/// In-process bus with exact-match subjects.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<LocalState>>,
}

impl fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InMemoryBus")
            .field("subjects", &state.subscribers.len())
            .finish()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `subject`.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .subscribers
            .get(subject)
            .map(|subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError> {
        let message = BusMessage {
            subject: subject.to_string(),
            payload,
        };

        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        let Some(subs) = state.subscribers.get_mut(subject) else {
            return Ok(());
        };
        subs.retain(|s| !s.tx.is_closed());

        let mut groups: HashMap<&str, Vec<&LocalSubscriber>> = HashMap::new();
        for sub in subs.iter() {
            match &sub.group {
                Some(group) => groups.entry(group.as_str()).or_default().push(sub),
                None => {
                    let _ = sub.tx.send(message.clone());
                }
            }
        }
        for (group, members) in groups {
            let cursor = state
                .cursors
                .entry((subject.to_string(), group.to_string()))
                .or_insert(0);
            let _ = members[*cursor % members.len()].tx.send(message.clone());
            *cursor = cursor.wrapping_add(1);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<BusSubscription, PublishError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .subscribers
            .entry(subject.to_string())
            .or_default()
            .push(LocalSubscriber {
                group: queue_group.map(str::to_string),
                tx,
            });
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
