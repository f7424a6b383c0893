//! Fire-and-forget delivery to the bus and to events hooks.

use crate::bus::Bus;
use crate::error::PublishError;
use crate::event::{LifecycleEvent, WebhookBody};
use bytes::Bytes;
use callpilot_types::{ChatMessage, EventsHook, LifecycleEventType};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Publishes lifecycle events. Failures are logged and never returned to the
/// session that produced the event.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Option<Arc<dyn Bus>>,
    http: reqwest::Client,
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher")
            .field("bus", &self.bus.is_some())
            .finish_non_exhaustive()
    }
}

impl EventPublisher {
    /// Without a bus only webhooks are delivered.
    pub fn new(bus: Option<Arc<dyn Bus>>, http: reqwest::Client) -> Self {
        Self { bus, http }
    }

    pub fn bus(&self) -> Option<&Arc<dyn Bus>> {
        self.bus.as_ref()
    }

    /// Serializes `payload` as JSON and publishes it on `subject`.
    pub async fn publish<T: Serialize + ?Sized>(&self, subject: &str, payload: &T) {
        let Some(bus) = &self.bus else {
            tracing::debug!(subject = %subject, "no bus configured, event dropped");
            return;
        };
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::error!(subject = %subject, "failed to encode event: {}", e);
                return;
            }
        };
        if let Err(e) = bus.publish(subject, bytes).await {
            tracing::error!(subject = %subject, "failed to publish event: {}", e);
        }
    }

    /// Publishes a lifecycle event on its subject.
    pub async fn publish_event(&self, event: &LifecycleEvent) {
        tracing::debug!(
            session_ref = %event.session_ref(),
            event_type = %event.event_type(),
            "publishing lifecycle event"
        );
        self.publish(event.subject(), event).await;
    }

    /// Sends `{eventType, chatHistory}` to the hook if it subscribes to
    /// `event_type` (or to `ALL`) and passes validation.
    ///
    /// Delivery runs on its own task; the returned handle may be awaited but
    /// nothing requires it.
    pub fn notify_webhook(
        &self,
        hook: &EventsHook,
        event_type: LifecycleEventType,
        chat_history: &[ChatMessage],
    ) -> Option<JoinHandle<()>> {
        if !hook.accepts(event_type) {
            return None;
        }
        if let Err(e) = hook.validate() {
            tracing::warn!(url = %hook.url, "events hook rejected: {}", e);
            return None;
        }

        let client = self.http.clone();
        let hook = hook.clone();
        let body = WebhookBody {
            event_type,
            chat_history: chat_history.to_vec(),
        };
        Some(tokio::spawn(async move {
            match deliver_webhook(&client, &hook, &body).await {
                Ok(()) => tracing::debug!(url = %hook.url, event_type = %event_type, "webhook delivered"),
                Err(e) => tracing::error!(url = %hook.url, event_type = %event_type, "{}", e),
            }
        }))
    }
}

/// POSTs `body` to the hook with its configured headers.
///
/// # Errors
///
/// Returns `PublishError::InvalidHook` for a malformed hook and
/// `PublishError::Webhook` for transport failures or non-success statuses.
pub async fn deliver_webhook(
    client: &reqwest::Client,
    hook: &EventsHook,
    body: &WebhookBody,
) -> Result<(), PublishError> {
    hook.validate()?;
    let mut request = client.post(&hook.url).json(body).timeout(WEBHOOK_TIMEOUT);
    for (name, value) in &hook.headers {
        request = request.header(name, value);
    }
    request.send().await?.error_for_status()?;
    Ok(())
}
