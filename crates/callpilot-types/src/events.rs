//! Lifecycle event types and webhook subscriptions.

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kinds of lifecycle events a session produces.
///
/// `All` only appears in hook subscriptions, as a wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEventType {
    #[serde(rename = "CREATED", alias = "created")]
    Created,
    #[serde(rename = "TRACKED", alias = "tracked")]
    Tracked,
    #[serde(rename = "CONVERSATION_ENDED", alias = "conversation.ended")]
    ConversationEnded,
    #[serde(rename = "ALL", alias = "all")]
    All,
}

impl LifecycleEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Tracked => "TRACKED",
            Self::ConversationEnded => "CONVERSATION_ENDED",
            Self::All => "ALL",
        }
    }
}

impl fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A webhook subscription attached to an assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsHook {
    pub url: String,
    pub events: Vec<LifecycleEventType>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl EventsHook {
    /// Whether this hook wants events of `event_type`.
    pub fn accepts(&self, event_type: LifecycleEventType) -> bool {
        self.events
            .iter()
            .any(|e| *e == event_type || *e == LifecycleEventType::All)
    }

    /// Checks the hook shape before any request is sent.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if the URL is not an absolute http(s) URL,
    /// no events are subscribed, or a header name is empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| ValidationError::new("eventsHook.url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::new(
                "eventsHook.url",
                format!("unsupported scheme {}", url.scheme()),
            ));
        }
        if self.events.is_empty() {
            return Err(ValidationError::new(
                "eventsHook.events",
                "must contain at least one event",
            ));
        }
        if self.headers.keys().any(|k| k.trim().is_empty()) {
            return Err(ValidationError::new(
                "eventsHook.headers",
                "header names must not be empty",
            ));
        }
        Ok(())
    }
}
