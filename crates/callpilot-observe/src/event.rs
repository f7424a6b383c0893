//! Lifecycle event payloads and the subjects they travel on.

use callpilot_types::{ChatMessage, LifecycleEventType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subject for call arrival notifications.
pub const CALLS_CREATE_SUBJECT: &str = "calls.create";
/// Subject for finished call records.
pub const CALLS_TRACK_SUBJECT: &str = "calls.track";
/// Subject for conversation transcripts.
pub const CONVERSATIONS_ENDED_SUBJECT: &str = "conversations.ended";

/// A call entered the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCreated {
    pub session_ref: String,
    pub channel_id: String,
    #[serde(default)]
    pub caller_number: Option<String>,
    #[serde(default)]
    pub called_number: Option<String>,
    #[serde(default)]
    pub app_ref: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// A finished call, as persisted by the call tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub session_ref: String,
    pub channel_id: String,
    #[serde(default)]
    pub caller_number: Option<String>,
    #[serde(default)]
    pub called_number: Option<String>,
    #[serde(default)]
    pub app_ref: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Call length in milliseconds.
    pub duration: u64,
    #[serde(default)]
    pub hangup_cause: Option<String>,
}

impl CallRecord {
    /// Closes out a call that was announced with `created`.
    pub fn finish(created: &CallCreated, ended_at: DateTime<Utc>, hangup_cause: Option<String>) -> Self {
        let duration = (ended_at - created.started_at)
            .num_milliseconds()
            .max(0) as u64;
        Self {
            session_ref: created.session_ref.clone(),
            channel_id: created.channel_id.clone(),
            caller_number: created.caller_number.clone(),
            called_number: created.called_number.clone(),
            app_ref: created.app_ref.clone(),
            started_at: created.started_at,
            ended_at,
            duration,
            hangup_cause,
        }
    }
}

/// A conversation reached its terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEnded {
    pub session_ref: String,
    pub chat_history: Vec<ChatMessage>,
    pub ended_at: DateTime<Utc>,
}

/// Envelope published on the bus, tagged by `eventType`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum LifecycleEvent {
    #[serde(rename = "CREATED")]
    Created(CallCreated),
    #[serde(rename = "TRACKED")]
    Tracked(CallRecord),
    #[serde(rename = "CONVERSATION_ENDED")]
    ConversationEnded(ConversationEnded),
}

impl LifecycleEvent {
    pub fn event_type(&self) -> LifecycleEventType {
        match self {
            Self::Created(_) => LifecycleEventType::Created,
            Self::Tracked(_) => LifecycleEventType::Tracked,
            Self::ConversationEnded(_) => LifecycleEventType::ConversationEnded,
        }
    }

    /// Bus subject this event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Created(_) => CALLS_CREATE_SUBJECT,
            Self::Tracked(_) => CALLS_TRACK_SUBJECT,
            Self::ConversationEnded(_) => CONVERSATIONS_ENDED_SUBJECT,
        }
    }

    pub fn session_ref(&self) -> &str {
        match self {
            Self::Created(e) => &e.session_ref,
            Self::Tracked(e) => &e.session_ref,
            Self::ConversationEnded(e) => &e.session_ref,
        }
    }
}

/// JSON body POSTed to an events hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookBody {
    pub event_type: LifecycleEventType,
    pub chat_history: Vec<ChatMessage>,
}
