//! Event publishing for the callpilot platform.
//!
//! Sessions announce their progress as lifecycle events. Every event goes to
//! the pub/sub bus on a fixed subject; conversation transcripts additionally
//! go to the assistant's events hook when it subscribes to them.
//!
//! | Event | Subject | Payload |
//! |-------|---------|---------|
//! | `CREATED` | `calls.create` | [`CallCreated`] |
//! | `TRACKED` | `calls.track` | [`CallRecord`] |
//! | `CONVERSATION_ENDED` | `conversations.ended` | [`ConversationEnded`] |
//!
//! Delivery is best effort. Nothing here retries, and no failure reaches the
//! session that published.

mod bus;
mod error;
mod event;
mod publisher;

pub use bus::{Bus, BusMessage, BusSubscription, InMemoryBus, NatsBus};
pub use error::PublishError;
pub use event::{
    CallCreated, CallRecord, ConversationEnded, LifecycleEvent, WebhookBody,
    CALLS_CREATE_SUBJECT, CALLS_TRACK_SUBJECT, CONVERSATIONS_ENDED_SUBJECT,
};
pub use publisher::{deliver_webhook, EventPublisher};
