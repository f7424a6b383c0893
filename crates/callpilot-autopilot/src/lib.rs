//! Conversation state machine for AI-driven calls.
//!
//! Each call gets one [`Autopilot`] that owns the call's [`Voice`] handle,
//! its language model, and its chat history. Events reach it through an
//! unbounded channel and are applied strictly one at a time, so a session
//! never runs two model calls at once. Different sessions share nothing and
//! run concurrently on their own tasks.
//!
//! [`Voice`]: callpilot_voice::Voice

pub mod context;
pub mod error;
pub mod machine;
pub mod state;

pub use context::AutopilotContext;
pub use error::AutopilotError;
pub use machine::{Autopilot, MAX_CONSECUTIVE_ERRORS};
pub use state::{AutopilotEvent, AutopilotState, EndReason, SessionOutcome};
