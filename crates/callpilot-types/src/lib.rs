//! Shared types for the callpilot platform.
//!
//! This crate provides the foundational types used across all callpilot
//! crates: the chat history exchanged between caller and assistant, the
//! assistant configuration that drives a conversation, the tool definitions
//! exposed to language models, and the events hook / lifecycle event types
//! used for notifications.
//!
//! No crate in the workspace depends on anything *except* `callpilot-types`
//! for cross-cutting type definitions. This keeps the dependency graph clean
//! and prevents circular dependencies.

pub mod assistant;
pub mod events;
pub mod tools;

pub use assistant::{
    AssistantConfig, ConversationSettings, IdleOptions, KnowledgeBaseSource,
    LanguageModelProvider, LanguageModelSettings, ParseProviderError, TransferOptions,
};
pub use events::{EventsHook, LifecycleEventType};
pub use tools::{
    hangup_tool_definition, is_builtin_name, transfer_tool_definition, ToolDefinition, ToolOperation,
    HANGUP_TOOL_NAME, TRANSFER_TOOL_NAME,
};

use serde::{Deserialize, Serialize};

/// Speaker of a chat history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the language model.
    System,
    /// The caller.
    User,
    /// The AI agent.
    Assistant,
}

impl Role {
    /// Returns the wire label for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Error returned when a configuration value fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}
