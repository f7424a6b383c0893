//! Language model adapter for callpilot assistants.
//!
//! A session owns one [`LanguageModel`] handle built from its assistant's
//! [`LanguageModelSettings`]. Each call to [`LanguageModel::complete`] sends
//! the system prompt plus the chat history and resolves to either a text
//! reply or a single call-control tool invocation (`hangup` or `transfer`).
//! Custom HTTP tools are executed inside the adapter and never reach the
//! caller.

pub mod error;
pub mod knowledge;
pub mod openai;
pub mod stream;
pub mod tools;

pub use error::ModelError;
pub use knowledge::{build_system_prompt, KnowledgeBase};
pub use openai::OpenAiCompatibleModel;
pub use tools::{execute_custom_tool, tool_definitions};

use async_trait::async_trait;
use callpilot_types::{ChatMessage, ConversationSettings, LanguageModelSettings};
use serde_json::Value;

/// A call-control tool invocation returned by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Outcome of one completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Text to be spoken to the caller.
    Text(String),
    /// A built-in tool the session must act on.
    ToolCall(ToolCall),
}

/// Produces the assistant's next turn from the conversation so far.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// # Errors
    ///
    /// Any provider, stream, or tool failure is returned as a [`ModelError`].
    async fn complete(&self, history: &[ChatMessage]) -> Result<Completion, ModelError>;
}

/// Builds the model handle for a session, fetching the knowledge base first.
///
/// # Errors
///
/// Returns `ModelError::Config` if the provider needs an API key that is
/// missing.
pub async fn create_language_model(
    client: reqwest::Client,
    settings: &LanguageModelSettings,
    conversation: &ConversationSettings,
) -> Result<OpenAiCompatibleModel, ModelError> {
    let knowledge = KnowledgeBase::load(&client, &settings.knowledge_base).await;
    if !knowledge.is_empty() {
        tracing::debug!(
            provider = %settings.provider,
            sources = settings.knowledge_base.len(),
            "knowledge base loaded"
        );
    }
    OpenAiCompatibleModel::new(client, settings, conversation, &knowledge)
}
