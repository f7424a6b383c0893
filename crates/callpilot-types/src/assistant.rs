//! Assistant configuration.
//!
//! An `AssistantConfig` is attached to an application and describes how the
//! AI agent behaves on a call: what it says, how long it waits for the
//! caller, where it may transfer the call, and which language model backs
//! it. Field names follow the camelCase JSON used by the application
//! directory.

use crate::events::EventsHook;
use crate::tools::ToolDefinition;
use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_true() -> bool {
    true
}

fn default_max_speech_wait_timeout() -> u64 {
    1000
}

fn default_idle_message() -> String {
    "Are you still there?".to_string()
}

fn default_idle_timeout() -> u64 {
    10_000
}

fn default_max_idle_timeout_count() -> u32 {
    3
}

fn default_transfer_timeout() -> u64 {
    30_000
}

fn default_temperature() -> f32 {
    0.4
}

fn default_max_tokens() -> u32 {
    250
}

/// Complete configuration for one assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfig {
    pub conversation_settings: ConversationSettings,
    pub language_model: LanguageModelSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_hook: Option<EventsHook>,
}

impl AssistantConfig {
    /// Checks the invariants the state machine and model adapter rely on.
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.conversation_settings.validate()?;
        self.language_model.validate()?;
        if let Some(hook) = &self.events_hook {
            hook.validate()?;
        }
        Ok(())
    }
}

/// Conversation behavior: messages, timeouts, and transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    pub system_template: String,
    pub goodbye_message: String,
    pub system_error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_dtmf: Option<String>,
    /// Milliseconds to wait for further speech results after the caller
    /// stopped talking.
    #[serde(default = "default_max_speech_wait_timeout")]
    pub max_speech_wait_timeout: u64,
    #[serde(default = "default_true")]
    pub allow_user_barge_in: bool,
    #[serde(default)]
    pub idle_options: IdleOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_options: Option<TransferOptions>,
}

impl ConversationSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.system_template.trim().is_empty() {
            return Err(ValidationError::new(
                "conversationSettings.systemTemplate",
                "must not be empty",
            ));
        }
        if self.idle_options.timeout == 0 {
            return Err(ValidationError::new(
                "conversationSettings.idleOptions.timeout",
                "must be greater than zero",
            ));
        }
        if self.idle_options.max_timeout_count == 0 {
            return Err(ValidationError::new(
                "conversationSettings.idleOptions.maxTimeoutCount",
                "must be greater than zero",
            ));
        }
        if let Some(transfer) = &self.transfer_options {
            if transfer.phone_number.trim().is_empty() {
                return Err(ValidationError::new(
                    "conversationSettings.transferOptions.phoneNumber",
                    "must not be empty",
                ));
            }
            if transfer.timeout == 0 {
                return Err(ValidationError::new(
                    "conversationSettings.transferOptions.timeout",
                    "must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}

/// What to do while the caller stays silent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleOptions {
    #[serde(default = "default_idle_message")]
    pub message: String,
    /// Milliseconds of silence per idle tick.
    #[serde(default = "default_idle_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_idle_timeout_count")]
    pub max_timeout_count: u32,
}

impl Default for IdleOptions {
    fn default() -> Self {
        Self {
            message: default_idle_message(),
            timeout: default_idle_timeout(),
            max_timeout_count: default_max_idle_timeout_count(),
        }
    }
}

/// Where and how to transfer a call when the model asks for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOptions {
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Milliseconds allowed for the transfer to complete.
    #[serde(default = "default_transfer_timeout")]
    pub timeout: u64,
}

/// Supported language model providers.
///
/// All three speak the OpenAI chat-completions protocol and differ only in
/// their default endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageModelProvider {
    Openai,
    Groq,
    Ollama,
}

impl LanguageModelProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Groq => "groq",
            Self::Ollama => "ollama",
        }
    }

    /// Base URL used when the settings do not override it.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Openai => "https://api.openai.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    /// Whether requests must carry an API key.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl fmt::Display for LanguageModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LanguageModelProvider {
    type Err = ParseProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::Openai),
            "groq" => Ok(Self::Groq),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ParseProviderError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown provider string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown language model provider: {0}")]
pub struct ParseProviderError(pub String);

/// A document the assistant may draw on when answering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseSource {
    pub url: String,
}

/// Language model selection and sampling parameters.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageModelSettings {
    pub provider: LanguageModelProvider,
    pub model: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub knowledge_base: Vec<KnowledgeBaseSource>,
    /// Custom tools in addition to the built-in `hangup` and `transfer`.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl fmt::Debug for LanguageModelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageModelSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("base_url", &self.base_url)
            .field("knowledge_base", &self.knowledge_base)
            .field("tools", &self.tools)
            .finish()
    }
}

impl LanguageModelSettings {
    /// Returns the configured base URL or the provider default, without a
    /// trailing slash.
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::new("languageModel.model", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::new(
                "languageModel.temperature",
                format!("{} is outside 0.0..=2.0", self.temperature),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ValidationError::new(
                "languageModel.maxTokens",
                "must be greater than zero",
            ));
        }
        for tool in &self.tools {
            tool.validate_custom()?;
        }
        Ok(())
    }
}
