//! Error types for the language model adapter.

/// Errors surfaced by [`crate::LanguageModel::complete`].
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The settings cannot produce a working model handle.
    #[error("model configuration error: {0}")]
    Config(String),

    /// The HTTP request to the provider failed.
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an error status or an error payload.
    #[error("model API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The completion stream broke, stalled, or carried undecodable data.
    #[error("model stream error: {0}")]
    Stream(String),

    /// A tool call without a name or with arguments that are not a JSON object.
    #[error("malformed tool call: {0}")]
    MalformedToolCall(String),

    /// The model called a tool that was never offered to it.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A custom tool's HTTP operation failed.
    #[error("tool {name} failed: {reason}")]
    ToolExecution { name: String, reason: String },

    /// Neither text nor a tool call came back.
    #[error("model returned an empty response")]
    EmptyResponse,

    /// The model kept calling custom tools past the round limit.
    #[error("model exceeded {0} tool rounds")]
    ToolLoop(usize),
}
