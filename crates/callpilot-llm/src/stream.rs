//! Accumulation of OpenAI-style `chat.completion.chunk` SSE payloads.

use crate::error::ModelError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct ChunkData {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// A tool call assembled from stream fragments, not yet validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

/// What one streamed completion produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutput {
    pub text: String,
    pub tool_calls: Vec<RawToolCall>,
}

fn extract_api_error(event: &Value) -> Option<String> {
    let error = event.get("error")?;
    if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("An error occurred during streaming".to_string())
}

/// Folds SSE `data:` payloads into text and tool calls.
///
/// Tool call fragments are keyed by their `index` so arguments split over
/// many chunks are concatenated in order.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    tool_calls: BTreeMap<usize, RawToolCall>,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Consumes one `data:` payload.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Api` for error payloads and `ModelError::Stream`
    /// for data that is not a completion chunk.
    pub fn push(&mut self, data: &str) -> Result<(), ModelError> {
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }
        if data.is_empty() {
            return Ok(());
        }

        let event: Value = serde_json::from_str(data)
            .map_err(|e| ModelError::Stream(format!("SSE parsing error: {}, data: {}", e, data)))?;

        if let Some(message) = extract_api_error(&event) {
            return Err(ModelError::Api {
                status: 200,
                message,
            });
        }

        let chunk: ChunkData = serde_json::from_value(event)
            .map_err(|e| ModelError::Stream(format!("SSE data schema error: {}", e)))?;

        let Some(choice) = chunk.choices.into_iter().next() else {
            // Usage-only and keepalive chunks carry no choices.
            return Ok(());
        };

        if let Some(content) = choice.delta.content {
            self.text.push_str(&content);
        }

        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let call = self.tool_calls.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                call.id = Some(id);
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    call.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    call.arguments.push_str(&arguments);
                }
            }
        }

        Ok(())
    }

    pub fn finish(self) -> StreamOutput {
        StreamOutput {
            text: self.text,
            tool_calls: self.tool_calls.into_values().collect(),
        }
    }
}
