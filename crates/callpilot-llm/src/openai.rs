//! Streaming client for OpenAI-compatible chat completion endpoints.
//!
//! OpenAI, Groq, and Ollama all expose `POST {base}/chat/completions` with
//! `stream: true`; the only per-provider difference is the base URL and
//! whether a bearer token is sent.

use crate::error::ModelError;
use crate::knowledge::{build_system_prompt, KnowledgeBase};
use crate::stream::{RawToolCall, StreamAccumulator};
use crate::tools::{execute_custom_tool, tool_definitions};
use crate::{Completion, LanguageModel, ToolCall};
use async_trait::async_trait;
use callpilot_types::{
    is_builtin_name, ChatMessage, ConversationSettings, LanguageModelSettings, ToolDefinition,
};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Maximum custom tool round trips inside one completion.
const MAX_TOOL_ROUNDS: usize = 4;

/// Longest silence tolerated between two stream events.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Debug, Clone, Serialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

/// A tool call that passed validation.
#[derive(Debug)]
struct ParsedCall {
    id: String,
    name: String,
    raw_arguments: String,
    arguments: Value,
}

fn parse_tool_call(raw: RawToolCall, position: usize) -> Result<ParsedCall, ModelError> {
    if raw.name.trim().is_empty() {
        return Err(ModelError::MalformedToolCall(format!(
            "tool call #{} has no name",
            position
        )));
    }
    let arguments = if raw.arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str::<Value>(&raw.arguments).map_err(|e| {
            ModelError::MalformedToolCall(format!("{}: invalid arguments: {}", raw.name, e))
        })?
    };
    if !arguments.is_object() {
        return Err(ModelError::MalformedToolCall(format!(
            "{}: arguments must be a JSON object",
            raw.name
        )));
    }
    Ok(ParsedCall {
        id: raw.id.unwrap_or_else(|| format!("call_{}", position)),
        name: raw.name,
        raw_arguments: raw.arguments,
        arguments,
    })
}

/// Language model handle for one session.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    system_prompt: String,
    tools: Vec<ToolDefinition>,
}

impl OpenAiCompatibleModel {
    /// Resolves provider, tools, and system prompt from assistant settings.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Config` when the provider requires an API key and
    /// none is configured.
    pub fn new(
        client: reqwest::Client,
        settings: &LanguageModelSettings,
        conversation: &ConversationSettings,
        knowledge: &KnowledgeBase,
    ) -> Result<Self, ModelError> {
        let api_key = settings.api_key.clone().filter(|k| !k.trim().is_empty());
        if settings.provider.requires_api_key() && api_key.is_none() {
            return Err(ModelError::Config(format!(
                "provider {} requires an API key",
                settings.provider
            )));
        }

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.resolved_base_url()),
            api_key,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            system_prompt: build_system_prompt(
                &conversation.system_template,
                conversation.first_message.as_deref(),
                knowledge,
            ),
            tools: tool_definitions(settings, conversation),
        })
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn wire_tools(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect()
    }

    async fn stream_once(
        &self,
        messages: &[WireMessage],
    ) -> Result<crate::stream::StreamOutput, ModelError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
            tools: self.wire_tools(),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut events = response.bytes_stream().eventsource();
        let mut acc = StreamAccumulator::new();

        while !acc.is_done() {
            match tokio::time::timeout(STREAM_IDLE_TIMEOUT, events.next()).await {
                Ok(Some(Ok(event))) => acc.push(&event.data)?,
                Ok(Some(Err(e))) => {
                    return Err(ModelError::Stream(format!("SSE stream error: {}", e)))
                }
                // Some servers close without [DONE]; what arrived is complete.
                Ok(None) => break,
                Err(_) => {
                    return Err(ModelError::Stream(format!(
                        "SSE stream timeout after {}s",
                        STREAM_IDLE_TIMEOUT.as_secs()
                    )))
                }
            }
        }

        Ok(acc.finish())
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(&self, history: &[ChatMessage]) -> Result<Completion, ModelError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage::text("system", self.system_prompt.clone()));
        messages.extend(
            history
                .iter()
                .map(|m| WireMessage::text(m.role.as_str(), m.content.clone())),
        );

        for _ in 0..MAX_TOOL_ROUNDS {
            let output = self.stream_once(&messages).await?;

            if output.tool_calls.is_empty() {
                let text = output.text.trim();
                if text.is_empty() {
                    return Err(ModelError::EmptyResponse);
                }
                return Ok(Completion::Text(text.to_string()));
            }

            let calls = output
                .tool_calls
                .into_iter()
                .enumerate()
                .map(|(i, raw)| parse_tool_call(raw, i))
                .collect::<Result<Vec<_>, _>>()?;

            let builtin: Vec<&ParsedCall> =
                calls.iter().filter(|c| is_builtin_name(&c.name)).collect();
            if builtin.len() > 1 {
                return Err(ModelError::MalformedToolCall(format!(
                    "{} conflicting call-control tool calls in one response",
                    builtin.len()
                )));
            }
            if let Some(call) = builtin.first() {
                if !self.tools.iter().any(|t| t.name == call.name) {
                    return Err(ModelError::UnknownTool(call.name.clone()));
                }
            }

            let mut results = Vec::new();
            for call in calls.iter().filter(|c| !is_builtin_name(&c.name)) {
                let tool = self
                    .tools
                    .iter()
                    .find(|t| t.name == call.name)
                    .ok_or_else(|| ModelError::UnknownTool(call.name.clone()))?;
                let result = execute_custom_tool(&self.client, tool, &call.arguments).await?;
                results.push((call, result));
            }

            if let Some(call) = builtin.first() {
                return Ok(Completion::ToolCall(ToolCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                }));
            }

            messages.push(WireMessage {
                role: "assistant",
                content: (!output.text.is_empty()).then(|| output.text.clone()),
                tool_calls: Some(
                    results
                        .iter()
                        .map(|(call, _)| WireToolCall {
                            id: call.id.clone(),
                            kind: "function",
                            function: WireFunction {
                                name: call.name.clone(),
                                arguments: call.raw_arguments.clone(),
                            },
                        })
                        .collect(),
                ),
                tool_call_id: None,
            });
            for (call, result) in results {
                messages.push(WireMessage {
                    role: "tool",
                    content: Some(result),
                    tool_calls: None,
                    tool_call_id: Some(call.id.clone()),
                });
            }
        }

        Err(ModelError::ToolLoop(MAX_TOOL_ROUNDS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_arguments_become_empty_object() {
        let call = parse_tool_call(
            RawToolCall {
                id: None,
                name: "hangup".to_string(),
                arguments: String::new(),
            },
            0,
        )
        .unwrap();
        assert_eq!(call.arguments, json!({}));
        assert_eq!(call.id, "call_0");
    }

    #[test]
    fn nameless_or_non_object_calls_are_malformed() {
        let nameless = RawToolCall {
            id: Some("x".to_string()),
            name: " ".to_string(),
            arguments: "{}".to_string(),
        };
        assert!(matches!(
            parse_tool_call(nameless, 0),
            Err(ModelError::MalformedToolCall(_))
        ));

        let array_args = RawToolCall {
            id: None,
            name: "transfer".to_string(),
            arguments: "[1,2]".to_string(),
        };
        assert!(matches!(
            parse_tool_call(array_args, 1),
            Err(ModelError::MalformedToolCall(_))
        ));

        let truncated = RawToolCall {
            id: None,
            name: "transfer".to_string(),
            arguments: "{\"reason\":".to_string(),
        };
        assert!(matches!(
            parse_tool_call(truncated, 2),
            Err(ModelError::MalformedToolCall(_))
        ));
    }
}
