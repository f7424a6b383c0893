//! Tool list assembly and custom tool execution.

use crate::error::ModelError;
use callpilot_types::{
    hangup_tool_definition, transfer_tool_definition, ConversationSettings, LanguageModelSettings,
    ToolDefinition,
};
use serde_json::Value;
use std::time::Duration;

/// Upper bound on a custom tool response fed back to the model (16 KiB).
const MAX_TOOL_RESULT_BYTES: usize = 16 * 1024;

const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Tools offered to the model: the configured custom tools, `hangup`
/// always, and `transfer` only when the conversation can be transferred.
pub fn tool_definitions(
    settings: &LanguageModelSettings,
    conversation: &ConversationSettings,
) -> Vec<ToolDefinition> {
    let mut tools = settings.tools.clone();
    tools.push(hangup_tool_definition());
    if conversation.transfer_options.is_some() {
        tools.push(transfer_tool_definition());
    }
    tools
}

/// Runs the HTTP operation behind a custom tool and returns the response
/// body as the tool result.
///
/// # Errors
///
/// Returns `ModelError::ToolExecution` if the tool has no operation, the
/// request fails, or the endpoint answers with a non-success status.
pub async fn execute_custom_tool(
    client: &reqwest::Client,
    tool: &ToolDefinition,
    arguments: &Value,
) -> Result<String, ModelError> {
    let failed = |reason: String| ModelError::ToolExecution {
        name: tool.name.clone(),
        reason,
    };

    let operation = tool
        .operation
        .as_ref()
        .ok_or_else(|| failed("no operation configured".to_string()))?;

    let mut request = if operation.method.eq_ignore_ascii_case("GET") {
        let query: Vec<(String, String)> = arguments
            .as_object()
            .map(|args| {
                args.iter()
                    .map(|(k, v)| {
                        let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                        (k.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();
        client.get(&operation.url).query(&query)
    } else {
        client.post(&operation.url).json(arguments)
    };
    for (name, value) in &operation.headers {
        request = request.header(name, value);
    }

    let response = request
        .timeout(TOOL_TIMEOUT)
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(failed(format!("endpoint returned {}", status)));
    }

    let mut body = response.text().await.map_err(|e| failed(e.to_string()))?;
    if body.len() > MAX_TOOL_RESULT_BYTES {
        let mut cut = MAX_TOOL_RESULT_BYTES;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    tracing::debug!(tool = %tool.name, bytes = body.len(), "custom tool executed");
    Ok(body)
}
