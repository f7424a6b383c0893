//! Tool definitions exposed to language models.

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

pub const HANGUP_TOOL_NAME: &str = "hangup";
pub const TRANSFER_TOOL_NAME: &str = "transfer";

/// A function the language model may call instead of answering in text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object.
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
    /// HTTP operation backing a custom tool. Built-in tools have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<ToolOperation>,
}

/// The HTTP request issued when a custom tool is called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOperation {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn empty_parameters() -> Value {
    json!({ "type": "object", "properties": {} })
}

impl ToolDefinition {
    pub fn is_builtin(&self) -> bool {
        is_builtin_name(&self.name)
    }

    /// Validates a tool supplied through configuration.
    ///
    /// # Errors
    ///
    /// Rejects tools that shadow a built-in name, have no operation, or use
    /// an unsupported HTTP method.
    pub fn validate_custom(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("tools.name", "must not be empty"));
        }
        if self.is_builtin() {
            return Err(ValidationError::new(
                "tools.name",
                format!("'{}' is reserved for a built-in tool", self.name),
            ));
        }
        let Some(operation) = &self.operation else {
            return Err(ValidationError::new(
                "tools.operation",
                format!("custom tool '{}' has no operation", self.name),
            ));
        };
        if !matches!(operation.method.to_ascii_uppercase().as_str(), "GET" | "POST") {
            return Err(ValidationError::new(
                "tools.operation.method",
                format!("unsupported method {}", operation.method),
            ));
        }
        url::Url::parse(&operation.url)
            .map_err(|e| ValidationError::new("tools.operation.url", e.to_string()))?;
        Ok(())
    }
}

pub fn is_builtin_name(name: &str) -> bool {
    name == HANGUP_TOOL_NAME || name == TRANSFER_TOOL_NAME
}

/// Ends the call after saying goodbye.
pub fn hangup_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: HANGUP_TOOL_NAME.to_string(),
        description: "Hangup the call and end the conversation. Use it when the caller \
                      says goodbye or asks to end the call."
            .to_string(),
        parameters: empty_parameters(),
        operation: None,
    }
}

/// Transfers the call to the configured human agent.
pub fn transfer_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: TRANSFER_TOOL_NAME.to_string(),
        description: "Transfer the call to a live agent. Use it when the caller asks \
                      to speak with a human."
            .to_string(),
        parameters: empty_parameters(),
        operation: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: "Looks up an order".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "orderId": { "type": "string" } },
                "required": ["orderId"]
            }),
            operation: Some(ToolOperation {
                method: "post".to_string(),
                url: "https://api.example.com/orders".to_string(),
                headers: HashMap::new(),
            }),
        }
    }

    #[test]
    fn custom_tool_validates() {
        assert!(custom("getOrder").validate_custom().is_ok());
    }

    #[test]
    fn custom_tool_cannot_shadow_builtins() {
        let err = custom("hangup").validate_custom().unwrap_err();
        assert!(err.reason.contains("reserved"));
    }

    #[test]
    fn custom_tool_requires_operation() {
        let mut tool = custom("getOrder");
        tool.operation = None;
        assert!(tool.validate_custom().is_err());
    }

    #[test]
    fn builtins_have_object_schemas() {
        for tool in [hangup_tool_definition(), transfer_tool_definition()] {
            assert!(tool.is_builtin());
            assert_eq!(tool.parameters["type"], "object");
        }
    }
}
