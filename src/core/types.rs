//! Shared types used across agentverse modules
//!
//! Contains message structures, tool calls and their results.

use serde::{Deserialize, Serialize};

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message
    pub content: String,
    /// Tool calls requested by the assistant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Correlation id of the call a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create an assistant message carrying tool calls
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, content)
        }
    }

    /// Create a tool message from a plugin result
    pub fn tool(result: &ToolResult) -> Self {
        Self {
            tool_call_id: Some(result.correlation_id.clone()),
            ..Self::with_role(Role::Tool, result.to_message_content())
        }
    }

    /// Whether the assistant asked for tools in this message
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A tool call made by the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id, unique within one conversation
    pub id: String,
    /// Capability to invoke
    pub name: String,
    /// JSON arguments for the capability
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Definition of a tool advertised to the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name of the capability
    pub name: String,
    /// Description of what it does
    pub description: String,
    /// JSON Schema for the arguments
    pub parameters: serde_json::Value,
}

/// Machine-readable failure detail of a tool result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
}

/// Result of a plugin invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Correlation id of the originating call
    pub correlation_id: String,
    /// Capability that was invoked
    pub capability: String,
    /// Whether the invocation succeeded
    pub success: bool,
    /// Structured payload (null on failure)
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(call: &ToolCall, payload: serde_json::Value) -> Self {
        Self {
            correlation_id: call.id.clone(),
            capability: call.name.clone(),
            success: true,
            payload,
            error: None,
        }
    }

    /// Create a failed result
    pub fn failure(call: &ToolCall, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            correlation_id: call.id.clone(),
            capability: call.name.clone(),
            success: false,
            payload: serde_json::Value::Null,
            error: Some(ToolError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// Render the result as tool message content
    pub fn to_message_content(&self) -> String {
        let body = match &self.error {
            None => serde_json::json!({ "result": self.payload }),
            Some(err) => serde_json::json!({
                "error": { "code": err.code, "message": err.message }
            }),
        };
        body.to_string()
    }
}
