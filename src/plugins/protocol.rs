//! Plugin protocol definitions
//!
//! Defines the JSON request/response format for plugin communication.

use serde::{Deserialize, Deserializer, Serialize};

/// Request sent to a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRequest {
    /// Request ID for correlation
    pub id: String,
    /// Capability to invoke
    pub capability: String,
    /// Arguments passed to the capability
    pub arguments: serde_json::Value,
}

impl PluginRequest {
    /// Create a new request with a fresh id
    pub fn new(capability: &str, arguments: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            capability: capability.to_string(),
            arguments,
        }
    }
}

/// Structured error returned by a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

/// Response from a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResponse {
    /// Request ID this responds to
    pub id: String,
    /// Result value; `Some(Null)` when the plugin sent `"result": null`
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<serde_json::Value>,
    /// Error object (if failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

impl PluginResponse {
    /// Create a success response
    pub fn success(id: &str, result: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: &str, code: &str, message: &str) -> Self {
        Self {
            id: id.to_string(),
            result: None,
            error: Some(RemoteError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = PluginRequest::new("add_numbers", serde_json::json!({"numbers": [3, 4]}));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["capability"], "add_numbers");
        assert_eq!(json["arguments"]["numbers"][0], 3);
        assert!(!request.id.is_empty());
    }

    #[test]
    fn test_null_result_is_present() {
        let response: PluginResponse = serde_json::from_str(r#"{"id":"r1","result":null}"#).unwrap();
        assert_eq!(response.result, Some(serde_json::Value::Null));

        let response: PluginResponse = serde_json::from_str(r#"{"id":"r1"}"#).unwrap();
        assert_eq!(response.result, None);
    }

    #[test]
    fn test_error_response() {
        let response: PluginResponse = serde_json::from_str(
            r#"{"id":"r2","error":{"code":"SMTP_DOWN","message":"mail relay offline"}}"#,
        )
        .unwrap();
        assert_eq!(response.error.unwrap().code, "SMTP_DOWN");
    }
}
