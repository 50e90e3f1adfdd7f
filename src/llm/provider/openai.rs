//! OpenAI and Azure OpenAI chat-completions provider
//!
//! Both speak the same `/chat/completions` body; they differ in URL layout
//! and in how the key is sent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::config::ProviderSettings;
use crate::core::{Message, ProviderError, Result, Role, ToolCall, ToolDefinition};
use crate::llm::provider::{http_client, read_json, send_error};
use crate::llm::traits::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage};

const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

#[derive(Debug, Clone)]
enum Flavor {
    OpenAi,
    Azure { api_version: String },
}

/// Chat-completions client for OpenAI-compatible endpoints
pub struct OpenAiProvider {
    flavor: Flavor,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    #[serde(default)]
    name: String,
    /// JSON-encoded argument object
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ApiToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

fn function_type() -> String {
    "function".to_string()
}

impl OpenAiProvider {
    /// Provider for api.openai.com or any compatible base URL
    pub fn openai(settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            flavor: Flavor::OpenAi,
            base_url: settings.base_url(),
            api_key: settings.api_key(),
            client: http_client(settings.timeout_secs)?,
        })
    }

    /// Provider for an Azure OpenAI resource; the model is the deployment name
    pub fn azure(settings: &ProviderSettings) -> Result<Self> {
        let api_version = settings
            .api_version
            .clone()
            .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
        Ok(Self {
            flavor: Flavor::Azure { api_version },
            base_url: settings.base_url(),
            api_key: settings.api_key(),
            client: http_client(settings.timeout_secs)?,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        match &self.flavor {
            Flavor::OpenAi => format!("{}/chat/completions", self.base_url),
            Flavor::Azure { api_version } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, model, api_version
            ),
        }
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                },
                content: if m.content.is_empty() && m.has_tool_calls() {
                    None
                } else {
                    Some(m.content.clone())
                },
                tool_calls: if m.has_tool_calls() {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                kind: function_type(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.to_string(),
                                },
                            })
                            .collect(),
                    )
                } else {
                    None
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiTool<'_>> {
        tools
            .iter()
            .map(|t| ApiTool {
                kind: "function",
                function: ApiToolFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect()
    }

    fn to_llm_response(
        response: ChatResponse,
        model: &str,
    ) -> std::result::Result<LLMResponse, ProviderError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("no choices in response".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let arguments = if tc.function.arguments.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&tc.function.arguments).map_err(|e| {
                        ProviderError::Malformed(format!(
                            "arguments of '{}' are not JSON: {}",
                            tc.function.name, e
                        ))
                    })?
                };
                Ok(ToolCall::new(tc.id, tc.function.name, arguments))
            })
            .collect::<std::result::Result<Vec<_>, ProviderError>>()?;

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: response
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
            model: response.model.unwrap_or_else(|| model.to_string()),
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAiProvider {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &GenerateOptions,
    ) -> std::result::Result<LLMResponse, ProviderError> {
        let request = ChatRequest {
            // Azure takes the deployment from the URL
            model: match self.flavor {
                Flavor::OpenAi => Some(model),
                Flavor::Azure { .. } => None,
            },
            messages: Self::to_api_messages(messages),
            tools: Self::to_api_tools(tools),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        debug!(provider = self.name(), model, tools = tools.len(), "Sending completion request");

        let mut builder = self.client.post(self.endpoint(model)).json(&request);
        if let Some(key) = &self.api_key {
            builder = match self.flavor {
                Flavor::OpenAi => builder.bearer_auth(key),
                Flavor::Azure { .. } => builder.header("api-key", key),
            };
        }

        let response = builder
            .send()
            .await
            .map_err(|e| send_error(self.name(), e))?;
        let body: ChatResponse = read_json(self.name(), response).await?;
        Self::to_llm_response(body, model)
    }

    fn name(&self) -> &str {
        match self.flavor {
            Flavor::OpenAi => "openai",
            Flavor::Azure { .. } => "azure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ProviderKind;
    use mockito::Matcher;

    fn settings(kind: ProviderKind, base_url: &str) -> ProviderSettings {
        ProviderSettings {
            kind,
            base_url: Some(base_url.to_string()),
            api_key_env: None,
            api_version: None,
            model: "gpt-4o-mini".into(),
            temperature: None,
            max_tokens: None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_message_conversion_keeps_tool_links() {
        let call = ToolCall::new("call_1", "add_numbers", serde_json::json!({"numbers": [1, 2]}));
        let messages = vec![
            Message::user("add"),
            Message::assistant_with_tools("", vec![call.clone()]),
            Message::tool(&crate::core::ToolResult::success(&call, serde_json::json!(3))),
        ];
        let api = OpenAiProvider::to_api_messages(&messages);

        assert_eq!(api[1].content, None);
        let calls = api[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"numbers":[1,2]}"#);
        assert_eq!(api[2].role, "tool");
        assert_eq!(api[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_parses_tool_calls() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(serde_json::json!({"model": "gpt-4o-mini"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"model":"gpt-4o-mini","choices":[{"message":{"content":null,"tool_calls":[
                    {"id":"call_a","type":"function","function":{"name":"add_numbers","arguments":"{\"numbers\":[3,4]}"}}
                ]}}],"usage":{"prompt_tokens":12,"completion_tokens":5,"total_tokens":17}}"#,
            )
            .create_async()
            .await;

        let provider = OpenAiProvider::openai(&settings(ProviderKind::OpenAi, &server.url())).unwrap();
        let response = provider
            .chat("gpt-4o-mini", &[Message::user("add 3 and 4")], &[], &GenerateOptions::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_a");
        assert_eq!(response.tool_calls[0].arguments["numbers"][1], 4);
        assert_eq!(response.usage.unwrap().total_tokens, 17);
    }

    #[tokio::test]
    async fn test_rate_limit_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("quota exceeded")
            .create_async()
            .await;

        let provider = OpenAiProvider::openai(&settings(ProviderKind::OpenAi, &server.url())).unwrap();
        let err = provider
            .chat("gpt-4o-mini", &[Message::user("hi")], &[], &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let provider = OpenAiProvider::openai(&settings(ProviderKind::OpenAi, &server.url())).unwrap();
        let err = provider
            .chat("gpt-4o-mini", &[Message::user("hi")], &[], &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_azure_uses_deployment_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/openai/deployments/prod-gpt/chat/completions")
            .match_query(Matcher::UrlEncoded("api-version".into(), DEFAULT_AZURE_API_VERSION.into()))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"hello"}}]}"#)
            .create_async()
            .await;

        let provider = OpenAiProvider::azure(&settings(ProviderKind::Azure, &server.url())).unwrap();
        let response = provider
            .chat("prod-gpt", &[Message::user("hi")], &[], &GenerateOptions::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "hello");
        assert_eq!(response.model, "prod-gpt");
    }
}
