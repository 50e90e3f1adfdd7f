//! Google Gemini Provider
//!
//! Calls the `generateContent` REST endpoint with an API key. Gemini does
//! not assign ids to function calls; the gateway fills them in.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::core::config::ProviderSettings;
use crate::core::{Message, ProviderError, Result, Role, ToolCall, ToolDefinition};
use crate::llm::provider::{http_client, read_json, send_error};
use crate::llm::traits::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage};

pub struct GeminiProvider {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            base_url: settings.base_url(),
            api_key: settings.api_key(),
            client: http_client(settings.timeout_secs)?,
        })
    }

    /// Build the request body; system messages go to `systemInstruction`
    fn build_body(messages: &[Message], tools: &[ToolDefinition], options: &GenerateOptions) -> Value {
        let mut system = Vec::new();
        let mut contents = Vec::new();
        // functionResponse parts need the capability name of the call they answer
        let mut call_names: HashMap<&str, &str> = HashMap::new();

        for m in messages {
            match m.role {
                Role::System => system.push(json!({ "text": m.content })),
                Role::User => contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": m.content }]
                })),
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !m.content.is_empty() {
                        parts.push(json!({ "text": m.content }));
                    }
                    for call in &m.tool_calls {
                        call_names.insert(call.id.as_str(), call.name.as_str());
                        parts.push(json!({
                            "functionCall": { "name": call.name, "args": call.arguments }
                        }));
                    }
                    contents.push(json!({ "role": "model", "parts": parts }));
                }
                Role::Tool => {
                    let name = m
                        .tool_call_id
                        .as_deref()
                        .and_then(|id| call_names.get(id).copied())
                        .unwrap_or_default();
                    let response: Value = serde_json::from_str(&m.content)
                        .unwrap_or_else(|_| json!({ "result": m.content }));
                    contents.push(json!({
                        "role": "user",
                        "parts": [{ "functionResponse": { "name": name, "response": response } }]
                    }));
                }
            }
        }

        let mut body = json!({ "contents": contents });
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": system });
        }
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        let mut generation = serde_json::Map::new();
        generation.insert("candidateCount".into(), json!(1));
        if let Some(t) = options.temperature {
            generation.insert("temperature".into(), json!(t));
        }
        if let Some(n) = options.max_tokens {
            generation.insert("maxOutputTokens".into(), json!(n));
        }
        body["generationConfig"] = Value::Object(generation);
        body
    }

    fn parse_response(body: &Value, model: &str) -> std::result::Result<LLMResponse, ProviderError> {
        let parts = body["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| ProviderError::Malformed("no candidate content in response".into()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                content.push_str(text);
            }
            if let Some(call) = part.get("functionCall") {
                let name = call["name"].as_str().unwrap_or_default();
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(ToolCall::new("", name, args));
            }
        }

        let meta = &body["usageMetadata"];
        let usage = meta["promptTokenCount"].as_u64().map(|prompt| {
            let completion = meta["candidatesTokenCount"].as_u64().unwrap_or(0);
            let narrow = |count: u64| u32::try_from(count).unwrap_or(u32::MAX);
            TokenUsage::new(narrow(prompt), narrow(completion))
        });

        Ok(LLMResponse {
            content,
            tool_calls,
            usage,
            model: body["modelVersion"].as_str().unwrap_or(model).to_string(),
        })
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &GenerateOptions,
    ) -> std::result::Result<LLMResponse, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let body = Self::build_body(messages, tools, options);

        debug!(provider = "gemini", model, tools = tools.len(), "Sending generateContent request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-goog-api-key", key);
        }

        let response = builder.send().await.map_err(|e| send_error("gemini", e))?;
        let body: Value = read_json("gemini", response).await?;
        Self::parse_response(&body, model)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
