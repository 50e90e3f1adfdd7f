#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use agentverse::core::{Message, PluginError, ProviderError, ToolCall, ToolDefinition};
use agentverse::llm::{GenerateOptions, LLMProvider, LLMResponse, ProviderGateway, RetryPolicy};
use agentverse::plugins::{
    Capability, CapabilityRegistry, PluginClient, PluginRequest, PluginResponse, PluginTransport,
};

/// One scripted provider turn
pub enum Step {
    Reply(LLMResponse),
    Fail(ProviderError),
}

pub fn text(content: &str) -> Step {
    Step::Reply(LLMResponse::text(content))
}

pub fn calls(calls: &[(&str, &str, Value)]) -> Step {
    Step::Reply(LLMResponse::tools(
        calls
            .iter()
            .map(|(id, name, args)| ToolCall::new(*id, *name, args.clone()))
            .collect(),
    ))
}

/// Replays a script per model name and records every request
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    requests: Mutex<Vec<(String, Vec<Message>)>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(self: &Arc<Self>, model: &str, steps: Vec<Step>) -> Arc<Self> {
        self.scripts
            .lock()
            .unwrap()
            .insert(model.to_string(), steps.into_iter().collect());
        Arc::clone(self)
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|(m, _)| m == model).count()
    }

    /// Messages sent on the `n`th call for `model`
    pub fn request(&self, model: &str, n: usize) -> Vec<Message> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == model)
            .nth(n)
            .map(|(_, messages)| messages.clone())
            .expect("no such request")
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        _tools: &[ToolDefinition],
        _options: &GenerateOptions,
    ) -> Result<LLMResponse, ProviderError> {
        self.requests
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec()));

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(model)
            .and_then(VecDeque::pop_front);
        match step {
            Some(Step::Reply(response)) => Ok(response),
            Some(Step::Fail(err)) => Err(err),
            None => Err(ProviderError::Rejected(format!("script for '{}' exhausted", model))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// How a stub plugin answers one request
#[derive(Clone)]
pub enum Behavior {
    /// Answer with `result` after `delay`
    Ok { delay: Duration, result: Value },
    /// Answer with a structured error
    Error { code: String, message: String },
    /// Never answer
    Hang,
}

pub fn answer(result: Value) -> Behavior {
    Behavior::Ok {
        delay: Duration::ZERO,
        result,
    }
}

pub fn answer_after(delay: Duration, result: Value) -> Behavior {
    Behavior::Ok { delay, result }
}

/// In-process plugin endpoints keyed by capability name
#[derive(Default)]
pub struct StubPlugins {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl StubPlugins {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(self: &Arc<Self>, capability: &str, behavior: Behavior) -> Arc<Self> {
        self.behaviors
            .lock()
            .unwrap()
            .insert(capability.to_string(), behavior);
        Arc::clone(self)
    }

    pub fn calls_to(&self, capability: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(c, _)| c == capability).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PluginTransport for StubPlugins {
    async fn exchange(&self, _endpoint: &str, request: &PluginRequest) -> Result<PluginResponse, PluginError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.capability.clone(), request.arguments.clone()));

        let behavior = self.behaviors.lock().unwrap().get(&request.capability).cloned();
        match behavior {
            Some(Behavior::Ok { delay, result }) => {
                tokio::time::sleep(delay).await;
                Ok(PluginResponse::success(&request.id, result))
            }
            Some(Behavior::Error { code, message }) => Ok(PluginResponse::error(&request.id, &code, &message)),
            Some(Behavior::Hang) => std::future::pending().await,
            None => Err(PluginError::Unreachable {
                capability: request.capability.clone(),
                message: "no stub endpoint".into(),
            }),
        }
    }
}

/// Registry with the capabilities the tests use
pub fn registry() -> CapabilityRegistry {
    CapabilityRegistry::new()
        .with(
            Capability::new("add_numbers", "http://plugins.test/add_numbers")
                .with_description("Adds all the numbers provided in the list.")
                .with_parameters(json!({
                    "type": "object",
                    "properties": { "numbers": { "type": "array", "items": { "type": "number" } } },
                    "required": ["numbers"]
                }))
                .with_result_schema(json!({ "type": "number" })),
        )
        .with(Capability::new("slow_lookup", "http://plugins.test/slow_lookup"))
        .with(Capability::new("fast_lookup", "http://plugins.test/fast_lookup"))
        .with(Capability::new("send_email", "http://plugins.test/send_email"))
}

pub fn gateway(provider: Arc<ScriptedProvider>) -> Arc<ProviderGateway> {
    Arc::new(ProviderGateway::new(RetryPolicy::none()).with_provider("scripted", provider))
}

pub fn plugin_client(plugins: Arc<StubPlugins>) -> Arc<PluginClient> {
    Arc::new(PluginClient::new(Arc::new(registry()), plugins))
}

/// Tool message contents in transcript order
pub fn tool_messages(transcript: &[Message]) -> Vec<(String, Value)> {
    transcript
        .iter()
        .filter(|m| m.role == agentverse::core::Role::Tool)
        .map(|m| {
            (
                m.tool_call_id.clone().unwrap_or_default(),
                serde_json::from_str(&m.content).unwrap_or(Value::Null),
            )
        })
        .collect()
}
