//! Agent loop
//!
//! Drives one agent: provider call, tool-call detection, concurrent plugin
//! dispatch, result injection in call order, repeat until the model answers
//! in plain text, the iteration limit is hit, a provider error is
//! unrecoverable, or the session is cancelled.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::agent::conversation::{ConversationError, ConversationState};
use crate::agent::definition::AgentDefinition;
use crate::agent::loop_state::LoopState;
use crate::core::{AgentverseError, Message, ProviderError, Result};
use crate::llm::{ProviderGateway, TokenUsage};
use crate::plugins::PluginClient;

/// Why an agent failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReason {
    /// Taxonomy name, e.g. `ProviderRejected`
    pub kind: String,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&ProviderError> for FailureReason {
    fn from(err: &ProviderError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Terminal state of one agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    Succeeded {
        output: Value,
        transcript: Vec<Message>,
        usage: TokenUsage,
        iterations: usize,
    },
    IterationLimitExceeded {
        transcript: Vec<Message>,
        usage: TokenUsage,
        limit: usize,
    },
    Failed {
        error: FailureReason,
        transcript: Vec<Message>,
        usage: TokenUsage,
    },
    Cancelled,
    /// Not started because a dependency did not succeed
    Skipped { blocked_by: String },
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Failed or ran out of iterations
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::IterationLimitExceeded { .. })
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::Succeeded { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn transcript(&self) -> &[Message] {
        match self {
            Self::Succeeded { transcript, .. }
            | Self::IterationLimitExceeded { transcript, .. }
            | Self::Failed { transcript, .. } => transcript,
            Self::Cancelled | Self::Skipped { .. } => &[],
        }
    }

    pub fn usage(&self) -> TokenUsage {
        match self {
            Self::Succeeded { usage, .. }
            | Self::IterationLimitExceeded { usage, .. }
            | Self::Failed { usage, .. } => *usage,
            Self::Cancelled | Self::Skipped { .. } => TokenUsage::default(),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::IterationLimitExceeded { .. } => "iteration_limit_exceeded",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
            Self::Skipped { .. } => "skipped",
        }
    }

    /// The output, or the error a standalone run reports
    pub fn into_result(self, agent: &str) -> Result<Value> {
        match self {
            Self::Succeeded { output, .. } => Ok(output),
            Self::IterationLimitExceeded { limit, .. } => Err(AgentverseError::IterationLimitExceeded {
                agent: agent.to_string(),
                limit,
            }),
            Self::Failed { error, .. } => Err(AgentverseError::AgentFailed {
                agent: agent.to_string(),
                reason: error.to_string(),
            }),
            Self::Skipped { blocked_by } => Err(AgentverseError::AgentFailed {
                agent: agent.to_string(),
                reason: format!("skipped, blocked by '{}'", blocked_by),
            }),
            Self::Cancelled => Err(AgentverseError::SessionCancelled {
                outcomes: Default::default(),
            }),
        }
    }
}

/// Final assistant text as structured output
pub fn parse_output(text: &str) -> Value {
    serde_json::from_str(text.trim()).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Runs one agent definition against the shared gateway and plugin client
#[derive(Clone)]
pub struct AgentLoop {
    definition: Arc<AgentDefinition>,
    gateway: Arc<ProviderGateway>,
    plugins: Arc<PluginClient>,
}

impl AgentLoop {
    pub fn new(
        definition: Arc<AgentDefinition>,
        gateway: Arc<ProviderGateway>,
        plugins: Arc<PluginClient>,
    ) -> Self {
        Self {
            definition,
            gateway,
            plugins,
        }
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    /// Run to a terminal state
    pub async fn run(&self, input: &Value, cancel: &CancellationToken) -> AgentOutcome {
        let span = info_span!("agent", agent = %self.definition.id);
        self.run_inner(input, cancel).instrument(span).await
    }

    async fn run_inner(&self, input: &Value, cancel: &CancellationToken) -> AgentOutcome {
        let def = &*self.definition;
        let mut conversation =
            ConversationState::new(def.render_system_prompt(input), def.user_message(input));
        let tools = self.plugins.registry().tool_definitions(&def.capabilities);
        let mut state = LoopState::new(def.max_iterations);

        info!(max_iterations = def.max_iterations, tools = tools.len(), "Agent started");

        loop {
            if !state.can_call_provider() {
                warn!(limit = def.max_iterations, "Iteration limit reached without a final answer");
                return AgentOutcome::IterationLimitExceeded {
                    transcript: conversation.into_messages(),
                    usage: state.usage,
                    limit: def.max_iterations,
                };
            }

            state.start_provider_call();
            let iteration = state.iteration;
            let window = conversation.window(&def.trim);
            debug!(iteration, messages = window.len(), "Calling provider");

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(iteration, "Cancelled while awaiting provider");
                    return AgentOutcome::Cancelled;
                }
                response = self.gateway.complete(&window, &def.provider, &tools) => response,
            };

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    warn!(iteration, kind = err.kind(), error = %err, "Provider call failed");
                    return Self::failed(FailureReason::from(&err), conversation, &state);
                }
            };
            state.record_usage(response.usage.as_ref());

            if let Err(err) = conversation.push_assistant(response.to_message()) {
                return Self::failed(history_violation(err), conversation, &state);
            }

            if response.tool_calls.is_empty() {
                state.terminate();
                info!(
                    iterations = state.iteration,
                    total_tokens = state.usage.total_tokens,
                    "Agent finished"
                );
                return AgentOutcome::Succeeded {
                    output: parse_output(&response.content),
                    transcript: conversation.into_messages(),
                    usage: state.usage,
                    iterations: state.iteration,
                };
            }

            let calls = response.tool_calls;
            state.await_plugins(calls.len());
            debug!(iteration, count = calls.len(), "Dispatching tool calls");

            // Polled concurrently, collected in call order
            let dispatch = join_all(
                calls
                    .iter()
                    .map(|call| self.plugins.invoke(call, &def.capabilities, def.plugin_timeout)),
            );
            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(iteration, "Cancelled while awaiting plugins");
                    return AgentOutcome::Cancelled;
                }
                results = dispatch => results,
            };

            for result in &results {
                debug!(
                    capability = %result.capability,
                    correlation_id = %result.correlation_id,
                    success = result.success,
                    "Tool result"
                );
                if let Err(err) = conversation.push_tool_result(result) {
                    return Self::failed(history_violation(err), conversation, &state);
                }
            }
            state.plugins_resolved();
        }
    }

    fn failed(error: FailureReason, conversation: ConversationState, state: &LoopState) -> AgentOutcome {
        AgentOutcome::Failed {
            error,
            transcript: conversation.into_messages(),
            usage: state.usage,
        }
    }
}

/// A provider response that breaks the history invariants
fn history_violation(err: ConversationError) -> FailureReason {
    FailureReason::from(&ProviderError::Malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolCall;
    use crate::llm::{GenerateOptions, LLMProvider, LLMResponse, ProviderConfig, RetryPolicy};
    use crate::plugins::{Capability, CapabilityRegistry, PluginRequest, PluginResponse, PluginTransport};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted(Mutex<Vec<LLMResponse>>);

    #[async_trait]
    impl LLMProvider for Scripted {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[Message],
            _tools: &[crate::core::ToolDefinition],
            _options: &GenerateOptions,
        ) -> std::result::Result<LLMResponse, ProviderError> {
            let mut script = self.0.lock().unwrap();
            if script.is_empty() {
                return Err(ProviderError::Rejected("script exhausted".into()));
            }
            Ok(script.remove(0))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Adder;

    #[async_trait]
    impl PluginTransport for Adder {
        async fn exchange(
            &self,
            _endpoint: &str,
            request: &PluginRequest,
        ) -> std::result::Result<PluginResponse, crate::core::PluginError> {
            let sum: i64 = request.arguments["numbers"]
                .as_array()
                .map(|n| n.iter().filter_map(Value::as_i64).sum())
                .unwrap_or(0);
            Ok(PluginResponse::success(&request.id, serde_json::json!(sum)))
        }
    }

    fn agent(script: Vec<LLMResponse>, max_iterations: usize) -> AgentLoop {
        let gateway = ProviderGateway::new(RetryPolicy::none())
            .with_provider("local", Arc::new(Scripted(Mutex::new(script))));
        let registry = CapabilityRegistry::new().with(Capability::new("add_numbers", "http://plugins/add"));
        let plugins = PluginClient::new(Arc::new(registry), Arc::new(Adder));
        let definition = AgentDefinition::new("calculator", ProviderConfig::new("local", "llama3.1"))
            .with_capabilities(["add_numbers"])
            .with_max_iterations(max_iterations);
        AgentLoop::new(Arc::new(definition), Arc::new(gateway), Arc::new(plugins))
    }

    fn add_call(id: &str) -> LLMResponse {
        LLMResponse::tools(vec![ToolCall::new(id, "add_numbers", serde_json::json!({"numbers": [3, 4]}))])
    }

    #[tokio::test]
    async fn test_tool_round_trip_then_answer() {
        let agent = agent(
            vec![
                add_call("c1").with_usage(TokenUsage::new(10, 3)),
                LLMResponse::text(r#"{"sum": 7}"#).with_usage(TokenUsage::new(20, 4)),
            ],
            5,
        );
        let outcome = agent.run(&Value::String("add 3 and 4".into()), &CancellationToken::new()).await;

        let AgentOutcome::Succeeded { output, transcript, usage, iterations } = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(output, serde_json::json!({"sum": 7}));
        assert_eq!(iterations, 2);
        assert_eq!(usage.total_tokens, 37);
        // user, assistant(tool call), tool, assistant
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(transcript[2].content, r#"{"result":7}"#);
    }

    #[tokio::test]
    async fn test_plain_text_output_is_wrapped() {
        let agent = agent(vec![LLMResponse::text("The sum is 7.")], 1);
        let outcome = agent.run(&Value::Null, &CancellationToken::new()).await;
        assert_eq!(outcome.output(), Some(&Value::String("The sum is 7.".into())));
    }

    #[tokio::test]
    async fn test_reused_correlation_id_fails_agent() {
        let agent = agent(vec![add_call("c1"), add_call("c1")], 5);
        let outcome = agent.run(&Value::Null, &CancellationToken::new()).await;
        let AgentOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert_eq!(error.kind, "ProviderMalformed");
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let outcome = agent(vec![LLMResponse::text("hi")], 1).run(&Value::Null, &token).await;
        assert_eq!(outcome, AgentOutcome::Cancelled);
    }

    #[test]
    fn test_into_result_maps_errors() {
        let outcome = AgentOutcome::IterationLimitExceeded {
            transcript: vec![],
            usage: TokenUsage::default(),
            limit: 3,
        };
        assert!(matches!(
            outcome.into_result("calculator"),
            Err(AgentverseError::IterationLimitExceeded { limit: 3, .. })
        ));
    }
}
