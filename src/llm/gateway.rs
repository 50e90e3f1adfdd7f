//! Provider gateway
//!
//! Uniform `complete` call over the provider table, with per-call timeout,
//! bounded exponential backoff for transient failures, and response
//! validation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::core::config::{Config, RetryConfig};
use crate::core::{Message, ProviderError, Result, ToolDefinition};
use crate::llm::provider::create_provider;
use crate::llm::traits::{LLMProvider, LLMResponse, ProviderConfig};

/// Bounded exponential backoff for `ProviderUnavailable`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry_index` (1-based), without jitter
    pub fn backoff(&self, retry_index: u32) -> Duration {
        let cap = self.max_backoff.max(self.initial_backoff);
        let shift = retry_index.saturating_sub(1).min(20);
        self.initial_backoff
            .checked_mul(1u32 << shift)
            .unwrap_or(cap)
            .min(cap)
    }

    /// Backoff plus up to 25% random jitter, still capped
    fn jittered_backoff(&self, retry_index: u32) -> Duration {
        let base = self.backoff(retry_index);
        let spread = (base.as_millis() / 4) as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::rng().random_range(0..=spread)
        };
        (base + Duration::from_millis(jitter)).min(self.max_backoff.max(self.initial_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.provider_max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Uniform call interface over the provider table
#[derive(Clone)]
pub struct ProviderGateway {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    retry: RetryPolicy,
}

impl ProviderGateway {
    /// Create an empty gateway
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            providers: HashMap::new(),
            retry,
        }
    }

    /// Build the provider table from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut gateway = Self::new(RetryPolicy::from(&config.retry));
        for (name, settings) in &config.providers {
            gateway.register(name.clone(), create_provider(settings)?);
        }
        Ok(gateway)
    }

    /// Register a provider under `name`
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn LLMProvider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Builder-style registration
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn LLMProvider>) -> Self {
        self.register(name, provider);
        self
    }

    /// Call the configured provider with the conversation
    ///
    /// Only `ProviderUnavailable` is retried. The returned response has a
    /// unique, non-empty correlation id on every tool call.
    pub async fn complete(
        &self,
        messages: &[Message],
        config: &ProviderConfig,
        tools: &[ToolDefinition],
    ) -> std::result::Result<LLMResponse, ProviderError> {
        let provider = self.providers.get(&config.provider).ok_or_else(|| {
            ProviderError::Rejected(format!("provider '{}' is not registered", config.provider))
        })?;

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            debug!(
                provider = %config.provider,
                model = %config.model,
                attempt,
                messages = messages.len(),
                "Calling provider"
            );

            let outcome = tokio::time::timeout(
                config.timeout,
                provider.chat(&config.model, messages, tools, &config.options),
            )
            .await
            .unwrap_or_else(|_| {
                Err(ProviderError::Unavailable(format!(
                    "no response within {:?}",
                    config.timeout
                )))
            });

            match outcome {
                Ok(response) => return validate_response(response),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.jittered_backoff(attempt);
                    warn!(
                        provider = %config.provider,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(provider = %config.provider, attempt, error = %err, "Provider call failed");
                    return Err(err);
                }
            }
        }
    }
}

/// Check the response shape and fill in missing correlation ids
fn validate_response(
    mut response: LLMResponse,
) -> std::result::Result<LLMResponse, ProviderError> {
    if response.tool_calls.is_empty() && response.content.trim().is_empty() {
        return Err(ProviderError::Malformed(
            "response has neither content nor tool calls".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for call in &mut response.tool_calls {
        if call.name.trim().is_empty() {
            return Err(ProviderError::Malformed(
                "tool call without a capability name".to_string(),
            ));
        }

        if let serde_json::Value::String(raw) = &call.arguments {
            call.arguments = serde_json::from_str(raw).map_err(|e| {
                ProviderError::Malformed(format!("arguments of '{}' are not JSON: {}", call.name, e))
            })?;
        }
        if call.arguments.is_null() {
            call.arguments = serde_json::json!({});
        }
        if !call.arguments.is_object() {
            return Err(ProviderError::Malformed(format!(
                "arguments of '{}' are not an object",
                call.name
            )));
        }

        if call.id.trim().is_empty() {
            call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
        }
        if !seen.insert(call.id.clone()) {
            return Err(ProviderError::Malformed(format!(
                "duplicate tool call id '{}'",
                call.id
            )));
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolCall;
    use crate::llm::traits::GenerateOptions;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted results, one per call
    struct ScriptedProvider {
        script: Mutex<Vec<std::result::Result<LLMResponse, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(mut script: Vec<std::result::Result<LLMResponse, ProviderError>>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _options: &GenerateOptions,
        ) -> std::result::Result<LLMResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ProviderError::Rejected("script exhausted".into())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl LLMProvider for SlowProvider {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _options: &GenerateOptions,
        ) -> std::result::Result<LLMResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(LLMResponse::text("too late"))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
        }
    }

    fn config() -> ProviderConfig {
        ProviderConfig::new("test", "model").with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy(10);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_unavailable_then_succeeds() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Unavailable("connection reset".into())),
            Err(ProviderError::Unavailable("connection reset".into())),
            Ok(LLMResponse::text("hello")),
        ]);
        let gateway = ProviderGateway::new(policy(3)).with_provider("test", provider.clone());

        let response = gateway.complete(&[Message::user("hi")], &config(), &[]).await.unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempt_cap() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Unavailable("down".into())),
            Err(ProviderError::Unavailable("down".into())),
            Ok(LLMResponse::text("never reached")),
        ]);
        let gateway = ProviderGateway::new(policy(2)).with_provider("test", provider.clone());

        let err = gateway.complete(&[Message::user("hi")], &config(), &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejected_is_not_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Rejected("quota exceeded".into())),
            Ok(LLMResponse::text("never reached")),
        ]);
        let gateway = ProviderGateway::new(policy(5)).with_provider("test", provider.clone());

        let err = gateway.complete(&[Message::user("hi")], &config(), &[]).await.unwrap_err();
        assert_eq!(err, ProviderError::Rejected("quota exceeded".into()));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_unavailable() {
        let gateway = ProviderGateway::new(RetryPolicy::none()).with_provider("test", Arc::new(SlowProvider));
        let err = gateway.complete(&[Message::user("hi")], &config(), &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let gateway = ProviderGateway::new(RetryPolicy::none());
        let err = gateway.complete(&[], &config(), &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[test]
    fn test_validation_fills_missing_ids() {
        let response = LLMResponse::tools(vec![
            ToolCall::new("", "add_numbers", serde_json::json!({"numbers": [1, 2]})),
            ToolCall::new("", "add_numbers", serde_json::Value::String(r#"{"numbers":[3]}"#.into())),
        ]);
        let response = validate_response(response).unwrap();
        assert!(response.tool_calls[0].id.starts_with("call_"));
        assert_ne!(response.tool_calls[0].id, response.tool_calls[1].id);
        assert_eq!(response.tool_calls[1].arguments["numbers"][0], 3);
    }

    #[test]
    fn test_validation_rejects_bad_shapes() {
        let duplicate = LLMResponse::tools(vec![
            ToolCall::new("c1", "a", serde_json::json!({})),
            ToolCall::new("c1", "b", serde_json::json!({})),
        ]);
        assert!(matches!(validate_response(duplicate), Err(ProviderError::Malformed(_))));

        let not_object = LLMResponse::tools(vec![ToolCall::new("c1", "a", serde_json::json!([1]))]);
        assert!(matches!(validate_response(not_object), Err(ProviderError::Malformed(_))));

        assert!(matches!(
            validate_response(LLMResponse::text("  ")),
            Err(ProviderError::Malformed(_))
        ));
    }
}
