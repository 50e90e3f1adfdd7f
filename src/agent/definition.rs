//! Agent definitions
//!
//! Immutable description of one agent: prompt template, bound provider,
//! permitted capabilities and limits. Built from configuration or with the
//! builder methods.

use std::time::Duration;

use serde_json::Value;

use crate::agent::conversation::TrimPolicy;
use crate::core::config::{AgentConfig, Config};
use crate::core::{AgentverseError, Result};
use crate::llm::ProviderConfig;

/// One agent in a session
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefinition {
    pub id: String,
    pub description: Option<String>,
    /// System prompt; `{{field}}` placeholders are filled from the input
    pub system_prompt: String,
    pub provider: ProviderConfig,
    /// Capabilities the agent may invoke and that are advertised to the LLM
    pub capabilities: Vec<String>,
    /// Maximum provider calls per run
    pub max_iterations: usize,
    pub trim: TrimPolicy,
    pub plugin_timeout: Duration,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, provider: ProviderConfig) -> Self {
        Self {
            id: id.into(),
            description: None,
            system_prompt: String::new(),
            provider,
            capabilities: Vec::new(),
            max_iterations: 10,
            trim: TrimPolicy::Unbounded,
            plugin_timeout: Duration::from_secs(30),
        }
    }

    /// Build from the agent table, resolving provider defaults and prompt files
    pub fn from_config(agent: &AgentConfig, config: &Config) -> Result<Self> {
        let settings = config.providers.get(&agent.provider).ok_or_else(|| {
            AgentverseError::config(format!(
                "Agent '{}' uses unknown provider '{}'",
                agent.id, agent.provider
            ))
        })?;

        let mut provider = ProviderConfig::new(
            agent.provider.clone(),
            agent.model.clone().unwrap_or_else(|| settings.model.clone()),
        )
        .with_timeout(Duration::from_secs(settings.timeout_secs));
        provider.options.temperature = agent.temperature.or(settings.temperature);
        provider.options.max_tokens = agent.max_tokens.or(settings.max_tokens);

        Ok(Self {
            id: agent.id.clone(),
            description: agent.description.clone(),
            system_prompt: agent.system_prompt_template(&config.base_dir)?,
            provider,
            capabilities: agent.capabilities.clone(),
            max_iterations: agent.max_iterations,
            trim: TrimPolicy::from(agent.context_window),
            plugin_timeout: Duration::from_secs(
                agent
                    .plugin_timeout_secs
                    .unwrap_or(config.plugins.default_timeout_secs),
            ),
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_trim(mut self, trim: TrimPolicy) -> Self {
        self.trim = trim;
        self
    }

    pub fn with_plugin_timeout(mut self, timeout: Duration) -> Self {
        self.plugin_timeout = timeout;
        self
    }

    /// System prompt with `{{field}}` replaced by fields of `input`
    ///
    /// Placeholders naming absent fields are left as written.
    pub fn render_system_prompt(&self, input: &Value) -> String {
        let template = &self.system_prompt;
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template.as_str();

        while let Some(open) = rest.find("{{") {
            let Some(close) = rest[open + 2..].find("}}") else {
                break;
            };
            let key = rest[open + 2..open + 2 + close].trim();
            rendered.push_str(&rest[..open]);
            match input.get(key) {
                Some(value) => rendered.push_str(&render_value(value)),
                None => rendered.push_str(&rest[open..open + 4 + close]),
            }
            rest = &rest[open + 4 + close..];
        }

        rendered.push_str(rest);
        rendered
    }

    /// User message seeding the conversation
    pub fn user_message(&self, input: &Value) -> String {
        match input {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
