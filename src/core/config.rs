//! Configuration management for agentverse
//!
//! The configuration is a read-only lookup table handed to a session at
//! construction: provider names to endpoints/credentials/defaults,
//! capability names to plugin endpoints, agent definitions and the
//! workflow edges.
//!
//! Config file location: ~/.config/agentverse/config.toml (or
//! `AGENTVERSE_CONFIG`, or an explicit path).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{AgentverseError, Result};
use crate::plugins::schema;

/// Main configuration for agentverse
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Provider retry policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Plugin client defaults
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Provider table keyed by provider name
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
    /// Capability table
    #[serde(default)]
    pub capabilities: Vec<CapabilityConfig>,
    /// Agent definitions
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Workflow graph
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// Directory prompt files are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
    /// Optional log file, appended to
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Provider retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts for a provider call, including the first
    #[serde(default = "default_max_attempts")]
    pub provider_max_attempts: u32,
    /// Delay before the first retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for any retry delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Plugin client defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Per-invocation timeout when the agent does not set one
    #[serde(default = "default_plugin_timeout_secs")]
    pub default_timeout_secs: u64,
}

/// Supported provider families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    OpenAi,
    Azure,
    Gemini,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Ollama => write!(f, "ollama"),
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Azure => write!(f, "azure"),
            ProviderKind::Gemini => write!(f, "gemini"),
        }
    }
}

/// One entry of the provider table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider family
    pub kind: ProviderKind,
    /// API base URL (defaults per kind)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Azure API version
    #[serde(default)]
    pub api_version: Option<String>,
    /// Default model (deployment name for Azure)
    pub model: String,
    /// Default sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Default output token cap
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Per-call timeout in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

/// One entry of the capability table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Capability name, as the LLM calls it
    pub name: String,
    /// Plugin endpoint URL
    pub endpoint: String,
    /// Description advertised to the LLM
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,
    /// Declared result schema (JSON Schema)
    #[serde(default)]
    pub result_schema: Option<serde_json::Value>,
}

/// One agent definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent id, unique within the file
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Inline system prompt template
    #[serde(default)]
    pub system_prompt: String,
    /// Prompt fragments appended to the inline template, in order
    #[serde(default)]
    pub prompt_files: Vec<PathBuf>,
    /// Provider name from the provider table
    pub provider: String,
    /// Model override
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Capabilities this agent may invoke
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Maximum provider calls per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Number of recent messages sent to the provider (all when unset)
    #[serde(default)]
    pub context_window: Option<usize>,
    /// Plugin timeout override in seconds
    #[serde(default)]
    pub plugin_timeout_secs: Option<u64>,
}

/// Workflow graph configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Cancel the rest of the current run when any agent fails
    #[serde(default)]
    pub cancel_on_failure: bool,
    /// Producer -> consumer edges
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
}

/// A dependency edge: `to` consumes `fields` of `from`'s output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    4_000
}

fn default_plugin_timeout_secs() -> u64 {
    30
}

fn default_provider_timeout_secs() -> u64 {
    120
}

fn default_max_iterations() -> usize {
    10
}

fn default_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            provider_max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_plugin_timeout_secs(),
        }
    }
}

impl ProviderSettings {
    /// Base URL, falling back to the public endpoint of the provider family
    pub fn base_url(&self) -> String {
        let url = match (&self.base_url, self.kind) {
            (Some(url), _) => url.as_str(),
            (None, ProviderKind::Ollama) => "http://localhost:11434",
            (None, ProviderKind::OpenAi) => "https://api.openai.com/v1",
            (None, ProviderKind::Gemini) => "https://generativelanguage.googleapis.com/v1beta",
            // Azure has no public default; validate() rejects it
            (None, ProviderKind::Azure) => "",
        };
        url.trim_end_matches('/').to_string()
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| env::var(name).ok())
            .filter(|key| !key.is_empty())
    }
}

impl AgentConfig {
    /// Assemble the system prompt template from the inline text and files
    pub fn system_prompt_template(&self, base_dir: &Path) -> Result<String> {
        let mut parts = Vec::with_capacity(self.prompt_files.len() + 1);
        if !self.system_prompt.trim().is_empty() {
            parts.push(self.system_prompt.clone());
        }

        for file in &self.prompt_files {
            let path = if file.is_absolute() {
                file.clone()
            } else {
                base_dir.join(file)
            };
            let content = fs::read_to_string(&path).map_err(|e| {
                AgentverseError::config(format!(
                    "Failed to read prompt file {} for agent '{}': {}",
                    path.display(),
                    self.id,
                    e
                ))
            })?;
            parts.push(content);
        }

        Ok(parts.join("\n").trim().to_string())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agentverse")
    }

    /// Get the default config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file and environment
    /// Priority: explicit path > AGENTVERSE_CONFIG > default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        let path = match path {
            Some(p) => p.to_path_buf(),
            None => env::var("AGENTVERSE_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| Self::config_file()),
        };

        let content = fs::read_to_string(&path).map_err(|e| {
            AgentverseError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without touching the environment
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.base_dir = PathBuf::from(".");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("AGENTVERSE_LOG") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Check cross-references between the tables
    pub fn validate(&self) -> Result<()> {
        for (name, provider) in &self.providers {
            if provider.kind == ProviderKind::Azure && provider.base_url.is_none() {
                return Err(AgentverseError::config(format!(
                    "Provider '{}' is azure and needs a base_url",
                    name
                )));
            }
            url::Url::parse(&provider.base_url()).map_err(|e| {
                AgentverseError::config(format!("Provider '{}' has an invalid base_url: {}", name, e))
            })?;
        }

        let mut capability_names = HashSet::new();
        for capability in &self.capabilities {
            if !capability_names.insert(capability.name.as_str()) {
                return Err(AgentverseError::config(format!(
                    "Capability '{}' is declared twice",
                    capability.name
                )));
            }
            url::Url::parse(&capability.endpoint).map_err(|e| {
                AgentverseError::config(format!(
                    "Capability '{}' has an invalid endpoint: {}",
                    capability.name, e
                ))
            })?;
            if let Some(schema) = &capability.result_schema {
                schema::compile(schema).map_err(|e| {
                    AgentverseError::config(format!("Capability '{}': {}", capability.name, e))
                })?;
            }
        }

        let mut agent_ids = HashSet::new();
        for agent in &self.agents {
            if !agent_ids.insert(agent.id.as_str()) {
                return Err(AgentverseError::config(format!(
                    "Agent '{}' is declared twice",
                    agent.id
                )));
            }
            if !self.providers.contains_key(&agent.provider) {
                return Err(AgentverseError::config(format!(
                    "Agent '{}' uses unknown provider '{}'",
                    agent.id, agent.provider
                )));
            }
            if agent.max_iterations == 0 {
                return Err(AgentverseError::config(format!(
                    "Agent '{}' needs max_iterations >= 1",
                    agent.id
                )));
            }
            if agent.context_window == Some(0) {
                return Err(AgentverseError::config(format!(
                    "Agent '{}' needs context_window >= 1",
                    agent.id
                )));
            }
            if let Some(missing) = agent
                .capabilities
                .iter()
                .find(|c| !capability_names.contains(c.as_str()))
            {
                return Err(AgentverseError::config(format!(
                    "Agent '{}' is permitted unknown capability '{}'",
                    agent.id, missing
                )));
            }
        }

        Ok(())
    }

    /// Look up an agent definition by id
    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == id)
    }
}
