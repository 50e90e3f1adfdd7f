//! Custom error types for agentverse
//!
//! Provider and plugin errors are kept in their own enums so the retry
//! policy can match on them; everything else funnels into `AgentverseError`.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::agent::AgentOutcome;

/// Errors raised by the provider gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Network, auth or timeout failure. Retried with backoff.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Quota or policy failure. Never retried.
    #[error("provider rejected the request: {0}")]
    Rejected(String),

    /// Response failed validation. Never retried.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Whether the gateway may retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Taxonomy name used in logs and outcome reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "ProviderUnavailable",
            Self::Rejected(_) => "ProviderRejected",
            Self::Malformed(_) => "ProviderMalformed",
        }
    }
}

/// Errors raised by the plugin client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Capability is not registered or not permitted for the caller
    #[error("capability '{0}' not found or not permitted")]
    CapabilityNotFound(String),

    /// No response within the caller-supplied timeout
    #[error("plugin '{capability}' timed out after {timeout:?}")]
    Timeout {
        capability: String,
        timeout: Duration,
    },

    /// Connection to the plugin endpoint failed
    #[error("plugin '{capability}' unreachable: {message}")]
    Unreachable { capability: String, message: String },

    /// Response violated the wire contract or the declared result schema
    #[error("malformed response from plugin '{capability}': {message}")]
    Malformed { capability: String, message: String },

    /// Plugin delivered a structured error object
    #[error("plugin '{capability}' returned error {code}: {message}")]
    Remote {
        capability: String,
        code: String,
        message: String,
    },
}

impl PluginError {
    /// Transient failures get one more attempt with the same timeout
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unreachable { .. })
    }

    /// Machine-readable code injected into the failed tool message
    pub fn code(&self) -> String {
        match self {
            Self::CapabilityNotFound(_) => "CapabilityNotFound".to_string(),
            Self::Timeout { .. } => "PluginTimeout".to_string(),
            Self::Unreachable { .. } => "PluginUnreachable".to_string(),
            Self::Malformed { .. } => "PluginMalformed".to_string(),
            Self::Remote { code, .. } => code.clone(),
        }
    }
}

/// Main error type for agentverse operations
#[derive(Error, Debug)]
pub enum AgentverseError {
    /// Agent used up its provider calls without a final answer
    #[error("agent '{agent}' exceeded its iteration limit of {limit}")]
    IterationLimitExceeded { agent: String, limit: usize },

    /// Agent hit an unrecoverable provider error
    #[error("agent '{agent}' failed: {reason}")]
    AgentFailed { agent: String, reason: String },

    /// Workflow graph has a cycle or an unresolvable edge
    #[error("workflow graph is not a DAG: {}", .agents.join(" -> "))]
    CyclicWorkflow { agents: Vec<String> },

    /// At least one agent failed; completed outcomes are preserved
    #[error("workflow failed at agent '{failed_agent}'")]
    WorkflowFailed {
        failed_agent: String,
        outcomes: BTreeMap<String, AgentOutcome>,
    },

    /// Session cancellation token was raised
    #[error("session cancelled")]
    SessionCancelled {
        outcomes: BTreeMap<String, AgentOutcome>,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for agentverse operations
pub type Result<T> = std::result::Result<T, AgentverseError>;

impl AgentverseError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Partial outcomes carried by workflow-level failures
    pub fn outcomes(&self) -> Option<&BTreeMap<String, AgentOutcome>> {
        match self {
            Self::WorkflowFailed { outcomes, .. } | Self::SessionCancelled { outcomes } => {
                Some(outcomes)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ProviderError::Unavailable("reset".into()).is_retryable());
        assert!(!ProviderError::Rejected("quota".into()).is_retryable());
        assert!(!ProviderError::Malformed("bad json".into()).is_retryable());

        let timeout = PluginError::Timeout {
            capability: "add".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.is_retryable());
        assert!(!PluginError::CapabilityNotFound("add".into()).is_retryable());
    }

    #[test]
    fn test_plugin_error_codes() {
        assert_eq!(
            PluginError::CapabilityNotFound("x".into()).code(),
            "CapabilityNotFound"
        );
        let remote = PluginError::Remote {
            capability: "add".into(),
            code: "DIV_ZERO".into(),
            message: "division by zero".into(),
        };
        assert_eq!(remote.code(), "DIV_ZERO");
    }

    #[test]
    fn test_cycle_message_lists_agents() {
        let err = AgentverseError::CyclicWorkflow {
            agents: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "workflow graph is not a DAG: a -> b -> a");
    }
}
