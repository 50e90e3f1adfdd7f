//! Agentverse - agent execution loop and multi-agent orchestration
//!
//! Runs autonomous agents that call an LLM provider, delegate sub-tasks to
//! network capability servers ("plugins"), and compose into workflows where
//! one agent's output feeds another's input.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, logging and error handling
//! - **LLM**: Provider trait, HTTP adapters and the retrying gateway
//! - **Plugins**: Capability registry, wire protocol and plugin client
//! - **Agent**: Conversation state and the single-agent loop
//! - **Workflow**: Dependency graph, sessions and the orchestrator
//!
//! # Usage
//!
//! ```rust,no_run
//! use agentverse::{Config, OrchestrationSession};
//!
//! #[tokio::main]
//! async fn main() -> agentverse::Result<()> {
//!     let config = Config::load(None)?;
//!     let session = OrchestrationSession::from_config(&config)?;
//!
//!     let outcomes = session.run(serde_json::json!("add 3 and 4")).await?;
//!     for (agent, outcome) in &outcomes {
//!         println!("{}: {}", agent, outcome.status());
//!     }
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod core;
pub mod llm;
pub mod plugins;
pub mod workflow;

// Re-export commonly used items
pub use agent::{AgentDefinition, AgentLoop, AgentOutcome};
pub use core::{AgentverseError, Config, PluginError, ProviderError, Result};
pub use llm::ProviderGateway;
pub use plugins::PluginClient;
pub use workflow::OrchestrationSession;
