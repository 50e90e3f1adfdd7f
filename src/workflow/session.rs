//! Orchestration sessions
//!
//! A session is everything one workflow invocation needs: the agent
//! definitions, the dependency graph, the shared provider gateway and
//! plugin client, and the run-scoped cancellation token.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentDefinition, AgentOutcome};
use crate::core::config::Config;
use crate::core::{AgentverseError, Result};
use crate::llm::ProviderGateway;
use crate::plugins::{CapabilityRegistry, PluginClient};
use crate::workflow::graph::{Edge, WorkflowGraph};
use crate::workflow::orchestrator;

pub struct OrchestrationSession {
    pub(crate) agents: BTreeMap<String, Arc<AgentDefinition>>,
    pub(crate) graph: WorkflowGraph,
    pub(crate) gateway: Arc<ProviderGateway>,
    pub(crate) plugins: Arc<PluginClient>,
    pub(crate) cancel: CancellationToken,
    pub(crate) cancel_on_failure: bool,
}

impl OrchestrationSession {
    pub fn builder(gateway: Arc<ProviderGateway>, plugins: Arc<PluginClient>) -> SessionBuilder {
        SessionBuilder {
            gateway,
            plugins,
            agents: Vec::new(),
            edges: Vec::new(),
            cancel: None,
            cancel_on_failure: false,
        }
    }

    /// Every configured agent plus the workflow edges
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = Self::shared_builder(config)?.cancel_on_failure(config.workflow.cancel_on_failure);
        for agent in &config.agents {
            builder = builder.agent(AgentDefinition::from_config(agent, config)?);
        }
        for edge in &config.workflow.edges {
            builder = builder.edge(Edge::from(edge));
        }
        builder.build()
    }

    /// A session holding one agent and no edges
    pub fn single_agent(config: &Config, agent_id: &str) -> Result<Self> {
        let agent = config
            .agent(agent_id)
            .ok_or_else(|| AgentverseError::config(format!("Unknown agent '{}'", agent_id)))?;
        Self::shared_builder(config)?
            .agent(AgentDefinition::from_config(agent, config)?)
            .build()
    }

    fn shared_builder(config: &Config) -> Result<SessionBuilder> {
        let gateway = ProviderGateway::from_config(config)?;
        let registry = CapabilityRegistry::from_config(&config.capabilities);
        let plugins = PluginClient::http(Arc::new(registry))?;
        Ok(Self::builder(Arc::new(gateway), Arc::new(plugins)))
    }

    /// Handle for cancelling the run from outside
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run every agent to a terminal state
    pub async fn run(&self, input: Value) -> Result<BTreeMap<String, AgentOutcome>> {
        orchestrator::run(self, input).await
    }
}

pub struct SessionBuilder {
    gateway: Arc<ProviderGateway>,
    plugins: Arc<PluginClient>,
    agents: Vec<AgentDefinition>,
    edges: Vec<Edge>,
    cancel: Option<CancellationToken>,
    cancel_on_failure: bool,
}

impl SessionBuilder {
    pub fn agent(mut self, definition: AgentDefinition) -> Self {
        self.agents.push(definition);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Cancel the rest of a run as soon as any of its agents fails
    pub fn cancel_on_failure(mut self, enabled: bool) -> Self {
        self.cancel_on_failure = enabled;
        self
    }

    /// Use an externally owned token instead of a fresh one
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<OrchestrationSession> {
        let mut agents = BTreeMap::new();
        for definition in self.agents {
            if definition.max_iterations == 0 {
                return Err(AgentverseError::config(format!(
                    "Agent '{}' needs max_iterations >= 1",
                    definition.id
                )));
            }
            let id = definition.id.clone();
            if agents.insert(id.clone(), Arc::new(definition)).is_some() {
                return Err(AgentverseError::config(format!("Agent '{}' is declared twice", id)));
            }
        }

        let mut graph = WorkflowGraph::new(agents.keys().cloned());
        for edge in self.edges {
            graph.add_edge(edge);
        }

        Ok(OrchestrationSession {
            agents,
            graph,
            gateway: self.gateway,
            plugins: self.plugins,
            cancel: self.cancel.unwrap_or_else(CancellationToken::new),
            cancel_on_failure: self.cancel_on_failure,
        })
    }
}
