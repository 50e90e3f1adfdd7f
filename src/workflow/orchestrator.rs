//! Workflow orchestrator
//!
//! Schedules the agents of a session over its dependency graph. Agents
//! whose producers have all succeeded run as tokio tasks; a failure skips
//! everything downstream of it while independent branches keep going.
//!
//! Each run gets a child of the session token. Failure-driven cancellation
//! raises only the child, so the session stays usable for the next run.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agent::{AgentLoop, AgentOutcome, FailureReason};
use crate::core::{AgentverseError, Result};
use crate::llm::TokenUsage;
use crate::workflow::session::OrchestrationSession;

/// Run every agent of `session` to a terminal state
///
/// Returns the outcome of each agent, or `CyclicWorkflow` before anything
/// runs, `WorkflowFailed` when an agent failed, `SessionCancelled` when the
/// session token was raised from outside.
pub async fn run(session: &OrchestrationSession, input: Value) -> Result<BTreeMap<String, AgentOutcome>> {
    let order = session.graph.topological_order()?;
    info!(agents = order.len(), edges = session.graph.edges().len(), "Workflow started");

    let mut scheduler = Scheduler::new(session, &order, session.cancel.child_token());
    let mut running: JoinSet<(String, AgentOutcome)> = JoinSet::new();

    loop {
        for id in std::mem::take(&mut scheduler.ready) {
            if scheduler.cancel.is_cancelled() {
                scheduler.complete(&id, AgentOutcome::Cancelled);
                continue;
            }

            let agent_input = match session.graph.project_input(&id, &scheduler.outputs, &input) {
                Ok(agent_input) => agent_input,
                Err(message) => {
                    warn!(agent = %id, %message, "Input projection failed");
                    let outcome = AgentOutcome::Failed {
                        error: FailureReason::new("ProjectionError", message),
                        transcript: Vec::new(),
                        usage: TokenUsage::default(),
                    };
                    scheduler.complete(&id, outcome);
                    continue;
                }
            };

            let Some(definition) = session.agents.get(&id) else {
                continue;
            };
            let agent = AgentLoop::new(
                Arc::clone(definition),
                Arc::clone(&session.gateway),
                Arc::clone(&session.plugins),
            );
            let token = scheduler.cancel.clone();
            info!(agent = %id, "Agent scheduled");

            running.spawn(async move {
                let outcome = AssertUnwindSafe(agent.run(&agent_input, &token))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| AgentOutcome::Failed {
                        error: FailureReason::new("AgentPanicked", "agent task panicked"),
                        transcript: Vec::new(),
                        usage: TokenUsage::default(),
                    });
                (id, outcome)
            });
        }

        match running.join_next().await {
            Some(Ok((id, outcome))) => {
                info!(agent = %id, status = outcome.status(), "Agent finished");
                scheduler.complete(&id, outcome);
            }
            Some(Err(err)) => error!(error = %err, "Agent task aborted"),
            None => break,
        }
    }

    let externally_cancelled = session.cancel.is_cancelled();
    let outcomes = scheduler.finish();

    let usage = outcomes.values().fold(TokenUsage::default(), |mut total, o| {
        total.accumulate(&o.usage());
        total
    });
    info!(
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        "Workflow finished"
    );

    if externally_cancelled {
        return Err(AgentverseError::SessionCancelled { outcomes });
    }

    if let Some(failed_agent) = order.iter().find(|id| outcomes.get(*id).is_some_and(AgentOutcome::is_failure)) {
        return Err(AgentverseError::WorkflowFailed {
            failed_agent: failed_agent.clone(),
            outcomes,
        });
    }

    Ok(outcomes)
}

/// Bookkeeping for which agents may start
struct Scheduler<'a> {
    session: &'a OrchestrationSession,
    /// Token for this run only
    cancel: CancellationToken,
    /// Producers each agent still waits on
    waiting: BTreeMap<String, BTreeSet<String>>,
    ready: BTreeSet<String>,
    outputs: BTreeMap<String, Value>,
    outcomes: BTreeMap<String, AgentOutcome>,
}

impl<'a> Scheduler<'a> {
    fn new(session: &'a OrchestrationSession, order: &[String], cancel: CancellationToken) -> Self {
        let mut waiting = BTreeMap::new();
        let mut ready = BTreeSet::new();
        for id in order {
            let deps: BTreeSet<String> = session
                .graph
                .dependencies(id)
                .into_iter()
                .map(str::to_string)
                .collect();
            if deps.is_empty() {
                ready.insert(id.clone());
            } else {
                waiting.insert(id.clone(), deps);
            }
        }

        Self {
            session,
            cancel,
            waiting,
            ready,
            outputs: BTreeMap::new(),
            outcomes: BTreeMap::new(),
        }
    }

    /// Record a terminal outcome and release or block dependents
    fn complete(&mut self, id: &str, outcome: AgentOutcome) {
        if let Some(output) = outcome.output() {
            self.outputs.insert(id.to_string(), output.clone());
            for dependent in self.session.graph.dependents(id) {
                if let Some(deps) = self.waiting.get_mut(dependent) {
                    deps.remove(id);
                    if deps.is_empty() {
                        self.waiting.remove(dependent);
                        self.ready.insert(dependent.to_string());
                    }
                }
            }
        } else {
            if outcome.is_failure() && self.session.cancel_on_failure && !self.cancel.is_cancelled() {
                warn!(agent = %id, "Cancelling run after agent failure");
                self.cancel.cancel();
            }

            let cancelled = matches!(outcome, AgentOutcome::Cancelled);
            for blocked in self.session.graph.descendants(id) {
                if self.waiting.remove(blocked).is_some() {
                    let downstream = if cancelled {
                        AgentOutcome::Cancelled
                    } else {
                        AgentOutcome::Skipped {
                            blocked_by: id.to_string(),
                        }
                    };
                    info!(agent = %blocked, blocked_by = %id, status = downstream.status(), "Agent not started");
                    self.outcomes.insert(blocked.to_string(), downstream);
                }
            }
        }

        self.outcomes.insert(id.to_string(), outcome);
    }

    /// Every agent that never got an outcome was never started
    fn finish(mut self) -> BTreeMap<String, AgentOutcome> {
        for id in self.session.agents.keys() {
            self.outcomes
                .entry(id.clone())
                .or_insert(AgentOutcome::Cancelled);
        }
        self.outcomes
    }
}
