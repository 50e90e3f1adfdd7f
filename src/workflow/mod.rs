//! Workflow module - multi-agent orchestration
//!
//! Composes agent loops into a DAG, routing one agent's output into the
//! inputs of the agents that depend on it.

pub mod graph;
pub mod orchestrator;
pub mod session;

pub use graph::{Edge, WorkflowGraph};
pub use orchestrator::run;
pub use session::{OrchestrationSession, SessionBuilder};
