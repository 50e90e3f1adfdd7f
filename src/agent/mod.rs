//! Agent module - single-agent execution
//!
//! Contains agent definitions, conversation state and the loop that drives
//! one agent between the provider gateway and the plugin client.

pub mod agent_loop;
pub mod conversation;
pub mod definition;
pub mod loop_state;

pub use agent_loop::{parse_output, AgentLoop, AgentOutcome, FailureReason};
pub use conversation::{ConversationError, ConversationState, TrimPolicy};
pub use definition::AgentDefinition;
pub use loop_state::{AgentState, LoopState};
