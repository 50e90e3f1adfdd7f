//! Agent loop state management
//!
//! Tracks where a single agent run is in its state machine, how many
//! provider calls it has made, and the token usage so far.

use serde::Serialize;

use crate::llm::TokenUsage;

/// States of one agent run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Conversation seeded, no provider call yet
    Idle,
    /// Waiting on the provider gateway
    AwaitingProvider,
    /// Waiting on `pending` dispatched tool calls
    AwaitingPlugin { pending: usize },
    /// Final
    Terminated,
}

/// State of the agent loop
#[derive(Debug, Clone)]
pub struct LoopState {
    /// Current state
    pub state: AgentState,
    /// Provider calls made so far
    pub iteration: usize,
    /// Maximum allowed provider calls
    pub max_iterations: usize,
    /// Token usage accumulated across provider calls
    pub usage: TokenUsage,
}

impl LoopState {
    /// Create a new loop state with the given iteration limit
    pub fn new(max_iterations: usize) -> Self {
        Self {
            state: AgentState::Idle,
            iteration: 0,
            max_iterations,
            usage: TokenUsage::default(),
        }
    }

    /// Whether another provider call is allowed
    pub fn can_call_provider(&self) -> bool {
        self.state != AgentState::Terminated && self.iteration < self.max_iterations
    }

    /// Enter `AwaitingProvider`, counting the call
    pub fn start_provider_call(&mut self) {
        debug_assert!(matches!(self.state, AgentState::Idle | AgentState::AwaitingProvider));
        self.iteration += 1;
        self.state = AgentState::AwaitingProvider;
    }

    /// Add one response's usage
    pub fn record_usage(&mut self, usage: Option<&TokenUsage>) {
        if let Some(usage) = usage {
            self.usage.accumulate(usage);
        }
    }

    /// Enter `AwaitingPlugin` for a batch of tool calls
    pub fn await_plugins(&mut self, pending: usize) {
        self.state = AgentState::AwaitingPlugin { pending };
    }

    /// All tool results are in; ready for the next provider call
    pub fn plugins_resolved(&mut self) {
        self.state = AgentState::AwaitingProvider;
    }

    pub fn terminate(&mut self) {
        self.state = AgentState::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_state_new() {
        let state = LoopState::new(10);
        assert_eq!(state.iteration, 0);
        assert_eq!(state.max_iterations, 10);
        assert_eq!(state.state, AgentState::Idle);
        assert_eq!(state.usage, TokenUsage::default());
    }

    #[test]
    fn test_iteration_limit() {
        let mut state = LoopState::new(2);
        assert!(state.can_call_provider());

        state.start_provider_call();
        state.await_plugins(3);
        assert_eq!(state.state, AgentState::AwaitingPlugin { pending: 3 });
        state.plugins_resolved();
        assert!(state.can_call_provider());

        state.start_provider_call();
        assert!(!state.can_call_provider()); // Reached max iterations
    }

    #[test]
    fn test_usage_accumulates() {
        let mut state = LoopState::new(5);
        state.record_usage(Some(&TokenUsage::new(10, 2)));
        state.record_usage(None);
        state.record_usage(Some(&TokenUsage::new(5, 1)));
        assert_eq!(state.usage.total_tokens, 18);
    }

    #[test]
    fn test_usage_saturates() {
        let mut state = LoopState::new(5);
        state.record_usage(Some(&TokenUsage::new(u32::MAX - 1, 0)));
        state.record_usage(Some(&TokenUsage::new(5, 5)));
        assert_eq!(state.usage.prompt_tokens, u32::MAX);
        assert_eq!(state.usage.completion_tokens, 5);
        assert_eq!(state.usage.total_tokens, u32::MAX);
    }

    #[test]
    fn test_terminated_stops_loop() {
        let mut state = LoopState::new(5);
        state.terminate();
        assert_eq!(state.state, AgentState::Terminated);
        assert!(!state.can_call_provider());
    }
}
