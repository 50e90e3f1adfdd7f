//! Conversation history management
//!
//! Append-only message history for one agent run. Tool-call correlation ids
//! are unique for the whole history, and every tool message answers a call
//! that is still pending. Trimming never mutates the history; it only
//! shapes the window sent to the provider.

use std::collections::HashSet;

use thiserror::Error;

use crate::core::{Message, Role, ToolResult};

/// Violations of the history invariants
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error("tool call id '{0}' is already used in this conversation")]
    DuplicateCorrelationId(String),

    #[error("tool result '{0}' does not answer a pending tool call")]
    UnknownCorrelationId(String),

    #[error("{0} tool call(s) are still unresolved")]
    Unresolved(usize),
}

/// Which part of the history is sent to the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrimPolicy {
    /// Send everything
    #[default]
    Unbounded,
    /// System messages plus the last N others
    LastMessages(usize),
}

impl From<Option<usize>> for TrimPolicy {
    fn from(window: Option<usize>) -> Self {
        match window {
            Some(n) => TrimPolicy::LastMessages(n),
            None => TrimPolicy::Unbounded,
        }
    }
}

/// Message history owned by one agent loop
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
    /// Every correlation id ever issued
    seen_ids: HashSet<String>,
    /// Ids issued in the latest assistant turn and not yet answered
    pending: Vec<String>,
}

impl ConversationState {
    /// Seed with the system prompt (skipped when empty) and the user message
    pub fn new(system_prompt: impl Into<String>, user: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        let mut messages = Vec::with_capacity(2);
        if !system_prompt.trim().is_empty() {
            messages.push(Message::system(system_prompt));
        }
        messages.push(Message::user(user));

        Self {
            messages,
            ..Self::default()
        }
    }

    /// Append an assistant turn, registering its tool-call ids
    pub fn push_assistant(&mut self, message: Message) -> Result<(), ConversationError> {
        if !self.pending.is_empty() {
            return Err(ConversationError::Unresolved(self.pending.len()));
        }

        let mut fresh = HashSet::new();
        for call in &message.tool_calls {
            if self.seen_ids.contains(&call.id) || !fresh.insert(call.id.clone()) {
                return Err(ConversationError::DuplicateCorrelationId(call.id.clone()));
            }
        }

        self.pending = message.tool_calls.iter().map(|c| c.id.clone()).collect();
        self.seen_ids.extend(fresh);
        self.messages.push(Message {
            role: Role::Assistant,
            ..message
        });
        Ok(())
    }

    /// Append the tool message answering one pending call
    pub fn push_tool_result(&mut self, result: &ToolResult) -> Result<(), ConversationError> {
        let position = self
            .pending
            .iter()
            .position(|id| *id == result.correlation_id)
            .ok_or_else(|| ConversationError::UnknownCorrelationId(result.correlation_id.clone()))?;

        self.pending.remove(position);
        self.messages.push(Message::tool(result));
        Ok(())
    }

    /// Full history
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Consume into the transcript
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Get message count
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages to send to the provider under `policy`
    ///
    /// System messages are always kept. A window that would start on a tool
    /// message is widened back to the assistant turn that issued the call,
    /// so tool results always travel with their calls.
    pub fn window(&self, policy: &TrimPolicy) -> Vec<Message> {
        let TrimPolicy::LastMessages(size) = *policy else {
            return self.messages.clone();
        };

        let (system, rest): (Vec<&Message>, Vec<&Message>) =
            self.messages.iter().partition(|m| m.role == Role::System);

        let mut start = rest.len().saturating_sub(size.max(1));
        while start > 0 && rest[start].role == Role::Tool {
            start -= 1;
        }

        system
            .into_iter()
            .chain(rest[start..].iter().copied())
            .cloned()
            .collect()
    }
}
