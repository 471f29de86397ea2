//! Domain error kinds (§7). Each variant names one row of the error-kinds
//! table; propagation behaviour is implemented at the call sites that
//! surface errors as `StreamChunk::Error` or return them to use-case callers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("LLM request failed transiently: {0}")]
    TransientLlm(String),

    #[error("LLM request failed permanently: {0}")]
    PermanentLlm(String),

    #[error("circuit breaker is open for {scope}")]
    CircuitOpen { scope: String },

    #[error("agent {agent} may not use tool {tool}")]
    ToolForbidden { agent: String, tool: String },

    #[error("invalid tool call: {0}")]
    InvalidToolCall(String),

    #[error("conversation {0} is inactive")]
    ConversationInactive(String),

    #[error("conversation {0} has reached its message limit")]
    MessageLimit(String),

    #[error("agent in conversation {0} has reached its switch limit")]
    SwitchLimit(String),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("approval request {0} not found")]
    ApprovalNotFound(String),

    #[error("approval request {0} is already in a terminal state")]
    ApprovalTerminal(String),

    #[error("subtask {subtask} cannot run: upstream dependency {upstream} failed")]
    UpstreamDependencyFailed { subtask: String, upstream: String },

    #[error("plan {0} deadlocked: no ready or running subtasks remain")]
    PlanDeadlock(String),
}

impl CoreError {
    /// Whether this error kind is recovered by the retry handler (§4.C14) rather
    /// than surfaced to the stream.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::TransientLlm(_))
    }
}
