//! C13 — Event bus: a single in-process publish/subscribe structure.
//!
//! Grounded in spec.md §4.C13. Handlers are registered at startup (no dynamic
//! subscription); `publish` isolates handler failures and logs them rather
//! than propagating.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agent::AgentType;
use crate::resilience::CircuitBreakerStats;
use crate::types::{ApprovalId, ConversationId, PlanId, SubtaskId};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    RequestStarted { conversation_id: ConversationId, correlation_id: Option<String> },
    RequestCompleted { conversation_id: ConversationId, correlation_id: Option<String> },
    RequestFailed { conversation_id: ConversationId, correlation_id: Option<String>, error: String },
    ToolApprovalRequested { conversation_id: ConversationId, approval_id: ApprovalId, tool_name: String },
    HitlDecisionMade { conversation_id: ConversationId, approval_id: ApprovalId, approved: bool },
    SubtaskStarted { plan_id: PlanId, subtask_id: SubtaskId },
    SubtaskCompleted { plan_id: PlanId, subtask_id: SubtaskId },
    SubtaskFailed { plan_id: PlanId, subtask_id: SubtaskId, error: String },
    PlanCreated { conversation_id: ConversationId, plan_id: PlanId, subtask_count: usize },
    PlanApproved { plan_id: PlanId },
    PlanCompleted { plan_id: PlanId },
    /// A plan ended in `failed` (deadlock, or a subtask failure that could
    /// not be recovered) — distinct from `PlanCompleted`'s success case so a
    /// consumer can tell the two apart (§4.C11 item 1, §7 `PlanDeadlock`).
    PlanFailed { plan_id: PlanId, reason: String },
    AgentSwitched { conversation_id: ConversationId, from: AgentType, to: AgentType },
}

impl Event {
    fn kind(&self) -> &'static str {
        match self {
            Event::RequestStarted { .. } => "request_started",
            Event::RequestCompleted { .. } => "request_completed",
            Event::RequestFailed { .. } => "request_failed",
            Event::ToolApprovalRequested { .. } => "tool_approval_requested",
            Event::HitlDecisionMade { .. } => "hitl_decision_made",
            Event::SubtaskStarted { .. } => "subtask_started",
            Event::SubtaskCompleted { .. } => "subtask_completed",
            Event::SubtaskFailed { .. } => "subtask_failed",
            Event::PlanCreated { .. } => "plan_created",
            Event::PlanApproved { .. } => "plan_approved",
            Event::PlanCompleted { .. } => "plan_completed",
            Event::PlanFailed { .. } => "plan_failed",
            Event::AgentSwitched { .. } => "agent_switched",
        }
    }
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event);
}

/// Built-in handler: mirrors events into the JSONL audit/security logs via
/// `agentforge-config::observability`.
pub struct AuditLogHandler;

impl EventHandler for AuditLogHandler {
    fn handle(&self, event: &Event) {
        match event {
            Event::PlanCreated { conversation_id, plan_id, subtask_count } => {
                agentforge_config::observability::audit_plan_created(conversation_id.as_str(), plan_id.as_str(), *subtask_count);
            }
            Event::SubtaskStarted { plan_id, subtask_id } => {
                agentforge_config::observability::audit_subtask_transition(plan_id.as_str(), subtask_id.as_str(), "started");
            }
            Event::SubtaskCompleted { plan_id, subtask_id } => {
                agentforge_config::observability::audit_subtask_transition(plan_id.as_str(), subtask_id.as_str(), "completed");
            }
            Event::SubtaskFailed { plan_id, subtask_id, .. } => {
                agentforge_config::observability::audit_subtask_transition(plan_id.as_str(), subtask_id.as_str(), "failed");
            }
            Event::ToolApprovalRequested { conversation_id, approval_id, tool_name } => {
                agentforge_config::observability::audit_hitl_requested(conversation_id.as_str(), approval_id.as_str(), tool_name);
            }
            Event::HitlDecisionMade { conversation_id, approval_id, approved } => {
                agentforge_config::observability::audit_hitl_decided(conversation_id.as_str(), approval_id.as_str(), *approved, "user");
            }
            Event::AgentSwitched { conversation_id, from, to } => {
                agentforge_config::observability::audit_agent_switch_completed(conversation_id.as_str(), from.as_str(), to.as_str());
            }
            Event::PlanFailed { plan_id, reason } => {
                agentforge_config::observability::audit_plan_failed(plan_id.as_str(), reason);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
struct MetricsSnapshot {
    requests_started: u64,
    requests_completed: u64,
    requests_failed: u64,
    subtasks_completed: u64,
    subtasks_failed: u64,
    plans_failed: u64,
    last_updated: DateTime<Utc>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            requests_started: 0,
            requests_completed: 0,
            requests_failed: 0,
            subtasks_completed: 0,
            subtasks_failed: 0,
            plans_failed: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Built-in handler: a simple in-process counter collector. A separate
/// timer-driven scrape can additionally read a `CircuitBreaker::get_stats()`
/// snapshot (§4.C14); this handler only aggregates bus traffic.
pub struct MetricsCollector {
    snapshot: RwLock<MetricsSnapshot>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self { snapshot: RwLock::new(MetricsSnapshot::default()) }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> (u64, u64, u64, u64, u64, u64) {
        let s = self.snapshot.read().expect("metrics lock poisoned");
        (
            s.requests_started,
            s.requests_completed,
            s.requests_failed,
            s.subtasks_completed,
            s.subtasks_failed,
            s.plans_failed,
        )
    }

    pub fn record_circuit_stats(&self, _stats: &CircuitBreakerStats) {
        let mut s = self.snapshot.write().expect("metrics lock poisoned");
        s.last_updated = Utc::now();
    }
}

impl EventHandler for MetricsCollector {
    fn handle(&self, event: &Event) {
        let mut s = self.snapshot.write().expect("metrics lock poisoned");
        match event {
            Event::RequestStarted { .. } => s.requests_started += 1,
            Event::RequestCompleted { .. } => s.requests_completed += 1,
            Event::RequestFailed { .. } => s.requests_failed += 1,
            Event::SubtaskCompleted { .. } => s.subtasks_completed += 1,
            Event::SubtaskFailed { .. } => s.subtasks_failed += 1,
            Event::PlanFailed { .. } => s.plans_failed += 1,
            _ => {}
        }
        s.last_updated = Utc::now();
    }
}

/// In-process pub/sub (§4.C13). Handlers registered at construction are run,
/// in registration order, on every `publish`; a handler panic/failure never
/// blocks the others.
pub struct EventBus {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl EventBus {
    pub fn new(handlers: Vec<Box<dyn EventHandler>>) -> Self {
        Self { handlers }
    }

    /// Default wiring: audit log writer then metrics collector (§4.C13:
    /// "built-in handlers are an audit log writer and a metrics collector").
    pub fn with_defaults() -> Self {
        Self::new(vec![Box::new(AuditLogHandler), Box::new(MetricsCollector::new())])
    }

    pub fn publish(&self, event: Event) {
        for handler in &self.handlers {
            let kind = event.kind();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler.handle(&event)));
            if result.is_err() {
                tracing::error!(event = %kind, "event bus handler panicked; isolated from other handlers");
            }
        }
    }
}
