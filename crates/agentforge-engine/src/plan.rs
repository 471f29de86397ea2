//! C9 — Planner / plan model, plus the per-plan execution state machine (§3).
//!
//! The domain model and the planner's validation rules are grounded in
//! spec.md §3/§4.C9. The execution state machine's transition table is
//! grounded directly in
//! `original_source/agent-runtime/app/domain/entities/execution_state.py`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentType;
use crate::error::CoreError;
use crate::resolver;
use crate::types::{ConversationId, PlanId, SubtaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Approved,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub description: String,
    pub target_agent: AgentType,
    pub dependencies: Vec<SubtaskId>,
    pub status: SubtaskStatus,
    pub estimated_duration: Option<u64>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input shape for `create_plan` (§4.C9: "each subtask spec supplies id,
/// description, target agent, optional dependency ids, optional estimated duration").
#[derive(Debug, Clone)]
pub struct SubtaskSpec {
    pub id: SubtaskId,
    pub description: String,
    pub target_agent: AgentType,
    pub dependencies: Vec<SubtaskId>,
    pub estimated_duration: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub conversation_id: ConversationId,
    pub goal: String,
    pub status: PlanStatus,
    pub subtasks: Vec<Subtask>,
    pub current_subtask_id: Option<SubtaskId>,
    pub metadata: serde_json::Value,
    pub approved_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Plan {
    pub fn get_subtask(&self, id: &SubtaskId) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| &s.id == id)
    }

    fn get_subtask_mut(&mut self, id: &SubtaskId) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| &s.id == id)
    }
}

/// `createPlan` (§4.C9): validates id uniqueness, no self-deps, dependency
/// existence, and acyclicity before returning a `draft` plan.
pub fn create_plan(conversation_id: ConversationId, goal: impl Into<String>, specs: Vec<SubtaskSpec>) -> Result<Plan, CoreError> {
    let mut seen = std::collections::HashSet::new();
    for spec in &specs {
        if !seen.insert(spec.id.clone()) {
            return Err(CoreError::InvalidPlan(format!("duplicate subtask id: {}", spec.id)));
        }
    }
    for spec in &specs {
        if spec.dependencies.iter().any(|d| d == &spec.id) {
            return Err(CoreError::InvalidPlan(format!("subtask {} depends on itself", spec.id)));
        }
        for dep in &spec.dependencies {
            if !seen.contains(dep) {
                return Err(CoreError::InvalidPlan(format!(
                    "subtask {} depends on unknown subtask {}",
                    spec.id, dep
                )));
            }
        }
    }

    let subtasks: Vec<Subtask> = specs
        .into_iter()
        .map(|spec| Subtask {
            id: spec.id,
            description: spec.description,
            target_agent: spec.target_agent,
            dependencies: spec.dependencies,
            status: SubtaskStatus::Pending,
            estimated_duration: spec.estimated_duration,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        })
        .collect();

    let plan = Plan {
        id: PlanId::generate(),
        conversation_id,
        goal: goal.into(),
        status: PlanStatus::Draft,
        subtasks,
        current_subtask_id: None,
        metadata: serde_json::json!({}),
        approved_at: None,
        started_at: None,
        completed_at: None,
    };

    if resolver::has_cycles(&plan) {
        return Err(CoreError::InvalidPlan(format!("plan {} has a cyclic dependency graph", plan.id)));
    }

    Ok(plan)
}

/// `approvePlan` (§4.C9): legal only from `draft`.
pub fn approve_plan(plan: &mut Plan) -> Result<(), CoreError> {
    if plan.status != PlanStatus::Draft {
        return Err(CoreError::InvalidPlan(format!("plan {} is not in draft", plan.id)));
    }
    plan.status = PlanStatus::Approved;
    plan.approved_at = Some(Utc::now());
    Ok(())
}

/// `startPlan` (§4.C9): legal only from `approved`.
pub fn start_plan(plan: &mut Plan) -> Result<(), CoreError> {
    if plan.status != PlanStatus::Approved {
        return Err(CoreError::InvalidPlan(format!("plan {} is not approved", plan.id)));
    }
    plan.status = PlanStatus::InProgress;
    plan.started_at = Some(Utc::now());
    Ok(())
}

/// `markSubtask` (§4.C9): enforces pending → running → done|failed, failed →
/// pending (retry). Re-completing a `done` subtask is a no-op returning `false`.
pub fn mark_subtask(
    plan: &mut Plan,
    subtask_id: &SubtaskId,
    status: SubtaskStatus,
    result: Option<String>,
    error: Option<String>,
) -> Result<bool, CoreError> {
    let subtask = plan
        .get_subtask_mut(subtask_id)
        .ok_or_else(|| CoreError::InvalidPlan(format!("unknown subtask {subtask_id}")))?;

    if subtask.status == SubtaskStatus::Done && status == SubtaskStatus::Done {
        return Ok(false);
    }

    let legal = matches!(
        (subtask.status, status),
        (SubtaskStatus::Pending, SubtaskStatus::Running)
            | (SubtaskStatus::Running, SubtaskStatus::Done)
            | (SubtaskStatus::Running, SubtaskStatus::Failed)
            | (SubtaskStatus::Failed, SubtaskStatus::Pending)
    );
    if !legal {
        return Err(CoreError::InvalidPlan(format!(
            "illegal subtask transition {:?} -> {:?} for {subtask_id}",
            subtask.status, status
        )));
    }

    match status {
        SubtaskStatus::Running => subtask.started_at = Some(Utc::now()),
        SubtaskStatus::Done | SubtaskStatus::Failed => subtask.completed_at = Some(Utc::now()),
        SubtaskStatus::Pending => {
            subtask.started_at = None;
            subtask.completed_at = None;
        }
    }
    subtask.status = status;
    subtask.result = result;
    subtask.error = error;
    Ok(true)
}

fn transition_terminal(plan: &mut Plan, status: PlanStatus) -> Result<(), CoreError> {
    if plan.status.is_terminal() {
        return Err(CoreError::InvalidPlan(format!("plan {} is already terminal", plan.id)));
    }
    plan.status = status;
    plan.completed_at = Some(Utc::now());
    Ok(())
}

pub fn complete_plan(plan: &mut Plan) -> Result<(), CoreError> {
    transition_terminal(plan, PlanStatus::Completed)
}

pub fn fail_plan(plan: &mut Plan) -> Result<(), CoreError> {
    transition_terminal(plan, PlanStatus::Failed)
}

pub fn cancel_plan(plan: &mut Plan) -> Result<(), CoreError> {
    transition_terminal(plan, PlanStatus::Cancelled)
}

// ─── Execution state machine (§3 "Execution state machine (per plan)") ─────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    WaitingApproval,
    Resumed,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled)
    }

    /// Mirrors `execution_state.py::ALLOWED_TRANSITIONS`: `WaitingApproval`
    /// must pass through `Resumed` before returning to `Running` — it can
    /// never transition there directly.
    fn allowed_targets(&self) -> &'static [ExecutionState] {
        match self {
            ExecutionState::Running => &[
                ExecutionState::WaitingApproval,
                ExecutionState::Completed,
                ExecutionState::Failed,
                ExecutionState::Cancelled,
            ],
            ExecutionState::WaitingApproval => &[ExecutionState::Resumed, ExecutionState::Cancelled],
            ExecutionState::Resumed => &[ExecutionState::Running],
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: ExecutionState) -> bool {
        self.allowed_targets().contains(&target)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTransition {
    pub from: ExecutionState,
    pub to: ExecutionState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Tracks a single plan's execution state plus its transition history,
/// grounded in `ExecutionStateManager` (`execution_state.py`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStateMachine {
    pub state: ExecutionState,
    pub history: Vec<ExecutionTransition>,
}

impl ExecutionStateMachine {
    pub fn new() -> Self {
        Self { state: ExecutionState::Running, history: Vec::new() }
    }

    pub fn transition_to(&mut self, target: ExecutionState, reason: impl Into<String>) -> Result<(), CoreError> {
        if !self.state.can_transition_to(target) {
            return Err(CoreError::InvalidPlan(format!(
                "illegal execution transition {:?} -> {target:?}",
                self.state
            )));
        }
        self.history.push(ExecutionTransition {
            from: self.state,
            to: target,
            reason: reason.into(),
            timestamp: Utc::now(),
        });
        self.state = target;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_waiting_approval(&self) -> bool {
        self.state == ExecutionState::WaitingApproval
    }
}

impl Default for ExecutionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// `{subtaskId, description, agent, resultPreview}` entry stored by the
/// coordinator's per-plan dependency-result map (§4.C11 item 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyResult {
    pub subtask_id: SubtaskId,
    pub description: String,
    pub agent: AgentType,
    pub result_preview: String,
}

pub type DependencyResultMap = HashMap<String, DependencyResult>;

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, deps: &[&str]) -> SubtaskSpec {
        SubtaskSpec {
            id: SubtaskId::from(id),
            description: format!("do {id}"),
            target_agent: AgentType::Coder,
            dependencies: deps.iter().map(|d| SubtaskId::from(*d)).collect(),
            estimated_duration: None,
        }
    }

    #[test]
    fn create_plan_rejects_self_dependency() {
        let err = create_plan(ConversationId::from("c1"), "goal", vec![spec("s1", &["s1"])]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPlan(_)));
    }

    #[test]
    fn create_plan_rejects_missing_dependency() {
        let err = create_plan(ConversationId::from("c1"), "goal", vec![spec("s1", &["s0"])]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPlan(_)));
    }

    #[test]
    fn create_plan_rejects_cycle() {
        let err = create_plan(
            ConversationId::from("c1"),
            "goal",
            vec![spec("s1", &["s2"]), spec("s2", &["s1"])],
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPlan(_)));
    }

    #[test]
    fn plan_lifecycle_draft_to_in_progress() {
        let mut plan = create_plan(ConversationId::from("c1"), "goal", vec![spec("s1", &[])]).unwrap();
        assert_eq!(plan.status, PlanStatus::Draft);
        approve_plan(&mut plan).unwrap();
        assert_eq!(plan.status, PlanStatus::Approved);
        start_plan(&mut plan).unwrap();
        assert_eq!(plan.status, PlanStatus::InProgress);
        assert!(start_plan(&mut plan).is_err());
    }

    #[test]
    fn mark_subtask_recomplete_is_noop_false() {
        let mut plan = create_plan(ConversationId::from("c1"), "goal", vec![spec("s1", &[])]).unwrap();
        let id = plan.subtasks[0].id.clone();
        mark_subtask(&mut plan, &id, SubtaskStatus::Running, None, None).unwrap();
        assert!(mark_subtask(&mut plan, &id, SubtaskStatus::Done, Some("ok".into()), None).unwrap());
        assert!(!mark_subtask(&mut plan, &id, SubtaskStatus::Done, Some("ok2".into()), None).unwrap());
    }

    #[test]
    fn mark_subtask_rejects_illegal_transition() {
        let mut plan = create_plan(ConversationId::from("c1"), "goal", vec![spec("s1", &[])]).unwrap();
        let id = plan.subtasks[0].id.clone();
        let err = mark_subtask(&mut plan, &id, SubtaskStatus::Done, None, None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPlan(_)));
    }

    #[test]
    fn execution_state_waiting_approval_must_go_through_resumed() {
        let mut m = ExecutionStateMachine::new();
        m.transition_to(ExecutionState::WaitingApproval, "approval needed").unwrap();
        assert!(m.transition_to(ExecutionState::Running, "skip resumed").is_err());
        m.transition_to(ExecutionState::Resumed, "approved").unwrap();
        m.transition_to(ExecutionState::Running, "continuing").unwrap();
        assert_eq!(m.state, ExecutionState::Running);
        assert_eq!(m.history.len(), 3);
    }

    #[test]
    fn execution_state_terminal_states_reject_all_transitions() {
        let mut m = ExecutionStateMachine::new();
        m.transition_to(ExecutionState::Completed, "done").unwrap();
        assert!(m.is_terminal());
        assert!(m.transition_to(ExecutionState::Running, "retry").is_err());
    }
}
