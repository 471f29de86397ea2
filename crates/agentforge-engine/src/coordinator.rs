//! C11 — Plan execution coordinator.
//!
//! Drives the plan and execution state machines (§3, §4.C11): each ready
//! subtask is snapshotted, given isolated context, and run through the
//! dialogue engine; dependency results are threaded into later subtasks'
//! context; failures propagate to transitive dependents.

use std::collections::HashMap;

use crate::agent::{self, AgentType};
use crate::conversation::{Conversation, ConversationSnapshot, Message};
use crate::dialogue::{self, StreamChunk};
use crate::error::CoreError;
use crate::event_bus::{Event, EventBus};
use crate::hitl::{ApprovalStore, HitlPolicy};
use crate::llm::LlmClient;
use crate::plan::{self, DependencyResult, ExecutionState, ExecutionStateMachine, Plan, SubtaskStatus};
use crate::resolver;
use crate::types::{safe_truncate, SubtaskId};

/// Bound applied to a subtask's result before it is propagated to dependents
/// (§4.C11 item 2: "truncated deterministically to a bounded preview").
const RESULT_PREVIEW_MAX_BYTES: usize = 500;

/// A resumption record persisted when a subtask's turn pauses for approval
/// (§4.C11 item 2/3, §3 "Plan snapshot").
#[derive(Debug, Clone)]
pub struct ResumptionRecord {
    pub plan_id: String,
    pub subtask_id: SubtaskId,
    pub snapshot: ConversationSnapshot,
}

pub enum ExecuteOutcome {
    /// The plan ran to completion (success or failure); carries every subtask
    /// dialogue chunk produced along the way, in order, for the caller to
    /// forward to its own stream consumer (§4.C11 item 2).
    Finished(Vec<StreamChunk>),
    /// A subtask paused waiting for human approval; persist `resumption` to
    /// resume later. Also carries chunks produced before the pause.
    WaitingApproval(ResumptionRecord, Vec<StreamChunk>),
}

/// `executePlan(planId, sessionId)` (§4.C11 item 1).
#[allow(clippy::too_many_arguments)]
pub async fn execute_plan(
    plan: &mut Plan,
    exec_state: &mut ExecutionStateMachine,
    conversation: &mut Conversation,
    dep_results: &mut HashMap<String, DependencyResult>,
    llm_client: &LlmClient,
    model: &str,
    hitl_policy: &HitlPolicy,
    approval_store: &mut ApprovalStore,
    event_bus: &EventBus,
) -> Result<ExecuteOutcome, CoreError> {
    plan::start_plan(plan).or_else(|e| if plan.status == crate::plan::PlanStatus::InProgress { Ok(()) } else { Err(e) })?;
    let mut previous_agent: Option<AgentType> = None;
    let mut forwarded: Vec<StreamChunk> = Vec::new();

    loop {
        if plan.status.is_terminal() {
            return Ok(ExecuteOutcome::Finished(forwarded));
        }

        let ready: Vec<SubtaskId> = resolver::get_ready_subtasks(plan).into_iter().map(|s| s.id.clone()).collect();
        let any_running = plan.subtasks.iter().any(|s| s.status == SubtaskStatus::Running);

        if ready.is_empty() && !any_running {
            plan::fail_plan(plan)?;
            let reason = "no ready or running subtasks remain".to_string();
            event_bus.publish(Event::PlanFailed { plan_id: plan.id.clone(), reason });
            return Err(CoreError::PlanDeadlock(plan.id.to_string()));
        }

        for subtask_id in ready {
            let outcome = execute_subtask(
                plan,
                exec_state,
                &subtask_id,
                conversation,
                dep_results,
                &mut previous_agent,
                llm_client,
                model,
                hitl_policy,
                approval_store,
                event_bus,
            )
            .await?;

            match outcome {
                ExecuteOutcome::WaitingApproval(record, chunks) => {
                    forwarded.extend(chunks);
                    return Ok(ExecuteOutcome::WaitingApproval(record, forwarded));
                }
                ExecuteOutcome::Finished(chunks) => {
                    forwarded.extend(chunks);
                }
            }

            let subtask_failed = plan.get_subtask(&subtask_id).is_some_and(|s| s.status == SubtaskStatus::Failed);
            if subtask_failed {
                let dependents: Vec<SubtaskId> = resolver::get_transitive_dependents(plan, &subtask_id)
                    .into_iter()
                    .map(|s| s.id.clone())
                    .collect();
                for dependent in &dependents {
                    let _ = plan::mark_subtask(
                        plan,
                        dependent,
                        SubtaskStatus::Running,
                        None,
                        None,
                    );
                    let _ = plan::mark_subtask(
                        plan,
                        dependent,
                        SubtaskStatus::Failed,
                        None,
                        Some("upstream dependency failed".to_string()),
                    );
                    event_bus.publish(Event::SubtaskFailed { plan_id: plan.id.clone(), subtask_id: dependent.clone(), error: "upstream dependency failed".to_string() });
                }
                plan::fail_plan(plan)?;
                let reason = plan.get_subtask(&subtask_id).and_then(|s| s.error.clone()).unwrap_or_default();
                event_bus.publish(Event::SubtaskFailed { plan_id: plan.id.clone(), subtask_id: subtask_id.clone(), error: reason.clone() });
                event_bus.publish(Event::PlanFailed { plan_id: plan.id.clone(), reason });
                return Ok(ExecuteOutcome::Finished(forwarded));
            }
        }

        if plan.subtasks.iter().all(|s| s.status == SubtaskStatus::Done) {
            plan::complete_plan(plan)?;
            event_bus.publish(Event::PlanCompleted { plan_id: plan.id.clone() });
            return Ok(ExecuteOutcome::Finished(forwarded));
        }
    }
}

/// `executeSubtask(plan, subtask, sessionId)` (§4.C11 item 2).
#[allow(clippy::too_many_arguments)]
async fn execute_subtask(
    plan: &mut Plan,
    exec_state: &mut ExecutionStateMachine,
    subtask_id: &SubtaskId,
    conversation: &mut Conversation,
    dep_results: &mut HashMap<String, DependencyResult>,
    previous_agent: &mut Option<AgentType>,
    llm_client: &LlmClient,
    model: &str,
    hitl_policy: &HitlPolicy,
    approval_store: &mut ApprovalStore,
    event_bus: &EventBus,
) -> Result<ExecuteOutcome, CoreError> {
    plan::mark_subtask(plan, subtask_id, SubtaskStatus::Running, None, None)?;
    event_bus.publish(Event::SubtaskStarted { plan_id: plan.id.clone(), subtask_id: subtask_id.clone() });

    let subtask = plan.get_subtask(subtask_id).expect("just marked running").clone();
    let snapshot = conversation.create_snapshot();

    if let Some(prev) = *previous_agent {
        if prev != subtask.target_agent {
            conversation.clear_tool_messages_with_context(prev.as_str(), subtask.target_agent.as_str());
        }
    }
    *previous_agent = Some(subtask.target_agent);

    let context = format_subtask_context(&subtask, dep_results);
    conversation.append_message(Message::system(context))?;

    let allowed_tools = agent::get(subtask.target_agent).allowed_tools.clone();
    let chunks = dialogue::handle(
        conversation,
        subtask.target_agent,
        llm_client,
        model,
        Some(allowed_tools.as_slice()),
        hitl_policy,
        approval_store,
        event_bus,
        None,
    )
    .await;

    // dialogue::handle forwards each chunk of this subtask's turn to the outer
    // stream consumer, the way plan execution's own chunks are (§4.C11 item 2).
    let forwarded = chunks.clone();

    for chunk in &chunks {
        match chunk {
            StreamChunk::ToolCall { requires_approval: true, .. } => {
                exec_state.transition_to(ExecutionState::WaitingApproval, "subtask tool call requires approval")?;
                let record = ResumptionRecord { plan_id: plan.id.to_string(), subtask_id: subtask_id.clone(), snapshot };
                return Ok(ExecuteOutcome::WaitingApproval(record, forwarded));
            }
            StreamChunk::Error { message, .. } => {
                plan::mark_subtask(plan, subtask_id, SubtaskStatus::Failed, None, Some(message.clone()))?;
                conversation.restore_from_snapshot(&snapshot);
                event_bus.publish(Event::SubtaskFailed { plan_id: plan.id.clone(), subtask_id: subtask_id.clone(), error: message.clone() });
                return Ok(ExecuteOutcome::Finished(forwarded));
            }
            StreamChunk::AssistantMessage { content, .. } => {
                let preview = safe_truncate(content, RESULT_PREVIEW_MAX_BYTES).to_string();
                plan::mark_subtask(plan, subtask_id, SubtaskStatus::Done, Some(content.clone()), None)?;
                dep_results.insert(
                    subtask_id.to_string(),
                    DependencyResult {
                        subtask_id: subtask_id.clone(),
                        description: subtask.description.clone(),
                        agent: subtask.target_agent,
                        result_preview: preview,
                    },
                );
                conversation.restore_from_snapshot(&snapshot);
                let _ = conversation.append_message(Message::assistant(content.clone(), None));
                event_bus.publish(Event::SubtaskCompleted { plan_id: plan.id.clone(), subtask_id: subtask_id.clone() });
            }
            _ => {}
        }
    }

    Ok(ExecuteOutcome::Finished(forwarded))
}

/// `resume(planId, approvalOutcome)` (§4.C11 item 3).
pub fn resume_approved(exec_state: &mut ExecutionStateMachine) -> Result<(), CoreError> {
    exec_state.transition_to(ExecutionState::Resumed, "approval granted")?;
    exec_state.transition_to(ExecutionState::Running, "resuming plan execution")
}

pub fn resume_rejected(plan: &mut Plan, exec_state: &mut ExecutionStateMachine, feedback: Option<String>) -> Result<(), CoreError> {
    exec_state.transition_to(ExecutionState::Cancelled, feedback.unwrap_or_else(|| "approval rejected".to_string()))?;
    plan::cancel_plan(plan)
}

/// Format the per-subtask context system message: description plus a summary
/// of its direct dependencies' results (§4.C11 item 4).
fn format_subtask_context(subtask: &crate::plan::Subtask, dep_results: &HashMap<String, DependencyResult>) -> String {
    let mut out = format!("Subtask: {}", subtask.description);
    if !subtask.dependencies.is_empty() {
        out.push_str("\n\nDependency results:\n");
        for dep_id in &subtask.dependencies {
            if let Some(result) = dep_results.get(dep_id.as_str()) {
                out.push_str(&format!("- {} ({}): {}\n", result.description, result.agent, result.result_preview));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentType;
    use crate::plan::SubtaskSpec;
    use crate::types::ConversationId;

    #[test]
    fn subtask_context_includes_dependency_summaries() {
        let spec = SubtaskSpec {
            id: SubtaskId::from("s2"),
            description: "do the second thing".to_string(),
            target_agent: AgentType::Coder,
            dependencies: vec![SubtaskId::from("s1")],
            estimated_duration: None,
        };
        let plan = plan::create_plan(
            ConversationId::from("c1"),
            "goal",
            vec![
                SubtaskSpec { id: SubtaskId::from("s1"), description: "first".to_string(), target_agent: AgentType::Coder, dependencies: vec![], estimated_duration: None },
                spec,
            ],
        )
        .unwrap();
        let subtask = plan.get_subtask(&SubtaskId::from("s2")).unwrap();

        let mut dep_results = HashMap::new();
        dep_results.insert(
            "s1".to_string(),
            DependencyResult { subtask_id: SubtaskId::from("s1"), description: "first".to_string(), agent: AgentType::Coder, result_preview: "done".to_string() },
        );

        let context = format_subtask_context(subtask, &dep_results);
        assert!(context.contains("do the second thing"));
        assert!(context.contains("first"));
        assert!(context.contains("done"));
    }

    #[test]
    fn resume_rejected_cancels_plan_and_execution_state() {
        let mut plan = plan::create_plan(ConversationId::from("c1"), "goal", vec![SubtaskSpec { id: SubtaskId::from("s1"), description: "x".into(), target_agent: AgentType::Coder, dependencies: vec![], estimated_duration: None }]).unwrap();
        plan::approve_plan(&mut plan).unwrap();
        plan::start_plan(&mut plan).unwrap();
        let mut exec_state = ExecutionStateMachine::new();
        exec_state.transition_to(ExecutionState::WaitingApproval, "paused").unwrap();
        resume_rejected(&mut plan, &mut exec_state, Some("no".to_string())).unwrap();
        assert_eq!(plan.status, crate::plan::PlanStatus::Cancelled);
        assert_eq!(exec_state.state, ExecutionState::Cancelled);
    }
}
