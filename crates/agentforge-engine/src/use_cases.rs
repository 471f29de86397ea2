//! C15 — Use-case entry points: ProcessMessage, ProcessToolResult, HandleApproval.
//!
//! Each acquires the conversation's session lock for its entire flow (§4.C12)
//! and returns the ordered `StreamChunk` sequence the gateway forwards to its
//! client. The shared collections below use `tokio::sync::Mutex` rather than
//! `std::sync::Mutex`: several call sites hold a guard across the dialogue
//! engine's LLM round trip, which is only sound with an async-aware mutex.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent::{self, AgentType, ConversationAgent};
use crate::classifier;
use crate::conversation::{Conversation, Message};
use crate::coordinator::{self, ExecuteOutcome, ResumptionRecord};
use crate::dialogue::{self, StreamChunk};
use crate::error::CoreError;
use crate::event_bus::{Event, EventBus};
use crate::hitl::{ApprovalRequestType, ApprovalStore};
use crate::llm::LlmClient;
use crate::plan::{self, DependencyResult, ExecutionStateMachine, Plan};
use crate::session_lock::SessionLockManager;
use crate::types::{ApprovalId, ConversationId};

/// Aggregate, process-wide state a gateway wires up once and shares across
/// use-case calls (§5: these are process-wide singletons; all mutation of a
/// given conversation's data happens under that conversation's session lock).
pub struct Core {
    pub locks: SessionLockManager,
    pub llm_client: LlmClient,
    pub model: String,
    pub hitl_policy: crate::hitl::HitlPolicy,
    pub event_bus: EventBus,
    pub max_switches: u32,

    pub conversations: Mutex<HashMap<ConversationId, Conversation>>,
    pub agents: Mutex<HashMap<ConversationId, ConversationAgent>>,
    pub approvals: Mutex<ApprovalStore>,
    pub plans: Mutex<HashMap<String, Plan>>,
    pub execution_states: Mutex<HashMap<String, ExecutionStateMachine>>,
    pub dependency_results: Mutex<HashMap<String, HashMap<String, DependencyResult>>>,
    pub resumptions: Mutex<HashMap<String, ResumptionRecord>>,
    /// Maps conversation id to the plan currently driving it, if any.
    pub active_plan_for_conversation: Mutex<HashMap<ConversationId, String>>,
}

/// `ProcessMessage(conversationId, userMessage, forcedAgentType?)` (§4.C15).
pub async fn process_message(
    core: Arc<Core>,
    conversation_id: ConversationId,
    user_message: String,
    forced_agent_type: Option<AgentType>,
) -> Vec<StreamChunk> {
    let _guard = core.locks.acquire(&conversation_id).await;

    let mut conversations = core.conversations.lock().await;
    let conversation = conversations
        .entry(conversation_id.clone())
        .or_insert_with(|| Conversation::new(conversation_id.clone()));

    if let Err(e) = conversation.append_message(Message::user(user_message.clone())) {
        return vec![StreamChunk::Error { message: e.to_string(), is_final: true }];
    }

    let mut agents = core.agents.lock().await;
    let conv_agent = agents
        .entry(conversation_id.clone())
        .or_insert_with(|| ConversationAgent::new(conversation_id.clone(), AgentType::Orchestrator, core.max_switches));

    let needs_switch = forced_agent_type.is_some_and(|t| t != conv_agent.current_type);
    if needs_switch {
        let target = forced_agent_type.expect("checked above");
        agentforge_config::observability::audit_agent_switch_requested(conversation_id.as_str(), conv_agent.current_type.as_str(), target.as_str());
        let from = conv_agent.current_type;
        if let Err(e) = conv_agent.switch_to(target, "forced by caller", "high") {
            return vec![StreamChunk::Error { message: e.to_string(), is_final: true }];
        }
        core.event_bus.publish(Event::AgentSwitched { conversation_id: conversation_id.clone(), from, to: target });
    }

    let is_orchestrator = conv_agent.current_type == AgentType::Orchestrator;
    let current_type = conv_agent.current_type;
    drop(agents);

    let routed_agent = if is_orchestrator && forced_agent_type.is_none() {
        let classification = classifier::classify(&core.llm_client, &core.model, &user_message).await;
        let mut agents = core.agents.lock().await;
        let conv_agent = agents.get_mut(&conversation_id).expect("inserted above");
        if !classification.is_atomic {
            AgentType::Orchestrator
        } else {
            if let Err(e) = conv_agent.switch_to(classification.target_agent, &classification.reason, confidence_label(classification.confidence)) {
                return vec![StreamChunk::Error { message: e.to_string(), is_final: true }];
            }
            classification.target_agent
        }
    } else {
        current_type
    };

    let mut approvals = core.approvals.lock().await;
    let allowed_tools = agent::get(routed_agent).allowed_tools.clone();

    let chunks = dialogue::handle(
        conversation,
        routed_agent,
        &core.llm_client,
        &core.model,
        Some(allowed_tools.as_slice()),
        &core.hitl_policy,
        &mut approvals,
        &core.event_bus,
        None,
    )
    .await;

    // Complex-task routing (§4.C15): the orchestrator's expected tool call is
    // `create_plan`; turn it into a registered, pending-approval Plan.
    if routed_agent == AgentType::Orchestrator {
        if let Some(StreamChunk::ToolCall { tool_name, arguments, .. }) = chunks.iter().find(|c| matches!(c, StreamChunk::ToolCall { .. })) {
            if tool_name == "create_plan" {
                return match build_plan_from_tool_args(conversation_id.clone(), arguments) {
                    Ok(new_plan) => {
                        let plan_id = new_plan.id.to_string();
                        core.event_bus.publish(Event::PlanCreated { conversation_id: conversation_id.clone(), plan_id: new_plan.id.clone(), subtask_count: new_plan.subtasks.len() });

                        let approval_id = ApprovalId::generate();
                        approvals.add_pending(
                            approval_id.clone(),
                            ApprovalRequestType::Plan,
                            plan_id.clone(),
                            conversation_id.to_string(),
                            serde_json::json!({ "goal": new_plan.goal, "subtask_count": new_plan.subtasks.len() }),
                            "plan requires approval before execution".to_string(),
                        );

                        let mut plans = core.plans.lock().await;
                        plans.insert(plan_id.clone(), new_plan);
                        core.active_plan_for_conversation.lock().await.insert(conversation_id.clone(), plan_id);

                        vec![StreamChunk::PlanApprovalRequired {
                            approval_request_id: approval_id,
                            plan_summary: arguments.clone(),
                            is_final: true,
                        }]
                    }
                    Err(e) => vec![StreamChunk::Error { message: e.to_string(), is_final: true }],
                };
            }
        }
    }

    chunks
}

fn confidence_label(c: classifier::Confidence) -> &'static str {
    match c {
        classifier::Confidence::High => "high",
        classifier::Confidence::Medium => "medium",
        classifier::Confidence::Low => "low",
    }
}

/// Parse a `create_plan` tool call's JSON arguments into subtask specs and
/// construct the plan (§4.C9, §4.C15).
fn build_plan_from_tool_args(conversation_id: ConversationId, arguments: &str) -> Result<Plan, CoreError> {
    let args: serde_json::Value = serde_json::from_str(arguments)
        .map_err(|e| CoreError::InvalidPlan(format!("create_plan arguments not valid JSON: {e}")))?;
    let goal = args.get("goal").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let subtasks = args
        .get("subtasks")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let specs: Vec<plan::SubtaskSpec> = subtasks
        .iter()
        .filter_map(|s| {
            let id = s.get("id")?.as_str()?.to_string();
            let description = s.get("description")?.as_str()?.to_string();
            let target_agent = match s.get("target_agent")?.as_str()? {
                "coder" => AgentType::Coder,
                "architect" => AgentType::Architect,
                "debug" => AgentType::Debug,
                "ask" => AgentType::Ask,
                "universal" => AgentType::Universal,
                _ => AgentType::Coder,
            };
            let dependencies = s
                .get("dependencies")
                .and_then(|v| v.as_array())
                .map(|deps| deps.iter().filter_map(|d| d.as_str()).map(crate::types::SubtaskId::from).collect())
                .unwrap_or_default();
            let estimated_duration = s.get("estimated_duration").and_then(|v| v.as_u64());
            Some(plan::SubtaskSpec { id: crate::types::SubtaskId::from(id), description, target_agent, dependencies, estimated_duration })
        })
        .collect();

    plan::create_plan(conversation_id, goal, specs)
}

/// `ProcessToolResult(conversationId, callId, resultOrError)` (§4.C15).
pub async fn process_tool_result(
    core: Arc<Core>,
    conversation_id: ConversationId,
    call_id: String,
    tool_name: String,
    content: String,
    is_error: bool,
) -> Vec<StreamChunk> {
    let _guard = core.locks.acquire(&conversation_id).await;

    let mut conversations = core.conversations.lock().await;
    let Some(conversation) = conversations.get_mut(&conversation_id) else {
        return vec![StreamChunk::Error { message: format!("conversation {conversation_id} not found"), is_final: true }];
    };

    let matches = conversation.last_outstanding_tool_call().is_some_and(|c| c.id == call_id);
    if !matches {
        return vec![StreamChunk::Error { message: format!("call {call_id} is not the outstanding tool call"), is_final: true }];
    }

    let result_content = if is_error { format!("error: {content}") } else { content };
    if let Err(e) = conversation.append_message(Message::tool(call_id, tool_name, result_content)) {
        return vec![StreamChunk::Error { message: e.to_string(), is_final: true }];
    }

    let agent_type = {
        let agents = core.agents.lock().await;
        agents.get(&conversation_id).map(|a| a.current_type).unwrap_or(AgentType::Orchestrator)
    };

    let mut approvals = core.approvals.lock().await;
    let allowed_tools = agent::get(agent_type).allowed_tools.clone();
    let chunks = dialogue::handle(
        conversation,
        agent_type,
        &core.llm_client,
        &core.model,
        Some(allowed_tools.as_slice()),
        &core.hitl_policy,
        &mut approvals,
        &core.event_bus,
        None,
    )
    .await;

    let mut chunks = chunks;
    let active_plan_id = core.active_plan_for_conversation.lock().await.get(&conversation_id).cloned();
    if let Some(plan_id) = active_plan_id {
        chunks.extend(advance_plan_if_in_progress(&core, &plan_id, conversation, &mut approvals).await);
    }

    chunks
}

/// Drives the active plan's next ready subtasks to completion or the next
/// pause point, returning every subtask dialogue chunk produced along the way
/// for the caller to forward to its own stream consumer (§4.C11 item 2).
async fn advance_plan_if_in_progress(core: &Arc<Core>, plan_id: &str, conversation: &mut Conversation, approvals: &mut ApprovalStore) -> Vec<StreamChunk> {
    let mut plans = core.plans.lock().await;
    let Some(plan) = plans.get_mut(plan_id) else { return Vec::new() };
    if plan.status != plan::PlanStatus::InProgress {
        return Vec::new();
    }

    let mut exec_states = core.execution_states.lock().await;
    let exec_state = exec_states.entry(plan_id.to_string()).or_insert_with(ExecutionStateMachine::new);

    let mut dep_results_table = core.dependency_results.lock().await;
    let dep_results = dep_results_table.entry(plan_id.to_string()).or_default();

    match coordinator::execute_plan(
        plan,
        exec_state,
        conversation,
        dep_results,
        &core.llm_client,
        &core.model,
        &core.hitl_policy,
        approvals,
        &core.event_bus,
    )
    .await
    {
        Ok(ExecuteOutcome::WaitingApproval(record, forwarded)) => {
            core.resumptions.lock().await.insert(plan_id.to_string(), record);
            forwarded
        }
        Ok(ExecuteOutcome::Finished(forwarded)) => forwarded,
        Err(e) => vec![StreamChunk::Error { message: e.to_string(), is_final: true }],
    }
}

/// One of `{approve, reject, edit}` (§4.C15).
pub enum ApprovalDecision {
    Approve,
    Reject,
    Edit { modified_arguments: serde_json::Value },
}

/// `HandleApproval(conversationId, approvalRequestId, decision, modifiedArgs?, feedback?)` (§4.C15).
pub async fn handle_approval(
    core: Arc<Core>,
    conversation_id: ConversationId,
    approval_request_id: ApprovalId,
    decision: ApprovalDecision,
    feedback: Option<String>,
) -> Vec<StreamChunk> {
    let _guard = core.locks.acquire(&conversation_id).await;

    // Lock order matches `process_message`/`process_tool_result`: conversations
    // before approvals before plans, to avoid a cross-conversation deadlock.
    let mut conversations = core.conversations.lock().await;
    let mut approvals = core.approvals.lock().await;
    let Some(pending) = approvals.get_pending(approval_request_id.as_str()).cloned() else {
        return vec![StreamChunk::Error { message: format!("approval {approval_request_id} not found"), is_final: true }];
    };

    match decision {
        ApprovalDecision::Reject => {
            if let Err(e) = approvals.reject(approval_request_id.as_str(), feedback.clone(), "user") {
                return vec![StreamChunk::Error { message: e.to_string(), is_final: true }];
            }
            core.event_bus.publish(Event::HitlDecisionMade { conversation_id: conversation_id.clone(), approval_id: approval_request_id.clone(), approved: false });

            if pending.request_type == ApprovalRequestType::Plan {
                let mut plans = core.plans.lock().await;
                if let Some(plan) = plans.get_mut(pending.subject.as_str()) {
                    let _ = plan::cancel_plan(plan);
                }
                return vec![StreamChunk::Done { is_final: true }];
            }

            // A paused plan subtask's tool approval was rejected (§4.C11 item 3:
            // "rejected: transition waiting_approval → cancelled"): cancel the
            // whole plan and restore the subtask's conversation snapshot rather
            // than splicing a synthetic tool result into live history.
            if let Some(outcome) = reject_paused_plan_subtask(&core, &conversation_id, &mut conversations, feedback.clone()).await {
                return outcome;
            }

            if let Some(conversation) = conversations.get_mut(&conversation_id) {
                let call_id = pending.details.get("call_id").and_then(|v| v.as_str()).unwrap_or(pending.subject.as_str()).to_string();
                let rejection_note = feedback.unwrap_or_else(|| "rejected by reviewer".to_string());
                let _ = conversation.append_message(Message::tool(call_id, pending.subject.clone(), rejection_note));
            }
            vec![StreamChunk::Done { is_final: true }]
        }
        ApprovalDecision::Approve | ApprovalDecision::Edit { .. } => {
            let modified = match &decision {
                ApprovalDecision::Edit { modified_arguments } => Some(modified_arguments.clone()),
                _ => None,
            };
            if let Err(e) = approvals.approve(approval_request_id.as_str(), modified.clone(), "user") {
                return vec![StreamChunk::Error { message: e.to_string(), is_final: true }];
            }
            core.event_bus.publish(Event::HitlDecisionMade { conversation_id: conversation_id.clone(), approval_id: approval_request_id.clone(), approved: true });

            if pending.request_type == ApprovalRequestType::Plan {
                let mut plans = core.plans.lock().await;
                let Some(plan) = plans.get_mut(pending.subject.as_str()) else {
                    return vec![StreamChunk::Error { message: format!("plan {} not found", pending.subject), is_final: true }];
                };
                if let Err(e) = plan::approve_plan(plan) {
                    return vec![StreamChunk::Error { message: e.to_string(), is_final: true }];
                }
                core.event_bus.publish(Event::PlanApproved { plan_id: plan.id.clone() });

                let mut exec_states = core.execution_states.lock().await;
                let exec_state = exec_states.entry(pending.subject.clone()).or_insert_with(ExecutionStateMachine::new);
                let mut dep_results_table = core.dependency_results.lock().await;
                let dep_results = dep_results_table.entry(pending.subject.clone()).or_default();

                let Some(conversation) = conversations.get_mut(&conversation_id) else {
                    return vec![StreamChunk::Error { message: format!("conversation {conversation_id} not found"), is_final: true }];
                };

                match coordinator::execute_plan(plan, exec_state, conversation, dep_results, &core.llm_client, &core.model, &core.hitl_policy, &mut approvals, &core.event_bus).await {
                    Ok(ExecuteOutcome::Finished(mut forwarded)) => {
                        forwarded.push(StreamChunk::Done { is_final: true });
                        forwarded
                    }
                    Ok(ExecuteOutcome::WaitingApproval(record, mut forwarded)) => {
                        core.resumptions.lock().await.insert(pending.subject.clone(), record);
                        forwarded.push(StreamChunk::Done { is_final: true });
                        forwarded
                    }
                    Err(e) => vec![StreamChunk::Error { message: e.to_string(), is_final: true }],
                }
            } else {
                // §4.C11 item 3 / scenario 6: approving a paused plan subtask's
                // tool call resumes the execution state machine through
                // `WaitingApproval → Resumed → Running` before the tool call is
                // handed back to the executor.
                resume_paused_plan_subtask(&core, &conversation_id).await;

                let call_id = pending.details.get("call_id").and_then(|v| v.as_str()).unwrap_or(pending.subject.as_str()).to_string();
                let arguments = modified
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| pending.details.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}").to_string());
                vec![StreamChunk::ToolCall {
                    call_id,
                    tool_name: pending.subject.clone(),
                    arguments,
                    requires_approval: false,
                    is_final: true,
                }]
            }
        }
    }
}

/// If `conversation_id` has an active plan currently paused on a subtask's
/// tool-call approval, advance its execution state machine
/// `WaitingApproval → Resumed → Running` and drop the resumption record (the
/// coordinator re-derives readiness from the plan/subtask state on the next
/// `ProcessToolResult`-driven `execute_plan` call).
async fn resume_paused_plan_subtask(core: &Arc<Core>, conversation_id: &ConversationId) {
    let Some(plan_id) = core.active_plan_for_conversation.lock().await.get(conversation_id).cloned() else { return };
    let mut resumptions = core.resumptions.lock().await;
    if resumptions.remove(&plan_id).is_none() {
        return;
    }
    let mut exec_states = core.execution_states.lock().await;
    if let Some(exec_state) = exec_states.get_mut(&plan_id) {
        let _ = coordinator::resume_approved(exec_state);
    }
}

/// Mirror of `resume_paused_plan_subtask` for the rejection path: cancels the
/// plan and the execution state machine, restores the subtask's conversation
/// snapshot, and returns the stream chunks to yield — or `None` if this
/// conversation has no plan paused on a subtask approval, in which case the
/// caller falls back to the plain tool-rejection path.
async fn reject_paused_plan_subtask(
    core: &Arc<Core>,
    conversation_id: &ConversationId,
    conversations: &mut HashMap<ConversationId, Conversation>,
    feedback: Option<String>,
) -> Option<Vec<StreamChunk>> {
    let plan_id = core.active_plan_for_conversation.lock().await.get(conversation_id).cloned()?;
    let record = core.resumptions.lock().await.remove(&plan_id)?;

    let mut plans = core.plans.lock().await;
    if let Some(plan) = plans.get_mut(&plan_id) {
        let mut exec_states = core.execution_states.lock().await;
        let exec_state = exec_states.entry(plan_id.clone()).or_insert_with(ExecutionStateMachine::new);
        let _ = coordinator::resume_rejected(plan, exec_state, feedback);
    }

    if let Some(conversation) = conversations.get_mut(conversation_id) {
        conversation.restore_from_snapshot(&record.snapshot);
    }

    Some(vec![StreamChunk::Done { is_final: true }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::hitl::HitlPolicy;
    use crate::llm::LlmClient;
    use crate::session_lock::SessionLockManager;

    /// Never actually dialed in these tests: every path exercised here
    /// returns before `dialogue::handle`/`coordinator::execute_plan` would
    /// reach the network.
    fn unused_llm_client() -> LlmClient {
        let llm_config = agentforge_config::config::LlmConfig {
            proxy_url: "http://127.0.0.1:1/v1/chat/completions".to_string(),
            internal_api_key: "test-key".to_string(),
            model: "test-model".to_string(),
        };
        let resilience_config = agentforge_config::config::ResilienceConfig {
            circuit_breaker_failure_threshold: 10,
            circuit_breaker_recovery_seconds: 60,
            retry_max_attempts: 0,
            retry_base_seconds: 0,
            retry_max_seconds: 0,
        };
        LlmClient::new(&llm_config, &resilience_config)
    }

    fn test_core() -> Arc<Core> {
        Arc::new(Core {
            locks: SessionLockManager::new(),
            llm_client: unused_llm_client(),
            model: "test-model".to_string(),
            hitl_policy: HitlPolicy::default(),
            event_bus: EventBus::with_defaults(),
            max_switches: 50,
            conversations: Mutex::new(HashMap::new()),
            agents: Mutex::new(HashMap::new()),
            approvals: Mutex::new(ApprovalStore::new()),
            plans: Mutex::new(HashMap::new()),
            execution_states: Mutex::new(HashMap::new()),
            dependency_results: Mutex::new(HashMap::new()),
            resumptions: Mutex::new(HashMap::new()),
            active_plan_for_conversation: Mutex::new(HashMap::new()),
        })
    }

    #[tokio::test]
    async fn process_tool_result_errors_on_unknown_conversation() {
        let core = test_core();
        let chunks = process_tool_result(core, ConversationId::from("missing"), "call-1".to_string(), "read_file".to_string(), "ok".to_string(), false).await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], StreamChunk::Error { message, .. } if message.contains("not found")));
    }

    #[tokio::test]
    async fn process_tool_result_errors_when_call_id_is_not_outstanding() {
        let core = test_core();
        let conv_id = ConversationId::from("c1");
        {
            let mut conversations = core.conversations.lock().await;
            let mut conversation = Conversation::new(conv_id.clone());
            conversation.append_message(Message::assistant("checking", Some(vec![crate::types::ToolCall {
                id: "call-real".to_string(),
                call_type: "function".to_string(),
                function: crate::types::FunctionCall { name: "read_file".to_string(), arguments: "{}".to_string() },
            }]))).unwrap();
            conversations.insert(conv_id.clone(), conversation);
        }

        let chunks = process_tool_result(core, conv_id, "call-other".to_string(), "read_file".to_string(), "ok".to_string(), false).await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], StreamChunk::Error { message, .. } if message.contains("not the outstanding tool call")));
    }

    #[tokio::test]
    async fn handle_approval_errors_on_unknown_request() {
        let core = test_core();
        let chunks = handle_approval(core, ConversationId::from("c1"), ApprovalId::from("missing"), ApprovalDecision::Approve, None).await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], StreamChunk::Error { message, .. } if message.contains("not found")));
    }

    #[tokio::test]
    async fn handle_approval_reject_appends_tool_rejection_and_does_not_dial_llm() {
        let core = test_core();
        let conv_id = ConversationId::from("c1");
        {
            let mut conversations = core.conversations.lock().await;
            conversations.insert(conv_id.clone(), Conversation::new(conv_id.clone()));
        }
        let approval_id = ApprovalId::from("req-1");
        {
            let mut approvals = core.approvals.lock().await;
            approvals.add_pending(
                approval_id.clone(),
                ApprovalRequestType::Tool,
                "write_file".to_string(),
                conv_id.to_string(),
                serde_json::json!({ "call_id": "call-1", "tool_name": "write_file" }),
                "file mutation".to_string(),
            );
        }

        let chunks = handle_approval(core.clone(), conv_id.clone(), approval_id, ApprovalDecision::Reject, Some("not now".to_string())).await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], StreamChunk::Done { is_final: true }));

        let conversations = core.conversations.lock().await;
        let conversation = conversations.get(&conv_id).unwrap();
        let last = conversation.messages.last().unwrap();
        assert_eq!(last.role, crate::conversation::MessageRole::Tool);
        assert_eq!(last.content, "not now");
    }

    #[tokio::test]
    async fn handle_approval_approve_tool_returns_tool_call_chunk_without_plan_execution() {
        let core = test_core();
        let conv_id = ConversationId::from("c1");
        {
            let mut conversations = core.conversations.lock().await;
            conversations.insert(conv_id.clone(), Conversation::new(conv_id.clone()));
        }
        let approval_id = ApprovalId::from("req-1");
        {
            let mut approvals = core.approvals.lock().await;
            approvals.add_pending(
                approval_id.clone(),
                ApprovalRequestType::Tool,
                "write_file".to_string(),
                conv_id.to_string(),
                serde_json::json!({ "call_id": "call-1", "tool_name": "write_file", "arguments": "{\"path\":\"a.rs\"}" }),
                "file mutation".to_string(),
            );
        }

        let chunks = handle_approval(core, conv_id, approval_id, ApprovalDecision::Approve, None).await;
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            StreamChunk::ToolCall { call_id, tool_name, requires_approval, .. } => {
                assert_eq!(call_id, "call-1");
                assert_eq!(tool_name, "write_file");
                assert!(!requires_approval);
            }
            other => panic!("expected ToolCall chunk, got {other:?}"),
        }
    }

    /// Wires up a conversation + plan + execution state paused on a subtask's
    /// tool-call approval, as `coordinator::execute_subtask` leaves things
    /// when it returns `ExecuteOutcome::WaitingApproval` (§4.C11 item 2/3).
    async fn seed_paused_plan_subtask(core: &Arc<Core>, conv_id: &ConversationId) -> String {
        let plan = plan::create_plan(
            conv_id.clone(),
            "goal",
            vec![plan::SubtaskSpec { id: crate::types::SubtaskId::from("s1"), description: "write code".into(), target_agent: AgentType::Coder, dependencies: vec![], estimated_duration: None }],
        )
        .unwrap();
        let plan_id = plan.id.to_string();

        let mut exec_state = ExecutionStateMachine::new();
        exec_state.transition_to(crate::plan::ExecutionState::WaitingApproval, "subtask tool call requires approval").unwrap();

        let snapshot = {
            let conversations = core.conversations.lock().await;
            conversations.get(conv_id).unwrap().create_snapshot()
        };

        core.plans.lock().await.insert(plan_id.clone(), plan);
        core.execution_states.lock().await.insert(plan_id.clone(), exec_state);
        core.active_plan_for_conversation.lock().await.insert(conv_id.clone(), plan_id.clone());
        core.resumptions.lock().await.insert(
            plan_id.clone(),
            ResumptionRecord { plan_id: plan_id.clone(), subtask_id: crate::types::SubtaskId::from("s1"), snapshot },
        );
        plan_id
    }

    #[tokio::test]
    async fn handle_approval_approve_resumes_paused_plan_execution_state() {
        let core = test_core();
        let conv_id = ConversationId::from("c1");
        core.conversations.lock().await.insert(conv_id.clone(), Conversation::new(conv_id.clone()));
        let plan_id = seed_paused_plan_subtask(&core, &conv_id).await;

        let approval_id = ApprovalId::from("req-1");
        core.approvals.lock().await.add_pending(
            approval_id.clone(),
            ApprovalRequestType::Tool,
            "write_file".to_string(),
            conv_id.to_string(),
            serde_json::json!({ "call_id": "call-1", "tool_name": "write_file", "arguments": "{\"path\":\"a.rs\"}" }),
            "file mutation".to_string(),
        );

        let chunks = handle_approval(core.clone(), conv_id, approval_id, ApprovalDecision::Approve, None).await;
        assert!(matches!(&chunks[0], StreamChunk::ToolCall { requires_approval: false, .. }));

        let exec_states = core.execution_states.lock().await;
        assert_eq!(exec_states.get(&plan_id).unwrap().state, crate::plan::ExecutionState::Running);
        assert!(core.resumptions.lock().await.get(&plan_id).is_none());
    }

    #[tokio::test]
    async fn handle_approval_reject_cancels_paused_plan_and_restores_snapshot() {
        let core = test_core();
        let conv_id = ConversationId::from("c1");
        {
            let mut conversations = core.conversations.lock().await;
            let mut conversation = Conversation::new(conv_id.clone());
            conversation.append_message(Message::user("seed")).unwrap();
            conversations.insert(conv_id.clone(), conversation);
        }
        let message_count_at_snapshot = core.conversations.lock().await.get(&conv_id).unwrap().messages.len();
        let plan_id = seed_paused_plan_subtask(&core, &conv_id).await;

        // Mutate history past the snapshot point, as the paused subtask's
        // isolated context would have.
        core.conversations.lock().await.get_mut(&conv_id).unwrap().append_message(Message::system("subtask context")).unwrap();

        let approval_id = ApprovalId::from("req-1");
        core.approvals.lock().await.add_pending(
            approval_id.clone(),
            ApprovalRequestType::Tool,
            "write_file".to_string(),
            conv_id.to_string(),
            serde_json::json!({ "call_id": "call-1", "tool_name": "write_file" }),
            "file mutation".to_string(),
        );

        let chunks = handle_approval(core.clone(), conv_id.clone(), approval_id, ApprovalDecision::Reject, Some("no".to_string())).await;
        assert!(matches!(&chunks[0], StreamChunk::Done { is_final: true }));

        assert_eq!(core.plans.lock().await.get(&plan_id).unwrap().status, crate::plan::PlanStatus::Cancelled);
        assert_eq!(core.execution_states.lock().await.get(&plan_id).unwrap().state, crate::plan::ExecutionState::Cancelled);
        assert!(core.resumptions.lock().await.get(&plan_id).is_none());

        let conversations = core.conversations.lock().await;
        assert_eq!(conversations.get(&conv_id).unwrap().messages.len(), message_count_at_snapshot);
    }

    #[test]
    fn build_plan_from_tool_args_parses_subtasks_and_dependencies() {
        let args = serde_json::json!({
            "goal": "ship feature",
            "subtasks": [
                { "id": "s1", "description": "write code", "target_agent": "coder", "dependencies": [] },
                { "id": "s2", "description": "review", "target_agent": "architect", "dependencies": ["s1"] },
            ],
        })
        .to_string();

        let plan = build_plan_from_tool_args(ConversationId::from("c1"), &args).unwrap();
        assert_eq!(plan.goal, "ship feature");
        assert_eq!(plan.subtasks.len(), 2);
        assert_eq!(plan.subtasks[1].dependencies, vec![crate::types::SubtaskId::from("s1")]);
    }

    #[test]
    fn build_plan_from_tool_args_rejects_invalid_json() {
        let err = build_plan_from_tool_args(ConversationId::from("c1"), "not json").unwrap_err();
        assert!(matches!(err, CoreError::InvalidPlan(_)));
    }

    #[test]
    fn confidence_label_matches_every_variant() {
        assert_eq!(confidence_label(classifier::Confidence::High), "high");
        assert_eq!(confidence_label(classifier::Confidence::Medium), "medium");
        assert_eq!(confidence_label(classifier::Confidence::Low), "low");
    }
}
