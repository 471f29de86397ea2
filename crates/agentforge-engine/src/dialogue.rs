//! C7 — Dialogue engine: the central streaming contract.
//!
//! `handle` drives one LLM round trip for a conversation and turns it into an
//! ordered sequence of `StreamChunk`s (§4.C7). The contract calls for a lazy
//! sequence; this core instead builds the (always short, at most a handful of
//! elements) sequence eagerly into a `Vec` within one async call — the same
//! suspension points (LLM call, event publish) still exist, and no streaming
//! crate is pulled in for a sequence this bounded.

use crate::agent::{self, AgentType};
use crate::conversation::{Conversation, Message};
use crate::error::CoreError;
use crate::event_bus::{Event, EventBus};
use crate::hitl::{ApprovalRequestType, ApprovalStore, HitlPolicy};
use crate::llm::{self, LlmClient};
use crate::tool;
use crate::types::{ApprovalId, ConversationId};

#[derive(Debug, Clone)]
pub enum StreamChunk {
    AssistantMessage { content: String, is_final: bool },
    ToolCall { call_id: String, tool_name: String, arguments: String, requires_approval: bool, is_final: bool },
    ToolResult { call_id: String, content: String, is_final: bool },
    AgentSwitch { target_agent: AgentType, reason: String, is_final: bool },
    Error { message: String, is_final: bool },
    PlanApprovalRequired { approval_request_id: ApprovalId, plan_summary: String, is_final: bool },
    SessionInfo { conversation_id: ConversationId, is_final: bool },
    Done { is_final: bool },
}

impl StreamChunk {
    pub fn is_final(&self) -> bool {
        match self {
            StreamChunk::AssistantMessage { is_final, .. }
            | StreamChunk::ToolCall { is_final, .. }
            | StreamChunk::ToolResult { is_final, .. }
            | StreamChunk::AgentSwitch { is_final, .. }
            | StreamChunk::Error { is_final, .. }
            | StreamChunk::PlanApprovalRequired { is_final, .. }
            | StreamChunk::SessionInfo { is_final, .. }
            | StreamChunk::Done { is_final } => *is_final,
        }
    }
}

const FILE_TOUCHING_TOOLS: &[&str] = &["write_file", "delete_file", "move_file"];

/// One dialogue invocation (§4.C7). Runs inside the caller's session lock.
#[allow(clippy::too_many_arguments)]
pub async fn handle(
    conversation: &mut Conversation,
    agent_type: AgentType,
    llm_client: &LlmClient,
    model: &str,
    allowed_tools: Option<&[&str]>,
    hitl_policy: &HitlPolicy,
    approval_store: &mut ApprovalStore,
    event_bus: &EventBus,
    correlation_id: Option<String>,
) -> Vec<StreamChunk> {
    event_bus.publish(Event::RequestStarted { conversation_id: conversation.id.clone(), correlation_id: correlation_id.clone() });

    let tools = tool::filter(allowed_tools);
    let history: Vec<_> = conversation.messages.iter().map(Message::to_chat_message).collect();

    let raw = match llm_client.chat_completion(model, &history, Some(&tools), None).await {
        Ok(r) => r,
        Err(e) => {
            event_bus.publish(Event::RequestFailed { conversation_id: conversation.id.clone(), correlation_id, error: e.to_string() });
            return vec![StreamChunk::Error { message: e.to_string(), is_final: true }];
        }
    };

    let processed = llm::process_response(raw, hitl_policy);
    for warning in &processed.validation_warnings {
        tracing::warn!(conversation_id = %conversation.id, warning = %warning, "LLM response validation warning");
    }

    let Some(call) = processed.tool_calls.into_iter().next() else {
        let content = processed.content.unwrap_or_default();
        if let Err(e) = conversation.append_message(Message::assistant(content.clone(), None)) {
            return vec![StreamChunk::Error { message: e.to_string(), is_final: true }];
        }
        event_bus.publish(Event::RequestCompleted { conversation_id: conversation.id.clone(), correlation_id });
        return vec![StreamChunk::AssistantMessage { content, is_final: true }];
    };

    if !agent::can_use_tool(agent_type, &call.function.name) {
        let message = format!("agent {agent_type} may not use tool {}", call.function.name);
        agentforge_config::observability::security_tool_call_blocked(conversation.id.as_str(), &call.function.name, &message);
        return vec![StreamChunk::Error { message, is_final: true }];
    }

    if FILE_TOUCHING_TOOLS.contains(&call.function.name.as_str()) {
        let args: serde_json::Value = serde_json::from_str(&call.function.arguments).unwrap_or_default();
        let path = args
            .get("path")
            .or_else(|| args.get("from"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if !agent::can_edit_file(agent_type, path) {
            let message = format!("agent {agent_type} may not edit path {path}");
            agentforge_config::observability::security_tool_call_blocked(conversation.id.as_str(), &call.function.name, &message);
            return vec![StreamChunk::Error { message, is_final: true }];
        }
    }

    if call.function.name == "switch_mode" {
        let args: serde_json::Value = serde_json::from_str(&call.function.arguments).unwrap_or_default();
        let target = args.get("target_agent").and_then(|v| v.as_str()).unwrap_or("");
        let reason = args.get("reason").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let target_agent = match target {
            "coder" => AgentType::Coder,
            "architect" => AgentType::Architect,
            "debug" => AgentType::Debug,
            "ask" => AgentType::Ask,
            "universal" => AgentType::Universal,
            _ => AgentType::Orchestrator,
        };
        return vec![StreamChunk::AgentSwitch { target_agent, reason, is_final: true }];
    }

    // Persist the assistant's tool call unconditionally, whether or not it
    // still needs approval, so `last_outstanding_tool_call` can match the
    // eventual `ProcessToolResult`/`HandleApproval` against it.
    if let Err(e) = conversation.append_message(Message::assistant(processed.content.unwrap_or_default(), Some(vec![call.clone()]))) {
        return vec![StreamChunk::Error { message: e.to_string(), is_final: true }];
    }

    if processed.requires_approval {
        let approval_id = ApprovalId::generate();
        approval_store.add_pending(
            approval_id.clone(),
            ApprovalRequestType::Tool,
            call.function.name.clone(),
            conversation.id.to_string(),
            serde_json::json!({ "call_id": call.id, "tool_name": call.function.name, "arguments": call.function.arguments }),
            processed.approval_reason.clone().unwrap_or_default(),
        );
        event_bus.publish(Event::ToolApprovalRequested {
            conversation_id: conversation.id.clone(),
            approval_id,
            tool_name: call.function.name.clone(),
        });
        return vec![StreamChunk::ToolCall {
            call_id: call.id,
            tool_name: call.function.name,
            arguments: call.function.arguments,
            requires_approval: true,
            is_final: true,
        }];
    }

    vec![StreamChunk::ToolCall {
        call_id: call.id,
        tool_name: call.function.name,
        arguments: call.function.arguments,
        requires_approval: false,
        is_final: true,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::types::ConversationId;
    use std::sync::{Arc, Mutex};

    /// A proxy URL that refuses connections immediately (no DNS lookup, no
    /// listener on the port) so a failed LLM call is fast and deterministic.
    const UNREACHABLE_PROXY: &str = "http://127.0.0.1:1/v1/chat/completions";

    fn unreachable_llm_client() -> LlmClient {
        let llm_config = agentforge_config::config::LlmConfig {
            proxy_url: UNREACHABLE_PROXY.to_string(),
            internal_api_key: "test-key".to_string(),
            model: "test-model".to_string(),
        };
        // Zero retries and a tiny circuit-breaker threshold so the test
        // exercises one real failed HTTP attempt, not the retry backoff.
        let resilience_config = agentforge_config::config::ResilienceConfig {
            circuit_breaker_failure_threshold: 10,
            circuit_breaker_recovery_seconds: 60,
            retry_max_attempts: 0,
            retry_base_seconds: 0,
            retry_max_seconds: 0,
        };
        LlmClient::new(&llm_config, &resilience_config)
    }

    struct CollectingHandler(Arc<Mutex<Vec<Event>>>);

    impl crate::event_bus::EventHandler for CollectingHandler {
        fn handle(&self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn llm_transport_failure_becomes_error_chunk_and_publishes_request_failed() {
        let mut conversation = Conversation::new(ConversationId::from("c1"));
        conversation.append_message(Message::user("hello")).unwrap();
        let message_count_before = conversation.messages.len();

        let llm_client = unreachable_llm_client();
        let hitl_policy = HitlPolicy::default();
        let mut approval_store = ApprovalStore::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let event_bus = EventBus::new(vec![Box::new(CollectingHandler(events.clone()))]);

        let chunks = handle(
            &mut conversation,
            AgentType::Coder,
            &llm_client,
            "test-model",
            None,
            &hitl_policy,
            &mut approval_store,
            &event_bus,
            Some("corr-1".to_string()),
        )
        .await;

        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], StreamChunk::Error { is_final: true, .. }));
        // A failed LLM round trip must not mutate the conversation.
        assert_eq!(conversation.messages.len(), message_count_before);

        let published = events.lock().unwrap();
        assert!(published.iter().any(|e| matches!(e, Event::RequestStarted { .. })));
        assert!(published.iter().any(|e| matches!(e, Event::RequestFailed { correlation_id: Some(c), .. } if c == "corr-1")));
    }

    #[test]
    fn stream_chunk_is_final_reads_every_variant() {
        assert!(StreamChunk::Done { is_final: true }.is_final());
        assert!(!StreamChunk::SessionInfo { conversation_id: ConversationId::from("c1"), is_final: false }.is_final());
    }
}
