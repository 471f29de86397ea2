//! C1 — Conversation store: the append-only message log per conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CoreError;
use crate::types::{ChatMessage, ConversationId, MessageId, ToolCall};

/// Default cap on a conversation's message sequence (§3, §6).
pub const DEFAULT_MAX_MESSAGES: usize = 1000;

/// Length an auto-derived conversation title is truncated to (§4.C1).
pub const TITLE_MAX_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role: MessageRole::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role: MessageRole::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            id: MessageId::generate(),
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            tool_name: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }

    /// Project to the wire `ChatMessage` shape sent to the LLM proxy (§6).
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role.as_str().to_string(),
            content: if self.content.is_empty() { None } else { Some(self.content.clone()) },
            tool_calls: self.tool_calls.clone(),
            tool_call_id: self.tool_call_id.clone(),
            name: self.tool_name.clone(),
        }
    }
}

/// A deep copy of a conversation's message list + metadata (§3 "Plan snapshot").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub conversation_id: ConversationId,
    pub messages: Vec<Message>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub messages: Vec<Message>,
    pub max_messages: usize,
}

impl Conversation {
    pub fn new(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: None,
            active: true,
            created_at: now,
            last_activity: now,
            metadata: HashMap::new(),
            messages: Vec::new(),
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }

    /// `appendMessage(conv, msg)` (§4.C1).
    pub fn append_message(&mut self, message: Message) -> Result<(), CoreError> {
        if !self.active {
            return Err(CoreError::ConversationInactive(self.id.to_string()));
        }
        if self.messages.len() >= self.max_messages {
            return Err(CoreError::MessageLimit(self.id.to_string()));
        }
        if self.title.is_none() && message.role == MessageRole::User {
            self.title = Some(derive_title(&message.content));
        }
        self.messages.push(message);
        self.last_activity = Utc::now();
        Ok(())
    }

    pub fn deactivate(&mut self, reason: &str) {
        self.active = false;
        self.metadata
            .insert("deactivation_reason".to_string(), serde_json::json!(reason));
        self.last_activity = Utc::now();
    }

    /// `createSnapshot(conv)` (§4.C1).
    pub fn create_snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_id: self.id.clone(),
            messages: self.messages.clone(),
            metadata: self.metadata.clone(),
            created_at: Utc::now(),
        }
    }

    /// `restoreFromSnapshot(conv, snap)` (§4.C1): replaces the message sequence,
    /// preserving conversation id and activity flag.
    pub fn restore_from_snapshot(&mut self, snapshot: &ConversationSnapshot) {
        self.messages = snapshot.messages.clone();
        self.metadata = snapshot.metadata.clone();
        self.last_activity = Utc::now();
    }

    /// `clearToolMessagesWithContext(conv, fromAgent, toAgent)` (§4.C1).
    ///
    /// Removes every assistant message with tool calls and every tool-role message in
    /// one pass; preserves user/system messages and the last tool-call-free assistant
    /// message (the "result to carry forward"); appends a system message recording the
    /// switch.
    pub fn clear_tool_messages_with_context(
        &mut self,
        from_agent: &str,
        to_agent: &str,
    ) -> ClearToolMessagesOutcome {
        let last_clean_assistant_idx = self
            .messages
            .iter()
            .enumerate()
            .rev()
            .find(|(_, m)| m.role == MessageRole::Assistant && !m.has_tool_calls())
            .map(|(i, _)| i);

        let mut removed_count = 0usize;
        let mut preserved_result = None;
        let mut kept = Vec::with_capacity(self.messages.len());

        for (idx, msg) in self.messages.drain(..).enumerate() {
            let is_tool_call_assistant = msg.role == MessageRole::Assistant && msg.has_tool_calls();
            let is_tool_message = msg.role == MessageRole::Tool;
            let is_the_preserved_result = Some(idx) == last_clean_assistant_idx;

            if is_the_preserved_result {
                preserved_result = Some(msg.content.clone());
                kept.push(msg);
            } else if is_tool_call_assistant || is_tool_message {
                removed_count += 1;
            } else {
                kept.push(msg);
            }
        }

        let context_message = format!("Agent switched from {} to {}", from_agent, to_agent);
        kept.push(Message::system(context_message.clone()));
        self.messages = kept;
        self.last_activity = Utc::now();

        ClearToolMessagesOutcome {
            removed_count,
            preserved_result,
            context_message,
            final_message_count: self.messages.len(),
        }
    }

    /// `getLastAssistantMessage(conv)` (§4.C1): most recent tool-call-free assistant message.
    pub fn get_last_assistant_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant && !m.has_tool_calls())
    }

    /// The most recent assistant tool call still awaiting a result, if any.
    pub fn last_outstanding_tool_call(&self) -> Option<&ToolCall> {
        for msg in self.messages.iter().rev() {
            if msg.role == MessageRole::Tool {
                return None;
            }
            if msg.role == MessageRole::Assistant {
                if let Some(calls) = &msg.tool_calls {
                    return calls.first();
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct ClearToolMessagesOutcome {
    pub removed_count: usize,
    pub preserved_result: Option<String>,
    pub context_message: String,
    pub final_message_count: usize,
}

/// Deterministically truncate the first user message to a conversation title.
fn derive_title(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or(content).trim();
    crate::types::safe_truncate(first_line, TITLE_MAX_CHARS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> Conversation {
        Conversation::new(ConversationId::from("c1"))
    }

    #[test]
    fn append_message_fails_when_inactive() {
        let mut c = conv();
        c.deactivate("done");
        let err = c.append_message(Message::user("hi")).unwrap_err();
        assert!(matches!(err, CoreError::ConversationInactive(_)));
    }

    #[test]
    fn append_message_fails_at_cap() {
        let mut c = conv();
        c.max_messages = 2;
        c.append_message(Message::user("1")).unwrap();
        c.append_message(Message::user("2")).unwrap();
        let before_activity = c.last_activity;
        let err = c.append_message(Message::user("3")).unwrap_err();
        assert!(matches!(err, CoreError::MessageLimit(_)));
        assert_eq!(c.last_activity, before_activity);
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let mut c = conv();
        c.append_message(Message::user("hi")).unwrap();
        let snap = c.create_snapshot();
        c.append_message(Message::user("more")).unwrap();
        assert_eq!(c.messages.len(), 2);
        c.restore_from_snapshot(&snap);
        assert_eq!(c.messages.len(), 1);
        assert_eq!(c.id, ConversationId::from("c1"));
        assert!(c.active);
    }

    #[test]
    fn clear_tool_messages_preserves_last_clean_assistant() {
        let mut c = conv();
        c.append_message(Message::system("sys")).unwrap();
        c.append_message(Message::user("do thing")).unwrap();
        let call = ToolCall {
            id: "call-A".to_string(),
            call_type: "function".to_string(),
            function: crate::types::FunctionCall {
                name: "write_file".to_string(),
                arguments: "{}".to_string(),
            },
        };
        c.append_message(Message::assistant("", Some(vec![call])))
            .unwrap();
        c.append_message(Message::tool("call-A", "write_file", "ok"))
            .unwrap();
        c.append_message(Message::assistant("done", None)).unwrap();

        let outcome = c.clear_tool_messages_with_context("coder", "debug");
        assert_eq!(outcome.removed_count, 2);
        assert_eq!(outcome.preserved_result.as_deref(), Some("done"));
        assert_eq!(c.messages.len(), 4);
        assert_eq!(c.messages[2].content, "done");
        assert_eq!(c.messages[3].content, "Agent switched from coder to debug");
    }
}
