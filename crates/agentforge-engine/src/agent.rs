//! C2 — Agent registry: typed agent descriptors and the per-conversation switch ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::CoreError;
use crate::types::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Orchestrator,
    Coder,
    Architect,
    Debug,
    Ask,
    Universal,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Orchestrator => "orchestrator",
            AgentType::Coder => "coder",
            AgentType::Architect => "architect",
            AgentType::Debug => "debug",
            AgentType::Ask => "ask",
            AgentType::Universal => "universal",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capability record for one agent type (§4.C2).
#[derive(Debug, Clone)]
pub struct AgentCapabilities {
    pub allowed_tools: Vec<&'static str>,
    /// Returns true if the agent may write/edit the given path.
    pub file_path_allowed: fn(&str) -> bool,
    pub can_request_switch: bool,
    pub system_prompt_id: &'static str,
    pub initial_delegation: bool,
}

fn allow_any_path(_path: &str) -> bool {
    true
}

fn markdown_only(path: &str) -> bool {
    path.ends_with(".md") || path.ends_with(".mdx")
}

/// Static capability table, keyed by agent type.
static REGISTRY: LazyLock<HashMap<AgentType, AgentCapabilities>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert(
        AgentType::Orchestrator,
        AgentCapabilities {
            allowed_tools: vec!["create_plan", "switch_mode"],
            file_path_allowed: allow_any_path,
            can_request_switch: true,
            system_prompt_id: "orchestrator",
            initial_delegation: true,
        },
    );
    m.insert(
        AgentType::Coder,
        AgentCapabilities {
            allowed_tools: vec![
                "read_file",
                "write_file",
                "delete_file",
                "move_file",
                "list_files",
                "search",
                "run_command",
                "switch_mode",
            ],
            file_path_allowed: allow_any_path,
            can_request_switch: true,
            system_prompt_id: "coder",
            initial_delegation: false,
        },
    );
    m.insert(
        AgentType::Architect,
        AgentCapabilities {
            allowed_tools: vec!["read_file", "write_file", "list_files", "search", "switch_mode"],
            file_path_allowed: markdown_only,
            can_request_switch: true,
            system_prompt_id: "architect",
            initial_delegation: false,
        },
    );
    m.insert(
        AgentType::Debug,
        AgentCapabilities {
            allowed_tools: vec![
                "read_file",
                "write_file",
                "list_files",
                "search",
                "run_command",
                "switch_mode",
            ],
            file_path_allowed: allow_any_path,
            can_request_switch: true,
            system_prompt_id: "debug",
            initial_delegation: false,
        },
    );
    m.insert(
        AgentType::Ask,
        AgentCapabilities {
            allowed_tools: vec!["read_file", "list_files", "search"],
            file_path_allowed: allow_any_path,
            can_request_switch: true,
            system_prompt_id: "ask",
            initial_delegation: false,
        },
    );
    m.insert(
        AgentType::Universal,
        AgentCapabilities {
            allowed_tools: vec![
                "read_file",
                "write_file",
                "delete_file",
                "move_file",
                "list_files",
                "search",
                "run_command",
            ],
            file_path_allowed: allow_any_path,
            can_request_switch: false,
            system_prompt_id: "universal",
            initial_delegation: false,
        },
    );
    m
});

pub fn get(agent_type: AgentType) -> &'static AgentCapabilities {
    REGISTRY
        .get(&agent_type)
        .expect("all AgentType variants are registered")
}

pub fn can_use_tool(agent_type: AgentType, tool_name: &str) -> bool {
    get(agent_type).allowed_tools.contains(&tool_name)
}

pub fn can_edit_file(agent_type: AgentType, path: &str) -> bool {
    (get(agent_type).file_path_allowed)(path)
}

pub fn can_switch(agent_type: AgentType, _target: AgentType) -> bool {
    get(agent_type).can_request_switch
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSwitch {
    pub from: AgentType,
    pub to: AgentType,
    pub reason: String,
    pub confidence: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-conversation agent state (§3 "Agent").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationAgent {
    pub id: AgentId,
    pub conversation_id: crate::types::ConversationId,
    pub current_type: AgentType,
    pub switch_count: u32,
    pub max_switches: u32,
    pub switch_history: Vec<AgentSwitch>,
}

impl ConversationAgent {
    pub fn new(
        conversation_id: crate::types::ConversationId,
        initial_type: AgentType,
        max_switches: u32,
    ) -> Self {
        Self {
            id: AgentId::generate(),
            conversation_id,
            current_type: initial_type,
            switch_count: 0,
            max_switches,
            switch_history: Vec::new(),
        }
    }

    /// Record a switch, enforcing `switchCount <= maxSwitches` (§3 invariant).
    pub fn switch_to(&mut self, target: AgentType, reason: &str, confidence: &str) -> Result<(), CoreError> {
        if self.switch_count >= self.max_switches {
            return Err(CoreError::SwitchLimit(self.conversation_id.to_string()));
        }
        self.switch_history.push(AgentSwitch {
            from: self.current_type,
            to: target,
            reason: reason.to_string(),
            confidence: confidence.to_string(),
            timestamp: Utc::now(),
        });
        self.current_type = target;
        self.switch_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_count_equals_history_length_invariant() {
        let mut a = ConversationAgent::new(crate::types::ConversationId::from("c1"), AgentType::Orchestrator, 2);
        a.switch_to(AgentType::Coder, "classified", "high").unwrap();
        a.switch_to(AgentType::Debug, "error found", "medium").unwrap();
        assert_eq!(a.switch_count as usize, a.switch_history.len());
        let err = a.switch_to(AgentType::Ask, "more", "low").unwrap_err();
        assert!(matches!(err, CoreError::SwitchLimit(_)));
        assert_eq!(a.current_type, AgentType::Debug);
    }

    #[test]
    fn architect_restricted_to_markdown() {
        assert!(can_edit_file(AgentType::Architect, "README.md"));
        assert!(!can_edit_file(AgentType::Architect, "src/main.rs"));
    }
}
