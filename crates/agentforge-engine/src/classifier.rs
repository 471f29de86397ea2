//! C8 — Task classifier: atomic/complex decision and initial agent routing.
//!
//! Primary path asks the LLM with a dedicated classification prompt; the
//! fallback path is a deterministic keyword classifier used when the LLM call
//! fails or is unreachable. Both paths enforce the invariant `is_atomic ==
//! false ⇒ target_agent == "plan"`.
//!
//! Keyword tables are invented to satisfy the atomic/complex split this
//! module's spec calls for; the short-message atomic default (under 10 words)
//! matches `original_source/agent-runtime/app/domain/services/task_classifier.py`.

use serde::Deserialize;

use crate::agent::AgentType;
use crate::llm::LlmClient;
use crate::types::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone)]
pub struct TaskClassification {
    pub is_atomic: bool,
    pub target_agent: AgentType,
    pub confidence: Confidence,
    pub reason: String,
}

impl TaskClassification {
    /// Enforce §4.C8's invariant: non-atomic work always routes to the orchestrator
    /// (the classifier's "plan" target), which owns plan creation (§4.C9).
    fn normalize(mut self) -> Self {
        if !self.is_atomic && self.target_agent != AgentType::Orchestrator {
            self.target_agent = AgentType::Orchestrator;
        }
        self
    }
}

const CLASSIFICATION_PROMPT: &str = r#"You are a task classifier for a multi-agent programming assistant.

Given a user's message, decide:
1. Whether the task is atomic (a single, well-scoped change) or complex (requires decomposition into multiple subtasks).
2. Which agent should handle it: "code" (write/modify code), "debug" (diagnose and fix a failure), "explain" (answer a question about existing code), or "plan" (the task is complex and needs decomposition).
3. Your confidence: "high", "medium", or "low".

Respond with a JSON object only, no other text:
{"is_atomic": true or false, "target_agent": "code" | "debug" | "explain" | "plan", "confidence": "high" | "medium" | "low", "reason": "one short sentence"}
"#;

#[derive(Debug, Deserialize)]
struct RawClassification {
    is_atomic: bool,
    target_agent: String,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Classify `user_message`. Tries the LLM first; on any failure, falls back
/// to the deterministic keyword classifier (always `confidence: low`).
pub async fn classify(client: &LlmClient, model: &str, user_message: &str) -> TaskClassification {
    match classify_via_llm(client, model, user_message).await {
        Some(c) => c.normalize(),
        None => classify_via_keywords(user_message).normalize(),
    }
}

async fn classify_via_llm(client: &LlmClient, model: &str, user_message: &str) -> Option<TaskClassification> {
    let messages = [
        ChatMessage::system(CLASSIFICATION_PROMPT),
        ChatMessage::user(user_message),
    ];
    let extra = serde_json::json!({ "temperature": 0.3 });
    let response = client.chat_completion(model, &messages, None, Some(extra)).await.ok()?;
    let content = response.content?;
    parse_tolerant_json(&content)
}

/// Tolerant JSON parsing (§9 Design Notes): strips ```json fences and maps
/// Python-style `True`/`False` literals to JSON booleans before parsing.
fn parse_tolerant_json(raw: &str) -> Option<TaskClassification> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let normalized = cleaned
        .replace("True", "true")
        .replace("False", "false")
        .replace("None", "null");

    let raw: RawClassification = serde_json::from_str(&normalized).ok()?;

    let target_agent = match raw.target_agent.to_lowercase().as_str() {
        "code" => AgentType::Coder,
        "debug" => AgentType::Debug,
        "explain" => AgentType::Ask,
        "plan" => AgentType::Orchestrator,
        _ => return None,
    };

    let confidence = match raw.confidence.as_deref().unwrap_or("medium").to_lowercase().as_str() {
        "high" => Confidence::High,
        "low" => Confidence::Low,
        _ => Confidence::Medium,
    };

    Some(TaskClassification {
        is_atomic: raw.is_atomic,
        target_agent,
        confidence,
        reason: raw.reason.unwrap_or_else(|| "llm classification".to_string()),
    })
}

const COMPLEXITY_INDICATORS: &[&str] = &[
    "create a project",
    "build an application",
    "multiple files",
    "entire system",
    "from scratch",
    "full stack",
];

const ATOMICITY_INDICATORS: &[&str] = &[
    "fix the",
    "what does",
    "explain this function",
    "add a comment",
    "rename",
];

const CODE_KEYWORDS: &[&str] = &["implement", "write", "add"];
const DEBUG_KEYWORDS: &[&str] = &["error", "bug", "fails", "crash", "traceback"];
const EXPLAIN_KEYWORDS: &[&str] = &["what", "why", "explain", "how does"];

/// Deterministic keyword fallback (§4.C8, §9: "same input ⇒ same output").
fn classify_via_keywords(user_message: &str) -> TaskClassification {
    let lower = user_message.to_lowercase();

    let is_atomic = if COMPLEXITY_INDICATORS.iter().any(|kw| lower.contains(kw)) {
        false
    } else if ATOMICITY_INDICATORS.iter().any(|kw| lower.contains(kw)) {
        true
    } else {
        lower.split_whitespace().count() < 10
    };

    let target_agent = if is_atomic {
        let code_score = CODE_KEYWORDS.iter().filter(|kw| lower.contains(**kw)).count();
        let debug_score = DEBUG_KEYWORDS.iter().filter(|kw| lower.contains(**kw)).count();
        let explain_score = EXPLAIN_KEYWORDS.iter().filter(|kw| lower.contains(**kw)).count();

        if debug_score > code_score && debug_score > explain_score {
            AgentType::Debug
        } else if explain_score > code_score && explain_score > debug_score {
            AgentType::Ask
        } else {
            AgentType::Coder
        }
    } else {
        AgentType::Orchestrator
    };

    TaskClassification {
        is_atomic,
        target_agent,
        confidence: Confidence::Low,
        reason: "keyword fallback classification".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_fallback_detects_complex_task() {
        let c = classify_via_keywords("Build an application from scratch with multiple files").normalize();
        assert!(!c.is_atomic);
        assert_eq!(c.target_agent, AgentType::Orchestrator);
        assert_eq!(c.confidence, Confidence::Low);
    }

    #[test]
    fn keyword_fallback_detects_atomic_debug_task() {
        let c = classify_via_keywords("The build fails with a traceback, please fix the crash");
        let c = c.normalize();
        assert!(c.is_atomic);
        assert_eq!(c.target_agent, AgentType::Debug);
    }

    #[test]
    fn keyword_fallback_short_message_defaults_atomic_code() {
        let c = classify_via_keywords("add a helper function").normalize();
        assert!(c.is_atomic);
        assert_eq!(c.target_agent, AgentType::Coder);
    }

    #[test]
    fn normalize_forces_orchestrator_agent_when_not_atomic() {
        let c = TaskClassification {
            is_atomic: false,
            target_agent: AgentType::Coder,
            confidence: Confidence::Medium,
            reason: "test".to_string(),
        }
        .normalize();
        assert_eq!(c.target_agent, AgentType::Orchestrator);
    }

    #[test]
    fn tolerant_json_parser_accepts_python_booleans_and_fences() {
        let raw = "```json\n{\"is_atomic\": True, \"target_agent\": \"code\", \"confidence\": \"high\", \"reason\": \"ok\"}\n```";
        let parsed = parse_tolerant_json(raw).expect("should parse");
        assert!(parsed.is_atomic);
        assert_eq!(parsed.target_agent, AgentType::Coder);
        assert_eq!(parsed.confidence, Confidence::High);
    }
}
