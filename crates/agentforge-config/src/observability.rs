//! Observability: tracing init, audit log, security events.
//!
//! Audit: AGENTFORGE_AUDIT_LOG
//! Security events: AGENTFORGE_SECURITY_EVENTS_LOG

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

static AUDIT_PATH: Mutex<Option<String>> = Mutex::new(None);
static SECURITY_EVENTS_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Initialize tracing. Call at process startup.
/// When AGENTFORGE_QUIET=1, only WARN and above are logged.
pub fn init_tracing() {
    let level: String = if is_quiet() {
        "agentforge=warn".to_string()
    } else {
        env::var("AGENTFORGE_LOG_LEVEL").unwrap_or_else(|_| "agentforge=info".to_string())
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json = env::var("AGENTFORGE_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(false);

    let _ = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

fn is_quiet() -> bool {
    env::var("AGENTFORGE_QUIET")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(false)
}

fn get_audit_path() -> Option<String> {
    {
        let guard = AUDIT_PATH.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = env::var("AGENTFORGE_AUDIT_LOG").ok()?;
    if path.is_empty() {
        return None;
    }
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = AUDIT_PATH.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn get_security_events_path() -> Option<String> {
    {
        let guard = SECURITY_EVENTS_PATH.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = env::var("AGENTFORGE_SECURITY_EVENTS_LOG").ok()?;
    if path.is_empty() {
        return None;
    }
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = SECURITY_EVENTS_PATH.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Audit: agent_switch_requested (§4.C2)
pub fn audit_agent_switch_requested(conversation_id: &str, from_agent: &str, to_agent: &str) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now_ts(),
            "event": "agent_switch_requested",
            "conversation_id": conversation_id,
            "from_agent": from_agent,
            "to_agent": to_agent,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: agent_switch_completed (§4.C2)
pub fn audit_agent_switch_completed(conversation_id: &str, from_agent: &str, to_agent: &str) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now_ts(),
            "event": "agent_switch_completed",
            "conversation_id": conversation_id,
            "from_agent": from_agent,
            "to_agent": to_agent,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: plan_created (§4.C9)
pub fn audit_plan_created(conversation_id: &str, plan_id: &str, subtask_count: usize) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now_ts(),
            "event": "plan_created",
            "conversation_id": conversation_id,
            "plan_id": plan_id,
            "subtask_count": subtask_count,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: subtask_started / subtask_completed / subtask_failed (§4.C11)
pub fn audit_subtask_transition(plan_id: &str, subtask_id: &str, status: &str) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now_ts(),
            "event": format!("subtask_{}", status),
            "plan_id": plan_id,
            "subtask_id": subtask_id,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: hitl_requested — an approval gate opened (§4.C4)
pub fn audit_hitl_requested(conversation_id: &str, approval_id: &str, action_summary: &str) {
    tracing::info!(
        conversation_id = %conversation_id,
        approval_id = %approval_id,
        "HITL: approval requested"
    );
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now_ts(),
            "event": "hitl_requested",
            "conversation_id": conversation_id,
            "approval_id": approval_id,
            "action_summary": action_summary,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: hitl_decided — a pending approval was resolved (§4.C4)
pub fn audit_hitl_decided(conversation_id: &str, approval_id: &str, approved: bool, decided_by: &str) {
    tracing::info!(
        conversation_id = %conversation_id,
        approval_id = %approval_id,
        approved = %approved,
        "HITL: decision recorded"
    );
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now_ts(),
            "event": "hitl_decided",
            "conversation_id": conversation_id,
            "approval_id": approval_id,
            "approved": approved,
            "decided_by": decided_by,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: plan_failed — a plan ended in `failed` (deadlock or unrecovered subtask failure) (§4.C11)
pub fn audit_plan_failed(plan_id: &str, reason: &str) {
    tracing::warn!(plan_id = %plan_id, reason = %reason, "Plan failed");
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now_ts(),
            "event": "plan_failed",
            "plan_id": plan_id,
            "reason": reason,
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: circuit breaker opened — upstream judged unhealthy (§4.C14)
pub fn security_circuit_breaker_opened(scope: &str, failure_count: u32) {
    tracing::warn!(
        scope = %scope,
        failure_count = %failure_count,
        "Resilience: circuit breaker opened"
    );
    if let Some(path) = get_security_events_path() {
        let record = json!({
            "ts": now_ts(),
            "type": "circuit_breaker_opened",
            "category": "resilience",
            "scope": scope,
            "details": { "failure_count": failure_count }
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: circuit breaker reset back to closed
pub fn security_circuit_breaker_closed(scope: &str) {
    tracing::info!(scope = %scope, "Resilience: circuit breaker closed");
    if let Some(path) = get_security_events_path() {
        let record = json!({
            "ts": now_ts(),
            "type": "circuit_breaker_closed",
            "category": "resilience",
            "scope": scope,
            "details": {}
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: tool call blocked (e.g. rejected by HITL gate or disabled tool)
pub fn security_tool_call_blocked(conversation_id: &str, tool_name: &str, reason: &str) {
    tracing::warn!(
        conversation_id = %conversation_id,
        tool_name = %tool_name,
        reason = %reason,
        "Security: tool call blocked"
    );
    if let Some(path) = get_security_events_path() {
        let record = json!({
            "ts": now_ts(),
            "type": "tool_call_blocked",
            "category": "tool_execution",
            "conversation_id": conversation_id,
            "details": {
                "tool_name": tool_name,
                "reason": reason
            }
        });
        append_jsonl(&path, &record);
    }
}
