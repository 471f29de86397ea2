//! C4 — HITL policy & approval store.
//!
//! The policy decides which tool intents require human approval. The store
//! persists pending approval requests and their resolutions, plus an
//! append-only decision audit trail (grounded in the original
//! `HITLManager.log_decision`/`get_audit_logs`, §3 "[EXPANSION] HITL audit log").

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CoreError;
use crate::types::ApprovalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRequestType {
    Tool,
    Plan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub request_id: ApprovalId,
    pub request_type: ApprovalRequestType,
    pub subject: String,
    pub session_id: String,
    pub details: serde_json::Value,
    pub reason: String,
    pub status: ApprovalStatus,
    pub modified_arguments: Option<serde_json::Value>,
    pub decision_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlAuditEntry {
    pub request_id: ApprovalId,
    pub decision: ApprovalStatus,
    pub decided_by: String,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One rule in the policy list (§4.C4): glob-matching tool name pattern.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub tool_name_glob: String,
    pub requires_approval: bool,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct HitlPolicy {
    pub global_enabled: bool,
    pub default_requires_approval: bool,
    pub rules: Vec<PolicyRule>,
}

impl Default for HitlPolicy {
    /// Default rules (§4.C4): mutation/command tools require approval, reads/listing/search don't.
    fn default() -> Self {
        Self {
            global_enabled: true,
            default_requires_approval: false,
            rules: vec![
                PolicyRule { tool_name_glob: "write_file".into(), requires_approval: true, reason: "file mutation".into() },
                PolicyRule { tool_name_glob: "delete_file".into(), requires_approval: true, reason: "file mutation".into() },
                PolicyRule { tool_name_glob: "move_file".into(), requires_approval: true, reason: "file mutation".into() },
                PolicyRule { tool_name_glob: "create_*".into(), requires_approval: true, reason: "directory/resource creation".into() },
                PolicyRule { tool_name_glob: "run_command".into(), requires_approval: true, reason: "command execution".into() },
                PolicyRule { tool_name_glob: "read_file".into(), requires_approval: false, reason: "read-only".into() },
                PolicyRule { tool_name_glob: "list_files".into(), requires_approval: false, reason: "read-only".into() },
                PolicyRule { tool_name_glob: "search".into(), requires_approval: false, reason: "read-only".into() },
            ],
        }
    }
}

impl HitlPolicy {
    pub fn from_config(config: &agentforge_config::config::HitlConfig) -> Self {
        Self {
            global_enabled: config.global_enabled,
            ..Default::default()
        }
    }

    /// Evaluate the policy for a tool name: disabled globally → never; first matching
    /// rule wins; else the default applies.
    pub fn evaluate(&self, tool_name: &str) -> (bool, String) {
        if !self.global_enabled {
            return (false, "HITL disabled globally".to_string());
        }
        for rule in &self.rules {
            if glob::Pattern::new(&rule.tool_name_glob)
                .map(|p| p.matches(tool_name))
                .unwrap_or(false)
            {
                return (rule.requires_approval, rule.reason.clone());
            }
        }
        (self.default_requires_approval, "default policy".to_string())
    }
}

/// In-process approval store. Persistence of the same shape is mirrored by
/// `agentforge-store`'s `pending_approvals`/`hitl_audit_log` tables; this type
/// is the aggregate the use cases operate on directly.
#[derive(Debug, Default)]
pub struct ApprovalStore {
    pending: HashMap<String, PendingApproval>,
    audit_log: Vec<HitlAuditEntry>,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `addPending` (§4.C4): duplicate request id is an idempotent no-op.
    pub fn add_pending(
        &mut self,
        request_id: ApprovalId,
        request_type: ApprovalRequestType,
        subject: impl Into<String>,
        session_id: impl Into<String>,
        details: serde_json::Value,
        reason: impl Into<String>,
    ) {
        if self.pending.contains_key(request_id.as_str()) {
            tracing::warn!(request_id = %request_id, "addPending called for an existing request id; ignoring");
            return;
        }
        self.pending.insert(
            request_id.to_string(),
            PendingApproval {
                request_id,
                request_type,
                subject: subject.into(),
                session_id: session_id.into(),
                details,
                reason: reason.into(),
                status: ApprovalStatus::Pending,
                modified_arguments: None,
                decision_reason: None,
                created_at: Utc::now(),
                decided_at: None,
            },
        );
    }

    pub fn get_pending(&self, request_id: &str) -> Option<&PendingApproval> {
        self.pending.get(request_id)
    }

    pub fn get_all_pending(&self, session_id: &str, request_type: Option<ApprovalRequestType>) -> Vec<&PendingApproval> {
        self.pending
            .values()
            .filter(|p| p.session_id == session_id && p.status == ApprovalStatus::Pending)
            .filter(|p| request_type.map(|t| t == p.request_type).unwrap_or(true))
            .collect()
    }

    pub fn count_pending(&self, session_id: &str) -> usize {
        self.get_all_pending(session_id, None).len()
    }

    pub fn has_pending(&self, request_id: &str) -> bool {
        self.pending
            .get(request_id)
            .is_some_and(|p| p.status == ApprovalStatus::Pending)
    }

    /// `approve` (§4.C4): legal only from pending.
    pub fn approve(
        &mut self,
        request_id: &str,
        modified_args: Option<serde_json::Value>,
        decided_by: &str,
    ) -> Result<&PendingApproval, CoreError> {
        self.decide(request_id, ApprovalStatus::Approved, modified_args, None, decided_by)
    }

    /// `reject` (§4.C4): legal only from pending.
    pub fn reject(
        &mut self,
        request_id: &str,
        reason: Option<String>,
        decided_by: &str,
    ) -> Result<&PendingApproval, CoreError> {
        self.decide(request_id, ApprovalStatus::Rejected, None, reason, decided_by)
    }

    fn decide(
        &mut self,
        request_id: &str,
        status: ApprovalStatus,
        modified_args: Option<serde_json::Value>,
        decision_reason: Option<String>,
        decided_by: &str,
    ) -> Result<&PendingApproval, CoreError> {
        let entry = self
            .pending
            .get_mut(request_id)
            .ok_or_else(|| CoreError::ApprovalNotFound(request_id.to_string()))?;
        if entry.status != ApprovalStatus::Pending {
            return Err(CoreError::ApprovalTerminal(request_id.to_string()));
        }
        entry.status = status;
        entry.modified_arguments = modified_args;
        entry.decision_reason = decision_reason.clone();
        entry.decided_at = Some(Utc::now());

        self.audit_log.push(HitlAuditEntry {
            request_id: ApprovalId::from(request_id),
            decision: status,
            decided_by: decided_by.to_string(),
            reason: decision_reason,
            timestamp: Utc::now(),
        });

        Ok(self.pending.get(request_id).expect("just updated"))
    }

    /// `cleanupExpired` (§4.C4): removes pending requests past `timeout`.
    pub fn cleanup_expired(&mut self, session_id: &str, timeout: Duration) -> usize {
        let cutoff = Utc::now() - timeout;
        let before = self.pending.len();
        self.pending.retain(|_, p| {
            !(p.session_id == session_id && p.status == ApprovalStatus::Pending && p.created_at < cutoff)
        });
        before - self.pending.len()
    }

    pub fn get_audit_logs(&self, session_id: &str) -> Vec<&HitlAuditEntry> {
        self.audit_log
            .iter()
            .filter(|e| {
                self.pending
                    .get(e.request_id.as_str())
                    .map(|p| p.session_id == session_id)
                    .unwrap_or(true)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_requires_approval_for_write_allows_read() {
        let policy = HitlPolicy::default();
        assert!(policy.evaluate("write_file").0);
        assert!(!policy.evaluate("read_file").0);
    }

    #[test]
    fn policy_disabled_globally_never_requires_approval() {
        let mut policy = HitlPolicy::default();
        policy.global_enabled = false;
        assert!(!policy.evaluate("write_file").0);
    }

    #[test]
    fn add_pending_twice_is_idempotent() {
        let mut store = ApprovalStore::new();
        let id = ApprovalId::from("r1");
        store.add_pending(id.clone(), ApprovalRequestType::Tool, "write_file", "s1", serde_json::json!({}), "mutation");
        store.add_pending(id.clone(), ApprovalRequestType::Tool, "write_file", "s1", serde_json::json!({"x": 1}), "mutation");
        let p = store.get_pending("r1").unwrap();
        assert_eq!(p.details, serde_json::json!({}));
    }

    #[test]
    fn approve_twice_is_terminal_on_second_call() {
        let mut store = ApprovalStore::new();
        let id = ApprovalId::from("r1");
        store.add_pending(id, ApprovalRequestType::Tool, "write_file", "s1", serde_json::json!({}), "mutation");
        store.approve("r1", None, "user-1").unwrap();
        let err = store.approve("r1", None, "user-1").unwrap_err();
        assert!(matches!(err, CoreError::ApprovalTerminal(_)));
    }
}
