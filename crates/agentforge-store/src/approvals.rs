//! Repository for `pending_approvals` and the `hitl_audit_log` audit trail
//! (§6, and the EXPANSION audit log grounded in the original HITL manager's
//! `log_decision` / `get_audit_logs`).

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::db::Store;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct PendingApprovalRow {
    pub request_id: String,
    pub request_type: String,
    pub subject: String,
    pub session_id: String,
    pub details: Value,
    pub reason: Option<String>,
    pub status: String,
    pub decision_reason: Option<String>,
    pub modified_arguments: Option<Value>,
    pub created_at: String,
    pub decided_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HitlAuditRow {
    pub request_id: String,
    pub decision: String,
    pub decided_by: String,
    pub reason: Option<String>,
    pub decided_at: String,
}

impl Store {
    pub fn insert_pending_approval(&self, row: &PendingApprovalRow) -> Result<()> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO pending_approvals (request_id, request_type, subject, session_id, details, reason, status, decision_reason, modified_arguments, created_at, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                row.request_id,
                row.request_type,
                row.subject,
                row.session_id,
                serde_json::to_string(&row.details)?,
                row.reason,
                row.status,
                row.decision_reason,
                row.modified_arguments.as_ref().map(serde_json::to_string).transpose()?,
                row.created_at,
                row.decided_at,
            ],
        )?;
        Ok(())
    }

    pub fn find_pending_approval(&self, request_id: &str) -> Result<Option<PendingApprovalRow>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.query_row(
            "SELECT request_id, request_type, subject, session_id, details, reason, status, decision_reason, modified_arguments, created_at, decided_at
             FROM pending_approvals WHERE request_id = ?1",
            params![request_id],
            row_to_approval,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_pending_for_session(&self, session_id: &str) -> Result<Vec<PendingApprovalRow>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT request_id, request_type, subject, session_id, details, reason, status, decision_reason, modified_arguments, created_at, decided_at
             FROM pending_approvals WHERE session_id = ?1 AND status = 'pending' ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![session_id], row_to_approval)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }

    /// Records the decision on the pending-approval row and appends an
    /// immutable entry to `hitl_audit_log` in the same call, mirroring
    /// `ApprovalStore::decide` pairing a status change with an audit entry.
    pub fn decide_pending_approval(
        &self,
        request_id: &str,
        status: &str,
        decided_by: &str,
        decision_reason: Option<&str>,
        modified_arguments: Option<&Value>,
        decided_at: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let modified_arguments_json = modified_arguments.map(serde_json::to_string).transpose()?;
        conn.execute(
            "UPDATE pending_approvals SET status = ?2, decision_reason = ?3, modified_arguments = ?4, decided_at = ?5 WHERE request_id = ?1",
            params![request_id, status, decision_reason, modified_arguments_json, decided_at],
        )?;
        conn.execute(
            "INSERT INTO hitl_audit_log (request_id, decision, decided_by, reason, decided_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![request_id, status, decided_by, decision_reason, decided_at],
        )?;
        Ok(())
    }

    pub fn get_audit_logs(&self, request_id: &str) -> Result<Vec<HitlAuditRow>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT request_id, decision, decided_by, reason, decided_at
             FROM hitl_audit_log WHERE request_id = ?1 ORDER BY decided_at ASC",
        )?;
        let rows = stmt.query_map(params![request_id], |row| {
            Ok(HitlAuditRow {
                request_id: row.get(0)?,
                decision: row.get(1)?,
                decided_by: row.get(2)?,
                reason: row.get(3)?,
                decided_at: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }
}

fn row_to_approval(row: &rusqlite::Row) -> rusqlite::Result<PendingApprovalRow> {
    let details_json: String = row.get(4)?;
    let modified_arguments_json: Option<String> = row.get(8)?;
    Ok(PendingApprovalRow {
        request_id: row.get(0)?,
        request_type: row.get(1)?,
        subject: row.get(2)?,
        session_id: row.get(3)?,
        details: serde_json::from_str(&details_json).unwrap_or(Value::Null),
        reason: row.get(5)?,
        status: row.get(6)?,
        decision_reason: row.get(7)?,
        modified_arguments: modified_arguments_json.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(9)?,
        decided_at: row.get(10)?,
    })
}
