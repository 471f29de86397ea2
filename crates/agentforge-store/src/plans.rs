//! Repository for `plans` and `subtasks` (§6). Replaces the jsonl plan log
//! this crate carried before: plans are now relational rows, not an
//! append-only file per session.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::db::Store;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct PlanRow {
    pub id: String,
    pub conversation_id: String,
    pub goal: String,
    pub status: String,
    pub current_subtask_id: Option<String>,
    pub metadata: Value,
    pub approved_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct SubtaskRow {
    pub id: String,
    pub plan_id: String,
    pub description: String,
    pub agent: String,
    pub status: String,
    pub dependencies: Vec<String>,
    pub estimated_time: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Store {
    pub fn upsert_plan(&self, row: &PlanRow) -> Result<()> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.execute(
            "INSERT INTO plans (id, conversation_id, goal, status, current_subtask_id, metadata, approved_at, started_at, completed_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                current_subtask_id = excluded.current_subtask_id,
                metadata = excluded.metadata,
                approved_at = excluded.approved_at,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                updated_at = excluded.updated_at",
            params![
                row.id,
                row.conversation_id,
                row.goal,
                row.status,
                row.current_subtask_id,
                serde_json::to_string(&row.metadata)?,
                row.approved_at,
                row.started_at,
                row.completed_at,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn find_plan(&self, id: &str) -> Result<Option<PlanRow>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.query_row(
            "SELECT id, conversation_id, goal, status, current_subtask_id, metadata, approved_at, started_at, completed_at, created_at, updated_at
             FROM plans WHERE id = ?1",
            params![id],
            row_to_plan,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Most recently created plan for a conversation (replaces
    /// `read_latest_plan`'s role from the old jsonl log).
    pub fn find_latest_plan_for_conversation(&self, conversation_id: &str) -> Result<Option<PlanRow>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.query_row(
            "SELECT id, conversation_id, goal, status, current_subtask_id, metadata, approved_at, started_at, completed_at, created_at, updated_at
             FROM plans WHERE conversation_id = ?1 ORDER BY created_at DESC LIMIT 1",
            params![conversation_id],
            row_to_plan,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn upsert_subtask(&self, row: &SubtaskRow) -> Result<()> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.execute(
            "INSERT INTO subtasks (id, plan_id, description, agent, status, dependencies, estimated_time, result, error, started_at, completed_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                result = excluded.result,
                error = excluded.error,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                updated_at = excluded.updated_at",
            params![
                row.id,
                row.plan_id,
                row.description,
                row.agent,
                row.status,
                serde_json::to_string(&row.dependencies)?,
                row.estimated_time,
                row.result,
                row.error,
                row.started_at,
                row.completed_at,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_subtasks(&self, plan_id: &str) -> Result<Vec<SubtaskRow>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, plan_id, description, agent, status, dependencies, estimated_time, result, error, started_at, completed_at, created_at, updated_at
             FROM subtasks WHERE plan_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![plan_id], row_to_subtask)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }
}

fn row_to_plan(row: &rusqlite::Row) -> rusqlite::Result<PlanRow> {
    let metadata_json: String = row.get(5)?;
    Ok(PlanRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        goal: row.get(2)?,
        status: row.get(3)?,
        current_subtask_id: row.get(4)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(Value::Null),
        approved_at: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn row_to_subtask(row: &rusqlite::Row) -> rusqlite::Result<SubtaskRow> {
    let deps_json: String = row.get(5)?;
    Ok(SubtaskRow {
        id: row.get(0)?,
        plan_id: row.get(1)?,
        description: row.get(2)?,
        agent: row.get(3)?,
        status: row.get(4)?,
        dependencies: serde_json::from_str(&deps_json).unwrap_or_default(),
        estimated_time: row.get(6)?,
        result: row.get(7)?,
        error: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}
