//! Repository for `agents` and the companion `agent_switches` history (§6).

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::db::Store;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct AgentRow {
    pub id: String,
    pub conversation_id: String,
    pub current_type: String,
    pub switch_count: i64,
    pub max_switches: i64,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
    pub last_switch_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentSwitchRow {
    pub id: String,
    pub agent_id: String,
    pub conversation_id: String,
    pub from_type: Option<String>,
    pub to_type: String,
    pub reason: Option<String>,
    pub switched_at: String,
}

impl Store {
    pub fn upsert_agent(&self, row: &AgentRow) -> Result<()> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.execute(
            "INSERT INTO agents (id, conversation_id, current_type, switch_count, max_switches, metadata, created_at, updated_at, last_switch_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                current_type = excluded.current_type,
                switch_count = excluded.switch_count,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at,
                last_switch_at = excluded.last_switch_at",
            params![
                row.id,
                row.conversation_id,
                row.current_type,
                row.switch_count,
                row.max_switches,
                serde_json::to_string(&row.metadata)?,
                row.created_at,
                row.updated_at,
                row.last_switch_at,
            ],
        )?;
        Ok(())
    }

    pub fn find_agent_by_conversation(&self, conversation_id: &str) -> Result<Option<AgentRow>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.query_row(
            "SELECT id, conversation_id, current_type, switch_count, max_switches, metadata, created_at, updated_at, last_switch_at
             FROM agents WHERE conversation_id = ?1",
            params![conversation_id],
            row_to_agent,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn record_agent_switch(&self, row: &AgentSwitchRow) -> Result<()> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.execute(
            "INSERT INTO agent_switches (id, agent_id, conversation_id, from_type, to_type, reason, switched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![row.id, row.agent_id, row.conversation_id, row.from_type, row.to_type, row.reason, row.switched_at],
        )?;
        Ok(())
    }

    /// Ordered history of an agent's switches, oldest first.
    pub fn list_agent_switches(&self, agent_id: &str) -> Result<Vec<AgentSwitchRow>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, conversation_id, from_type, to_type, reason, switched_at
             FROM agent_switches WHERE agent_id = ?1 ORDER BY switched_at ASC",
        )?;
        let rows = stmt.query_map(params![agent_id], |row| {
            Ok(AgentSwitchRow {
                id: row.get(0)?,
                agent_id: row.get(1)?,
                conversation_id: row.get(2)?,
                from_type: row.get(3)?,
                to_type: row.get(4)?,
                reason: row.get(5)?,
                switched_at: row.get(6)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }
}

fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<AgentRow> {
    let metadata_json: String = row.get(5)?;
    Ok(AgentRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        current_type: row.get(2)?,
        switch_count: row.get(3)?,
        max_switches: row.get(4)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(Value::Null),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        last_switch_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::ConversationRow;

    fn setup() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_conversation(&ConversationRow {
                id: "c1".to_string(),
                title: "t".to_string(),
                description: None,
                active: true,
                created_at: "now".to_string(),
                updated_at: "now".to_string(),
                last_activity: "now".to_string(),
                metadata: serde_json::json!({}),
            })
            .unwrap();
        store
    }

    #[test]
    fn agent_switch_history_is_chronological() {
        let store = setup();
        store
            .upsert_agent(&AgentRow {
                id: "a1".to_string(),
                conversation_id: "c1".to_string(),
                current_type: "orchestrator".to_string(),
                switch_count: 2,
                max_switches: 50,
                metadata: serde_json::json!({}),
                created_at: "now".to_string(),
                updated_at: "now".to_string(),
                last_switch_at: Some("t2".to_string()),
            })
            .unwrap();

        for (id, to, ts) in [("s1", "coder", "t1"), ("s2", "orchestrator", "t2")] {
            store
                .record_agent_switch(&AgentSwitchRow {
                    id: id.to_string(),
                    agent_id: "a1".to_string(),
                    conversation_id: "c1".to_string(),
                    from_type: Some("orchestrator".to_string()),
                    to_type: to.to_string(),
                    reason: None,
                    switched_at: ts.to_string(),
                })
                .unwrap();
        }

        let history = store.list_agent_switches("a1").unwrap();
        assert_eq!(history.iter().map(|r| r.to_type.as_str()).collect::<Vec<_>>(), vec!["coder", "orchestrator"]);

        let agent = store.find_agent_by_conversation("c1").unwrap().unwrap();
        assert_eq!(agent.switch_count, 2);
    }
}
