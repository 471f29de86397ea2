//! Repository for `conversations` and `messages` (§6).

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::db::Store;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub last_activity: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub tool_calls: Option<Value>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    pub timestamp: String,
    pub metadata: Value,
}

impl Store {
    pub fn upsert_conversation(&self, row: &ConversationRow) -> Result<()> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.execute(
            "INSERT INTO conversations (id, title, description, active, created_at, updated_at, last_activity, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                active = excluded.active,
                updated_at = excluded.updated_at,
                last_activity = excluded.last_activity,
                metadata = excluded.metadata",
            params![
                row.id,
                row.title,
                row.description,
                row.active as i64,
                row.created_at,
                row.updated_at,
                row.last_activity,
                serde_json::to_string(&row.metadata)?,
            ],
        )?;
        Ok(())
    }

    pub fn find_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.query_row(
            "SELECT id, title, description, active, created_at, updated_at, last_activity, metadata
             FROM conversations WHERE id = ?1",
            params![id],
            row_to_conversation,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_active_conversations(&self) -> Result<Vec<ConversationRow>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, title, description, active, created_at, updated_at, last_activity, metadata
             FROM conversations WHERE active = 1 ORDER BY last_activity DESC",
        )?;
        let rows = stmt.query_map([], row_to_conversation)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }

    pub fn append_message(&self, row: &MessageRow) -> Result<()> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, tool_calls, tool_call_id, name, timestamp, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.id,
                row.conversation_id,
                row.role,
                row.content,
                row.tool_calls.as_ref().map(serde_json::to_string).transpose()?,
                row.tool_call_id,
                row.name,
                row.timestamp,
                serde_json::to_string(&row.metadata)?,
            ],
        )?;
        Ok(())
    }

    /// Ordered by timestamp per conversation, as §6 specifies.
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, tool_calls, tool_call_id, name, timestamp, metadata
             FROM messages WHERE conversation_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], row_to_message)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }
}

fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<ConversationRow> {
    let metadata_json: String = row.get(7)?;
    Ok(ConversationRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        last_activity: row.get(6)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(Value::Null),
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    let tool_calls_json: Option<String> = row.get(4)?;
    let metadata_json: String = row.get(8)?;
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        tool_calls: tool_calls_json.and_then(|s| serde_json::from_str(&s).ok()),
        tool_call_id: row.get(5)?,
        name: row.get(6)?,
        timestamp: row.get(7)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_conversation(id: &str) -> ConversationRow {
        ConversationRow {
            id: id.to_string(),
            title: "untitled".to_string(),
            description: None,
            active: true,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            last_activity: "2026-01-01T00:00:00Z".to_string(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn upsert_then_find_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_conversation(&sample_conversation("c1")).unwrap();
        let found = store.find_conversation("c1").unwrap().unwrap();
        assert_eq!(found.title, "untitled");
        assert!(found.active);
    }

    #[test]
    fn upsert_is_idempotent_update() {
        let store = Store::open_in_memory().unwrap();
        let mut row = sample_conversation("c1");
        store.upsert_conversation(&row).unwrap();
        row.title = "renamed".to_string();
        row.active = false;
        store.upsert_conversation(&row).unwrap();

        let found = store.find_conversation("c1").unwrap().unwrap();
        assert_eq!(found.title, "renamed");
        assert!(!found.active);
    }

    #[test]
    fn messages_are_ordered_by_timestamp() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_conversation(&sample_conversation("c1")).unwrap();
        for (id, ts) in [("m2", "2026-01-01T00:00:02Z"), ("m1", "2026-01-01T00:00:01Z")] {
            store
                .append_message(&MessageRow {
                    id: id.to_string(),
                    conversation_id: "c1".to_string(),
                    role: "user".to_string(),
                    content: id.to_string(),
                    tool_calls: None,
                    tool_call_id: None,
                    name: None,
                    timestamp: ts.to_string(),
                    metadata: serde_json::json!({}),
                })
                .unwrap();
        }

        let messages = store.list_messages("c1").unwrap();
        assert_eq!(messages.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["m1", "m2"]);
    }

    #[test]
    fn list_active_conversations_excludes_inactive() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_conversation(&sample_conversation("active")).unwrap();
        let mut inactive = sample_conversation("inactive");
        inactive.active = false;
        store.upsert_conversation(&inactive).unwrap();

        let active = store.list_active_conversations().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "active");
    }
}
