//! DDL for the persisted state layout (§6 "Persisted state layout").
//!
//! The core itself treats this as an external collaborator's storage format —
//! it names the columns, not a driver. This module is that driver: one
//! `CREATE TABLE IF NOT EXISTS` per named collection, plus the
//! `hitl_audit_log` table backing the HITL audit trail.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY,
    title           TEXT NOT NULL,
    description     TEXT,
    active          INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    last_activity   TEXT NOT NULL,
    metadata        TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS messages (
    id                  TEXT PRIMARY KEY,
    conversation_id     TEXT NOT NULL REFERENCES conversations(id),
    role                TEXT NOT NULL,
    content             TEXT NOT NULL,
    tool_calls          TEXT,
    tool_call_id        TEXT,
    name                TEXT,
    timestamp           TEXT NOT NULL,
    metadata            TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, timestamp);

CREATE TABLE IF NOT EXISTS agents (
    id              TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    current_type    TEXT NOT NULL,
    switch_count    INTEGER NOT NULL DEFAULT 0,
    max_switches    INTEGER NOT NULL,
    metadata        TEXT NOT NULL DEFAULT '{}',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    last_switch_at  TEXT
);

CREATE TABLE IF NOT EXISTS agent_switches (
    id              TEXT PRIMARY KEY,
    agent_id        TEXT NOT NULL REFERENCES agents(id),
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    from_type       TEXT,
    to_type         TEXT NOT NULL,
    reason          TEXT,
    switched_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agent_switches_agent
    ON agent_switches(agent_id, switched_at);

CREATE TABLE IF NOT EXISTS plans (
    id                  TEXT PRIMARY KEY,
    conversation_id     TEXT NOT NULL REFERENCES conversations(id),
    goal                TEXT NOT NULL,
    status              TEXT NOT NULL,
    current_subtask_id  TEXT,
    metadata            TEXT NOT NULL DEFAULT '{}',
    approved_at         TEXT,
    started_at          TEXT,
    completed_at        TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subtasks (
    id              TEXT PRIMARY KEY,
    plan_id         TEXT NOT NULL REFERENCES plans(id),
    description     TEXT NOT NULL,
    agent           TEXT NOT NULL,
    status          TEXT NOT NULL,
    dependencies    TEXT NOT NULL DEFAULT '[]',
    estimated_time  TEXT,
    result          TEXT,
    error           TEXT,
    started_at      TEXT,
    completed_at    TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_subtasks_plan ON subtasks(plan_id);

CREATE TABLE IF NOT EXISTS pending_approvals (
    request_id          TEXT PRIMARY KEY,
    request_type        TEXT NOT NULL,
    subject             TEXT NOT NULL,
    session_id          TEXT NOT NULL,
    details             TEXT NOT NULL DEFAULT '{}',
    reason              TEXT,
    status              TEXT NOT NULL,
    decision_reason     TEXT,
    modified_arguments  TEXT,
    created_at          TEXT NOT NULL,
    decided_at          TEXT
);
CREATE INDEX IF NOT EXISTS idx_pending_approvals_session
    ON pending_approvals(session_id, status);

CREATE TABLE IF NOT EXISTS hitl_audit_log (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id      TEXT NOT NULL,
    decision        TEXT NOT NULL,
    decided_by      TEXT NOT NULL,
    reason          TEXT,
    decided_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_hitl_audit_request
    ON hitl_audit_log(request_id, decided_at);
"#;
