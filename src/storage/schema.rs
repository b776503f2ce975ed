//! `SQLite` schema definition and migrations.

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// SQL to check whether the schema has been created.
pub const CHECK_SCHEMA_SQL: &str =
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'steward_meta'";

/// SQL to read the stored schema version.
pub const GET_VERSION_SQL: &str = "SELECT value FROM steward_meta WHERE key = 'schema_version'";

/// SQL to write the schema version.
pub const SET_VERSION_SQL: &str =
    "INSERT OR REPLACE INTO steward_meta (key, value) VALUES ('schema_version', ?1)";

/// Full schema for a fresh database.
///
/// `document_chunks.embedding` holds little-endian f32 bytes; a NULL
/// embedding marks a corrupt chunk that stays eligible for lexical
/// search only. `confirmations` keeps the full request serialized in
/// one JSON column with the response merged in on submission; a
/// non-null `responded_at` marks terminal state.
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS steward_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS document_chunks (
    chunk_id     TEXT PRIMARY KEY,
    document_id  TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    chunk_index  INTEGER NOT NULL,
    chunk_text   TEXT NOT NULL,
    embedding    BLOB,
    metadata     TEXT NOT NULL DEFAULT '{}',
    UNIQUE (document_id, chunk_index)
);
CREATE INDEX IF NOT EXISTS idx_chunks_workspace ON document_chunks (workspace_id);

CREATE TABLE IF NOT EXISTS conversation_turns (
    turn_id      TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    session_id   TEXT NOT NULL,
    role         TEXT NOT NULL,
    content      TEXT NOT NULL,
    timestamp    TEXT NOT NULL,
    agent_used   TEXT,
    confidence   REAL,
    metadata     TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_turns_session ON conversation_turns (session_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_turns_workspace_user ON conversation_turns (workspace_id, user_id);

CREATE TABLE IF NOT EXISTS long_term_facts (
    fact_id          TEXT PRIMARY KEY,
    workspace_id     TEXT NOT NULL,
    knowledge_type   TEXT NOT NULL,
    key              TEXT NOT NULL,
    value            TEXT NOT NULL,
    source           TEXT NOT NULL,
    confidence       REAL NOT NULL,
    access_count     INTEGER NOT NULL DEFAULT 0,
    last_accessed_at TEXT,
    created_at       TEXT NOT NULL,
    metadata         TEXT NOT NULL DEFAULT '{}',
    UNIQUE (workspace_id, knowledge_type, key)
);

CREATE TABLE IF NOT EXISTS confirmations (
    request_id   TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',
    request      TEXT NOT NULL,
    response     TEXT,
    responded_at TEXT,
    created_at   TEXT NOT NULL,
    expires_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_confirmations_pending ON confirmations (workspace_id, status);

CREATE TABLE IF NOT EXISTS action_audit (
    audit_id    TEXT PRIMARY KEY,
    request_id  TEXT NOT NULL,
    option_id   TEXT NOT NULL,
    success     INTEGER NOT NULL,
    result      TEXT NOT NULL DEFAULT '{}',
    rollback_id TEXT,
    executed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS hitl_feedback (
    feedback_id TEXT PRIMARY KEY,
    request_id  TEXT NOT NULL,
    rating      INTEGER NOT NULL,
    sentiment   TEXT NOT NULL,
    comment     TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id   TEXT PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id           TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    title        TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'todo',
    priority     TEXT NOT NULL DEFAULT 'medium',
    assignee_id  TEXT REFERENCES users (id),
    due_date     TEXT,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_workspace ON tasks (workspace_id);
";

/// A single schema migration step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version this migration upgrades to.
    pub version: u32,
    /// SQL batch to run.
    pub sql: &'static str,
}

/// Returns migrations needed to go from `current` to the latest version.
#[must_use]
pub fn get_migrations_from(current: u32) -> Vec<Migration> {
    // Version 1 is the baseline; future migrations append here.
    const MIGRATIONS: &[Migration] = &[];
    MIGRATIONS
        .iter()
        .copied()
        .filter(|m| m.version > current)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_pending_migrations_at_current() {
        assert!(get_migrations_from(CURRENT_SCHEMA_VERSION).is_empty());
    }

    #[test]
    fn test_schema_contains_all_tables() {
        for table in [
            "document_chunks",
            "conversation_turns",
            "long_term_facts",
            "confirmations",
            "action_audit",
            "hitl_feedback",
            "tasks",
            "users",
        ] {
            assert!(SCHEMA_SQL.contains(table), "schema missing table {table}");
        }
    }
}
