//! `SQLite` storage implementation.
//!
//! One [`SqliteStorage`] implements every repository contract. The
//! connection sits behind a `Mutex` so a single handle can be shared
//! across concurrent request tasks; `SQLite` serializes the actual
//! writes, which also gives the per-session ordering the memory store
//! relies on.

// SQLite stores all integers as i64. These casts are intentional and safe
// because we only store non-negative values that fit in usize.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::core::{Chunk, ConversationTurn, Fact, KnowledgeType, TurnRole, new_id};
use crate::embedding::cosine_similarity;
use crate::error::{AgentError, Error, Result, StorageError};
use crate::hitl::schema::{
    ActionExecutionResult, ConfirmationRequest, ConfirmationResponse, ConfirmationStatus,
    UserFeedback,
};
use crate::storage::schema::{
    CHECK_SCHEMA_SQL, CURRENT_SCHEMA_VERSION, GET_VERSION_SQL, SCHEMA_SQL, SET_VERSION_SQL,
    get_migrations_from,
};
use crate::storage::traits::{
    ChunkRepo, ConfirmationRepo, ConversationRepo, FactRepo, SqlExecutor, SqlOutput,
};

/// Default database path relative to the working directory.
pub const DEFAULT_DB_PATH: &str = ".steward/steward.db";

/// Row counts reported by the status command.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StorageStats {
    /// Stored document chunks.
    pub chunk_count: usize,
    /// Stored conversation turns.
    pub turn_count: usize,
    /// Stored long-term facts.
    pub fact_count: usize,
    /// Stored tasks.
    pub task_count: usize,
    /// Confirmation requests still pending.
    pub pending_confirmations: usize,
}

/// SQLite-based storage implementing all repository contracts.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteStorage {
    /// Opens or creates a `SQLite` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Database(e.to_string()))?;
        }

        let conn = Connection::open(&path).map_err(StorageError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;
        let _: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(StorageError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Creates an in-memory `SQLite` database. Useful for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means another task panicked mid-query. The
        // connection itself is still usable.
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Initializes the schema, running migrations when needed.
    /// Idempotent.
    pub fn init(&self) -> Result<()> {
        let conn = self.lock();
        let is_init: i64 = conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;

        if is_init == 0 {
            conn.execute_batch(SCHEMA_SQL).map_err(StorageError::from)?;
            conn.execute(SET_VERSION_SQL, params![CURRENT_SCHEMA_VERSION.to_string()])
                .map_err(StorageError::from)?;
            return Ok(());
        }

        let version: Option<String> = conn
            .query_row(GET_VERSION_SQL, [], |row| row.get(0))
            .optional()
            .map_err(StorageError::from)?;
        let current: u32 = version.and_then(|v| v.parse().ok()).unwrap_or(0);
        if current < CURRENT_SCHEMA_VERSION {
            for migration in get_migrations_from(current) {
                conn.execute_batch(migration.sql)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
            }
            conn.execute(SET_VERSION_SQL, params![CURRENT_SCHEMA_VERSION.to_string()])
                .map_err(StorageError::from)?;
        }
        Ok(())
    }

    /// Checks whether the schema exists.
    pub fn is_initialized(&self) -> Result<bool> {
        let conn = self.lock();
        let is_init: i64 = conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Ok(is_init > 0)
    }

    /// Inserts a user row for the task tables.
    pub fn insert_user(&self, id: &str, name: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO users (id, name) VALUES (?1, ?2)",
            params![id, name],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    /// Inserts a task row.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_task(
        &self,
        id: &str,
        workspace_id: &str,
        title: &str,
        status: &str,
        priority: &str,
        assignee_id: Option<&str>,
        due_date: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO tasks (id, workspace_id, title, status, priority, assignee_id, due_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                workspace_id,
                title,
                status,
                priority,
                assignee_id,
                due_date,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    /// Counts tasks in a workspace.
    pub fn count_tasks(&self, workspace_id: &str) -> Result<usize> {
        let conn = self.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE workspace_id = ?1",
                params![workspace_id],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(count as usize)
    }

    /// Gathers row counts for the status command.
    pub fn stats(&self) -> Result<StorageStats> {
        let conn = self.lock();
        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .map_err(StorageError::from)?;
            Ok(n as usize)
        };
        Ok(StorageStats {
            chunk_count: count("document_chunks")?,
            turn_count: count("conversation_turns")?,
            fact_count: count("long_term_facts")?,
            task_count: count("tasks")?,
            pending_confirmations: {
                let n: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM confirmations WHERE status = 'pending'",
                        [],
                        |row| row.get(0),
                    )
                    .map_err(StorageError::from)?;
                n as usize
            },
        })
    }

    fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
        let mut blob = Vec::with_capacity(embedding.len() * 4);
        for value in embedding {
            blob.extend_from_slice(&value.to_le_bytes());
        }
        blob
    }

    fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn parse_timestamp(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn parse_metadata(raw: &str) -> serde_json::Value {
        serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({}))
    }

    fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
        let embedding: Option<Vec<u8>> = row.get(5)?;
        let metadata: String = row.get(6)?;
        Ok(Chunk {
            chunk_id: row.get(0)?,
            document_id: row.get(1)?,
            workspace_id: row.get(2)?,
            chunk_index: row.get::<_, i64>(3)? as usize,
            text: row.get(4)?,
            embedding: embedding.as_deref().map(Self::blob_to_embedding),
            metadata: Self::parse_metadata(&metadata),
        })
    }

    fn row_to_turn(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationTurn> {
        let role: String = row.get(4)?;
        let timestamp: String = row.get(6)?;
        let metadata: String = row.get(9)?;
        Ok(ConversationTurn {
            turn_id: row.get(0)?,
            workspace_id: row.get(1)?,
            user_id: row.get(2)?,
            session_id: row.get(3)?,
            role: TurnRole::parse(&role),
            content: row.get(5)?,
            timestamp: Self::parse_timestamp(&timestamp),
            agent_used: row.get(7)?,
            confidence: row.get(8)?,
            metadata: Self::parse_metadata(&metadata),
        })
    }

    fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
        let knowledge_type: String = row.get(2)?;
        let last_accessed: Option<String> = row.get(8)?;
        let metadata: String = row.get(9)?;
        Ok(Fact {
            fact_id: row.get(0)?,
            workspace_id: row.get(1)?,
            knowledge_type: KnowledgeType::parse(&knowledge_type),
            key: row.get(3)?,
            value: row.get(4)?,
            source: row.get(5)?,
            confidence: row.get(6)?,
            access_count: row.get(7)?,
            last_accessed_at: last_accessed.as_deref().map(Self::parse_timestamp),
            metadata: Self::parse_metadata(&metadata),
        })
    }

    fn value_ref_to_json(value: ValueRef<'_>) -> serde_json::Value {
        match value {
            ValueRef::Null => serde_json::Value::Null,
            ValueRef::Integer(i) => serde_json::Value::from(i),
            ValueRef::Real(f) => serde_json::Value::from(f),
            ValueRef::Text(t) => {
                serde_json::Value::String(String::from_utf8_lossy(t).into_owned())
            }
            ValueRef::Blob(b) => serde_json::Value::String(format!("<blob {} bytes>", b.len())),
        }
    }
}

const CHUNK_COLUMNS: &str =
    "chunk_id, document_id, workspace_id, chunk_index, chunk_text, embedding, metadata";

impl ChunkRepo for SqliteStorage {
    fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(StorageError::from)?;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO document_chunks (chunk_id, document_id, workspace_id, chunk_index, chunk_text, embedding, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    chunk.chunk_id,
                    chunk.document_id,
                    chunk.workspace_id,
                    chunk.chunk_index as i64,
                    chunk.text,
                    chunk.embedding.as_deref().map(Self::embedding_to_blob),
                    chunk.metadata.to_string(),
                ],
            )
            .map_err(StorageError::from)?;
        }
        tx.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn similarity_search(
        &self,
        workspace_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<(Chunk, f32)>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM document_chunks
                 WHERE workspace_id = ?1 AND embedding IS NOT NULL"
            ))
            .map_err(StorageError::from)?;
        let chunks = stmt
            .query_map(params![workspace_id], Self::row_to_chunk)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;

        let mut scored: Vec<(Chunk, f32)> = chunks
            .into_iter()
            .filter_map(|chunk| {
                let score = chunk
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(query_embedding, e))?;
                Some((chunk, score))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.chunk_id.cmp(&b.0.chunk_id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    fn list_by_workspace(&self, workspace_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM document_chunks
                 WHERE workspace_id = ?1 ORDER BY document_id, chunk_index"
            ))
            .map_err(StorageError::from)?;
        let chunks = stmt
            .query_map(params![workspace_id], Self::row_to_chunk)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(chunks)
    }
}

const TURN_COLUMNS: &str =
    "turn_id, workspace_id, user_id, session_id, role, content, timestamp, agent_used, confidence, metadata";

impl ConversationRepo for SqliteStorage {
    fn append(&self, turn: &ConversationTurn) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO conversation_turns
             (turn_id, workspace_id, user_id, session_id, role, content, timestamp, agent_used, confidence, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                turn.turn_id,
                turn.workspace_id,
                turn.user_id,
                turn.session_id,
                turn.role.as_str(),
                turn.content,
                turn.timestamp.to_rfc3339(),
                turn.agent_used,
                turn.confidence,
                turn.metadata.to_string(),
            ],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    fn get_by_session(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TURN_COLUMNS} FROM conversation_turns
                 WHERE session_id = ?1 ORDER BY timestamp DESC, turn_id DESC LIMIT ?2"
            ))
            .map_err(StorageError::from)?;
        let mut turns = stmt
            .query_map(params![session_id, limit as i64], Self::row_to_turn)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        // Newest-first page, returned in chronological order.
        turns.reverse();
        Ok(turns)
    }

    fn search(
        &self,
        workspace_id: &str,
        user_id: &str,
        exclude_session: &str,
        query: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let conn = self.lock();
        let pattern = format!("%{}%", query.to_lowercase());
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TURN_COLUMNS} FROM conversation_turns
                 WHERE workspace_id = ?1 AND user_id = ?2 AND session_id != ?3
                   AND timestamp >= ?4 AND lower(content) LIKE ?5
                 ORDER BY timestamp DESC LIMIT ?6"
            ))
            .map_err(StorageError::from)?;
        let turns = stmt
            .query_map(
                params![
                    workspace_id,
                    user_id,
                    exclude_session,
                    cutoff.to_rfc3339(),
                    pattern,
                    limit as i64
                ],
                Self::row_to_turn,
            )
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(turns)
    }

    fn delete_session(&self, session_id: &str) -> Result<usize> {
        let conn = self.lock();
        let deleted = conn
            .execute(
                "DELETE FROM conversation_turns WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(StorageError::from)?;
        Ok(deleted)
    }
}

const FACT_COLUMNS: &str = "fact_id, workspace_id, knowledge_type, key, value, source, confidence, access_count, last_accessed_at, metadata";

impl FactRepo for SqliteStorage {
    fn upsert(&self, fact: &Fact) -> Result<Fact> {
        let conn = self.lock();
        let existing = conn
            .query_row(
                &format!(
                    "SELECT {FACT_COLUMNS} FROM long_term_facts
                     WHERE workspace_id = ?1 AND knowledge_type = ?2 AND key = ?3"
                ),
                params![fact.workspace_id, fact.knowledge_type.as_str(), fact.key],
                Self::row_to_fact,
            )
            .optional()
            .map_err(StorageError::from)?;

        if let Some(mut current) = existing {
            // Merge metadata in both branches; value wins only with
            // greater-or-equal confidence.
            let mut merged = current.metadata.clone();
            if let (Some(base), Some(incoming)) = (merged.as_object_mut(), fact.metadata.as_object())
            {
                for (k, v) in incoming {
                    base.insert(k.clone(), v.clone());
                }
            }
            if fact.confidence >= current.confidence {
                current.value = fact.value.clone();
                current.source = fact.source.clone();
                current.confidence = fact.confidence;
            }
            current.metadata = merged;
            conn.execute(
                "UPDATE long_term_facts SET value = ?2, source = ?3, confidence = ?4, metadata = ?5
                 WHERE fact_id = ?1",
                params![
                    current.fact_id,
                    current.value,
                    current.source,
                    current.confidence,
                    current.metadata.to_string(),
                ],
            )
            .map_err(StorageError::from)?;
            return Ok(current);
        }

        let mut stored = fact.clone();
        if stored.fact_id.is_empty() {
            stored.fact_id = new_id("fact");
        }
        conn.execute(
            "INSERT INTO long_term_facts
             (fact_id, workspace_id, knowledge_type, key, value, source, confidence, access_count, last_accessed_at, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, ?8, ?9)",
            params![
                stored.fact_id,
                stored.workspace_id,
                stored.knowledge_type.as_str(),
                stored.key,
                stored.value,
                stored.source,
                stored.confidence,
                Utc::now().to_rfc3339(),
                stored.metadata.to_string(),
            ],
        )
        .map_err(StorageError::from)?;
        stored.access_count = 0;
        Ok(stored)
    }

    fn get(
        &self,
        workspace_id: &str,
        knowledge_type: KnowledgeType,
        key: &str,
    ) -> Result<Option<Fact>> {
        let conn = self.lock();
        let fact = conn
            .query_row(
                &format!(
                    "SELECT {FACT_COLUMNS} FROM long_term_facts
                     WHERE workspace_id = ?1 AND knowledge_type = ?2 AND key = ?3"
                ),
                params![workspace_id, knowledge_type.as_str(), key],
                Self::row_to_fact,
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(fact)
    }

    fn search(&self, workspace_id: &str, query: &str, limit: usize) -> Result<Vec<Fact>> {
        let conn = self.lock();
        let pattern = format!("%{}%", query.to_lowercase());
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {FACT_COLUMNS} FROM long_term_facts
                 WHERE workspace_id = ?1 AND (lower(key) LIKE ?2 OR lower(value) LIKE ?2)
                 ORDER BY confidence DESC, access_count DESC, created_at DESC
                 LIMIT ?3"
            ))
            .map_err(StorageError::from)?;
        let facts = stmt
            .query_map(params![workspace_id, pattern, limit as i64], Self::row_to_fact)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(facts)
    }

    fn increment_access(&self, fact_ids: &[String]) -> Result<()> {
        let conn = self.lock();
        let now = Utc::now().to_rfc3339();
        for fact_id in fact_ids {
            conn.execute(
                "UPDATE long_term_facts
                 SET access_count = access_count + 1, last_accessed_at = ?2
                 WHERE fact_id = ?1",
                params![fact_id, now],
            )
            .map_err(StorageError::from)?;
        }
        Ok(())
    }

    fn sweep_below(&self, workspace_id: &str, min_confidence: f64) -> Result<usize> {
        let conn = self.lock();
        let removed = conn
            .execute(
                "DELETE FROM long_term_facts WHERE workspace_id = ?1 AND confidence < ?2",
                params![workspace_id, min_confidence],
            )
            .map_err(StorageError::from)?;
        Ok(removed)
    }
}

impl ConfirmationRepo for SqliteStorage {
    fn create(&self, request: &ConfirmationRequest) -> Result<()> {
        let conn = self.lock();
        let payload =
            serde_json::to_string(request).map_err(|e| StorageError::Serialization(e.to_string()))?;
        conn.execute(
            "INSERT INTO confirmations
             (request_id, workspace_id, user_id, status, request, response, responded_at, created_at, expires_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, NULL, NULL, ?5, ?6)",
            params![
                request.request_id,
                request.workspace_id,
                request.user_id,
                payload,
                request.created_at.to_rfc3339(),
                request.expires_at.to_rfc3339(),
            ],
        )
        .map_err(StorageError::from)?;
        debug!(request_id = %request.request_id, "confirmation request stored");
        Ok(())
    }

    fn get(
        &self,
        request_id: &str,
    ) -> Result<Option<(ConfirmationRequest, Option<ConfirmationResponse>)>> {
        let conn = self.lock();
        let row: Option<(String, String, Option<String>)> = conn
            .query_row(
                "SELECT status, request, response FROM confirmations WHERE request_id = ?1",
                params![request_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(StorageError::from)?;

        let Some((status, request_json, response_json)) = row else {
            return Ok(None);
        };
        let mut request: ConfirmationRequest = serde_json::from_str(&request_json)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        request.status = ConfirmationStatus::parse(&status);
        let response = match response_json {
            Some(json) => Some(
                serde_json::from_str(&json)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Some((request, response)))
    }

    fn update_status(
        &self,
        request_id: &str,
        status: ConfirmationStatus,
        response: &ConfirmationResponse,
    ) -> Result<bool> {
        let conn = self.lock();
        let payload = serde_json::to_string(response)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        // Conditional update keyed on pending status; losers of the race
        // see 0 rows changed and must read back the stored response.
        let changed = conn
            .execute(
                "UPDATE confirmations
                 SET status = ?2, response = ?3, responded_at = ?4
                 WHERE request_id = ?1 AND status = 'pending'",
                params![
                    request_id,
                    status.as_str(),
                    payload,
                    response.responded_at.to_rfc3339(),
                ],
            )
            .map_err(StorageError::from)?;
        if changed == 0 {
            warn!(request_id, "status transition skipped: not pending");
        }
        Ok(changed == 1)
    }

    fn list_pending(&self, workspace_id: &str) -> Result<Vec<ConfirmationRequest>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT request FROM confirmations
                 WHERE workspace_id = ?1 AND status = 'pending'
                 ORDER BY created_at",
            )
            .map_err(StorageError::from)?;
        let payloads = stmt
            .query_map(params![workspace_id], |row| row.get::<_, String>(0))
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        let mut requests = Vec::with_capacity(payloads.len());
        for payload in payloads {
            requests.push(
                serde_json::from_str(&payload)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
            );
        }
        Ok(requests)
    }

    fn record_execution(&self, result: &ActionExecutionResult) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO action_audit (audit_id, request_id, option_id, success, result, rollback_id, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new_id("audit"),
                result.request_id,
                result.option_id,
                i64::from(result.success),
                result.result.to_string(),
                result.rollback_id,
                result.executed_at.to_rfc3339(),
            ],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    fn record_feedback(&self, feedback: &UserFeedback) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO hitl_feedback (feedback_id, request_id, rating, sentiment, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                feedback.feedback_id,
                feedback.request_id,
                i64::from(feedback.rating),
                feedback.sentiment.as_str(),
                feedback.comment,
                feedback.created_at.to_rfc3339(),
            ],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }
}

impl SqlExecutor for SqliteStorage {
    fn execute(
        &self,
        sql: &str,
        parameters: &[(&str, &str)],
        limit: usize,
        timeout: Duration,
        read_only: bool,
    ) -> Result<SqlOutput> {
        let trimmed = sql.trim().trim_end_matches(';').trim();
        if read_only {
            if !trimmed.to_uppercase().starts_with("SELECT") {
                return Err(Error::Agent(AgentError::SqlForbidden {
                    reason: "only SELECT statements are allowed".to_string(),
                }));
            }
            if trimmed.contains(';') {
                return Err(Error::Agent(AgentError::SqlForbidden {
                    reason: "multiple statements are not allowed".to_string(),
                }));
            }
        }

        let conn = self.lock();
        let start = Instant::now();

        let mut stmt = conn
            .prepare(trimmed)
            .map_err(|e| AgentError::SqlExecution(e.to_string()))?;
        for (name, value) in parameters {
            if let Ok(Some(idx)) = stmt.parameter_index(name) {
                stmt.raw_bind_parameter(idx, value)
                    .map_err(|e| AgentError::SqlExecution(e.to_string()))?;
            }
        }
        let column_names: Vec<String> =
            stmt.column_names().iter().map(ToString::to_string).collect();

        let mut rows = stmt.raw_query();
        let mut out = Vec::new();
        let mut truncated = false;
        loop {
            // Wall-clock deadline, checked between row fetches.
            if start.elapsed() > timeout {
                return Err(Error::Agent(AgentError::SqlExecution(format!(
                    "query exceeded {}s timeout",
                    timeout.as_secs()
                ))));
            }
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => {
                    return Err(Error::Agent(AgentError::SqlExecution(e.to_string())));
                }
            };
            if out.len() >= limit {
                truncated = true;
                break;
            }
            let mut object = serde_json::Map::with_capacity(column_names.len());
            for (i, name) in column_names.iter().enumerate() {
                let value = row
                    .get_ref(i)
                    .map(Self::value_ref_to_json)
                    .unwrap_or(serde_json::Value::Null);
                object.insert(name.clone(), value);
            }
            out.push(serde_json::Value::Object(object));
        }
        let row_count = out.len();
        Ok(SqlOutput {
            rows: out,
            row_count,
            truncated,
        })
    }
}
