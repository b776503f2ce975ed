//! Repository contracts.
//!
//! The persistence layer is consumed through these traits so the agent
//! substrate stays decoupled from the concrete database. All
//! implementations must be safe for concurrent use from multiple
//! request tasks.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::core::{Chunk, ConversationTurn, Fact, KnowledgeType};
use crate::error::Result;
use crate::hitl::schema::{ActionExecutionResult, ConfirmationRequest, ConfirmationResponse,
    ConfirmationStatus, UserFeedback};

/// Chunk persistence and vector lookup.
pub trait ChunkRepo: Send + Sync {
    /// Inserts chunks (used by ingestion; chunks are immutable afterwards).
    fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Returns the workspace's chunks nearest to the query embedding by
    /// cosine distance, best first. Chunks without an embedding are
    /// excluded.
    fn similarity_search(
        &self,
        workspace_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<(Chunk, f32)>>;

    /// Returns every chunk in the workspace, ordered by
    /// `(document_id, chunk_index)`.
    fn list_by_workspace(&self, workspace_id: &str) -> Result<Vec<Chunk>>;
}

/// Conversation turn persistence.
pub trait ConversationRepo: Send + Sync {
    /// Appends a turn. Turns are append-only per session.
    fn append(&self, turn: &ConversationTurn) -> Result<()>;

    /// Returns the most recent `limit` turns of a session in
    /// chronological order.
    fn get_by_session(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>>;

    /// Substring search over turns of the same user and workspace in
    /// *other* sessions, newest first, restricted to turns at or after
    /// `cutoff`.
    fn search(
        &self,
        workspace_id: &str,
        user_id: &str,
        exclude_session: &str,
        query: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>>;

    /// Deletes all turns of a session, returning the number removed.
    fn delete_session(&self, session_id: &str) -> Result<usize>;
}

/// Long-term fact persistence.
pub trait FactRepo: Send + Sync {
    /// Upserts a fact by `(workspace_id, knowledge_type, key)`.
    ///
    /// If the new confidence is greater than or equal to the existing
    /// one, value/source/confidence are replaced; otherwise the
    /// existing value is kept and only metadata is merged.
    fn upsert(&self, fact: &Fact) -> Result<Fact>;

    /// Looks up a fact by its natural key.
    fn get(
        &self,
        workspace_id: &str,
        knowledge_type: KnowledgeType,
        key: &str,
    ) -> Result<Option<Fact>>;

    /// Substring search over key and value, ranked by confidence desc,
    /// access count desc, then recency.
    fn search(&self, workspace_id: &str, query: &str, limit: usize) -> Result<Vec<Fact>>;

    /// Increments access counts and stamps `last_accessed_at` for the
    /// given facts.
    fn increment_access(&self, fact_ids: &[String]) -> Result<()>;

    /// Deletes facts below the confidence floor, returning the number
    /// removed.
    fn sweep_below(&self, workspace_id: &str, min_confidence: f64) -> Result<usize>;
}

/// Durable confirmation request persistence.
///
/// Status transitions are guarded by a compare-and-set on
/// `status = pending`, so a request leaves the pending state exactly
/// once even under concurrent submissions.
pub trait ConfirmationRepo: Send + Sync {
    /// Persists a new request in the pending state.
    fn create(&self, request: &ConfirmationRequest) -> Result<()>;

    /// Loads a request and its response, if any.
    fn get(
        &self,
        request_id: &str,
    ) -> Result<Option<(ConfirmationRequest, Option<ConfirmationResponse>)>>;

    /// Atomically moves a pending request to a terminal status,
    /// recording the response. Returns `false` when the request was no
    /// longer pending (the stored first response wins).
    fn update_status(
        &self,
        request_id: &str,
        status: ConfirmationStatus,
        response: &ConfirmationResponse,
    ) -> Result<bool>;

    /// Lists pending requests for a workspace, oldest first.
    fn list_pending(&self, workspace_id: &str) -> Result<Vec<ConfirmationRequest>>;

    /// Appends an execution record to the audit trail.
    fn record_execution(&self, result: &ActionExecutionResult) -> Result<()>;

    /// Stores user feedback linked to a request.
    fn record_feedback(&self, feedback: &UserFeedback) -> Result<()>;
}

/// Output of a guarded SQL execution.
#[derive(Debug, Clone)]
pub struct SqlOutput {
    /// Result rows as JSON objects keyed by column name.
    pub rows: Vec<serde_json::Value>,
    /// Number of rows returned (after the cap).
    pub row_count: usize,
    /// Whether the row cap truncated the result.
    pub truncated: bool,
}

/// Guarded execution of generated SQL.
pub trait SqlExecutor: Send + Sync {
    /// Executes a statement with named parameters under a row cap and a
    /// wall-clock timeout. With `read_only`, anything other than a
    /// single `SELECT` is rejected before touching the database.
    fn execute(
        &self,
        sql: &str,
        parameters: &[(&str, &str)],
        limit: usize,
        timeout: Duration,
        read_only: bool,
    ) -> Result<SqlOutput>;
}
