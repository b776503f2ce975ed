//! Core domain types shared across subsystems.
//!
//! Chunks, conversation turns, and long-term facts, plus the ID and
//! clock helpers used when persisting them.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A contiguous piece of a document's text with its embedding.
///
/// Immutable after creation; owned by a document, deletion cascades.
/// `chunk_index` is unique within a document and dense starting at 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk identifier.
    pub chunk_id: String,
    /// Owning document.
    pub document_id: String,
    /// Workspace scope.
    pub workspace_id: String,
    /// Position within the document (0-based, dense).
    pub chunk_index: usize,
    /// Chunk text.
    pub text: String,
    /// Embedding vector. `None` for corrupt chunks, which are excluded
    /// from the vector stage but remain eligible lexically.
    pub embedding: Option<Vec<f32>>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Role of a conversation participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// End-user message.
    User,
    /// Assistant response.
    Assistant,
    /// System annotation.
    System,
}

impl TurnRole {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parses a stored role string, defaulting unknown values to `System`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            _ => Self::System,
        }
    }
}

/// One turn of a conversation session. Append-only per session,
/// ordered by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Unique turn identifier.
    pub turn_id: String,
    /// Workspace scope.
    pub workspace_id: String,
    /// Owning user.
    pub user_id: String,
    /// Session the turn belongs to.
    pub session_id: String,
    /// Speaker role.
    pub role: TurnRole,
    /// Message content.
    pub content: String,
    /// Wall-clock time at recording.
    pub timestamp: DateTime<Utc>,
    /// Agent that produced an assistant turn, when known.
    pub agent_used: Option<String>,
    /// Confidence reported by the producing agent.
    pub confidence: Option<f64>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Category of a long-term fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeType {
    /// A definition of a term.
    Definition,
    /// A general concept.
    Concept,
    /// A worked example.
    Example,
    /// A procedure or how-to.
    Procedure,
    /// A named entity.
    Entity,
    /// Anything else.
    General,
}

impl KnowledgeType {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::Concept => "concept",
            Self::Example => "example",
            Self::Procedure => "procedure",
            Self::Entity => "entity",
            Self::General => "general",
        }
    }

    /// Parses a stored type string, defaulting unknown values to `General`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "definition" => Self::Definition,
            "concept" => Self::Concept,
            "example" => Self::Example,
            "procedure" => Self::Procedure,
            "entity" => Self::Entity,
            _ => Self::General,
        }
    }
}

/// A durable, keyed piece of knowledge extracted from a Q&A pair.
///
/// Unique on `(workspace_id, knowledge_type, key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// Unique fact identifier.
    pub fact_id: String,
    /// Workspace scope. Facts never cross workspaces.
    pub workspace_id: String,
    /// Category of the fact.
    pub knowledge_type: KnowledgeType,
    /// Main entity or topic.
    pub key: String,
    /// The factual content.
    pub value: String,
    /// Where the fact came from (e.g. `"conversation"`).
    pub source: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// How many times the fact has been returned in context.
    pub access_count: i64,
    /// Last time the fact was returned in context.
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a unique identifier with the given prefix.
///
/// Combines wall-clock nanoseconds with a process-wide counter so IDs
/// are unique within and across processes without an external crate.
#[must_use]
pub fn new_id(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{nanos:x}-{counter:x}")
}
