//! # STEWARD-RS
//!
//! Workspace assistant core: agent graph orchestration, hybrid
//! retrieval, and human-in-the-loop confirmation.
//!
//! Steward answers natural-language questions about a workspace's
//! documents and tasks. Queries flow through an orchestrator that
//! classifies intent, plans execution across specialized agents
//! (document QA, task SQL analysis, board visualization), and
//! synthesizes a final answer. Agent-initiated risky operations are
//! intercepted by a confirmation layer with durable, auditable
//! request/response lifecycles.
//!
//! ## Subsystems
//!
//! - **Retrieval**: vector + BM25 search fused with Reciprocal Rank
//!   Fusion and reranked against query-text signals
//! - **Memory**: append-only conversation turns plus a keyed long-term
//!   fact store, composed into per-query context blocks
//! - **Agents**: three deterministic graph workflows over a shared
//!   typed-state runtime
//! - **Orchestrator**: intent detection → planning → dependency-ordered
//!   execution → synthesis
//! - **HITL**: risk classification, curated option menus, durable
//!   confirmations with timeout policies

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod agents;
pub mod cli;
pub mod config;
pub mod core;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod hitl;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod retrieval;
pub mod storage;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Re-export core domain types
pub use core::{Chunk, ConversationTurn, Fact, KnowledgeType, TurnRole};

// Re-export configuration
pub use config::{
    Bm25Config, FusionMode, HitlConfig, LlmConfig, MemoryConfig, ProviderConfig, RerankWeights,
    RetrievalConfig, SqlConfig, StewardConfig, TimeoutAction,
};

// Re-export storage types
pub use storage::{
    ChunkRepo, ConfirmationRepo, ConversationRepo, DEFAULT_DB_PATH, FactRepo, SqlExecutor,
    SqliteStorage,
};

// Re-export retrieval types
pub use retrieval::{HybridRetriever, SearchHit, reciprocal_rank_fusion};

// Re-export embedding types
pub use embedding::{DEFAULT_DIMENSIONS, Embedder, HashEmbedder, cosine_similarity};

// Re-export memory types
pub use memory::{FactExtractor, MemoryStore};

// Re-export agents
pub use agents::{BoardAgent, ChartType, DocumentAgent, TaskAgent};

// Re-export orchestration types
pub use orchestrator::{
    AgentTarget, ExecutionPlan, ExecutionStep, Intent, IntentType, Orchestrator, QueryResponse,
    StepResult, StepType,
};

// Re-export HITL types
pub use hitl::{
    ActionOption, ConfirmationRequest, ConfirmationResponse, ConfirmationStatus, HitlController,
    HitlOutcome, Severity, UserFeedback,
};

// Re-export LLM capability types
pub use llm::{ChatMessage, ChatRequest, ChatResponse, LlmHandle, LlmProvider, create_provider};

// Re-export CLI types
pub use cli::{Cli, Commands};
