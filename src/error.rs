//! Error types for steward operations.
//!
//! This module provides the error hierarchy using `thiserror` for all
//! subsystems: retrieval, memory, agent graphs, orchestration, HITL,
//! storage, and the CLI.

use thiserror::Error;

/// Result type alias for steward operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for steward operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Retrieval pipeline errors (vector, BM25, fusion, rerank).
    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// LLM provider and response parsing errors.
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    /// Agent graph and orchestration errors.
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// Human-in-the-loop confirmation errors.
    #[error("hitl error: {0}")]
    Hitl(#[from] HitlError),

    /// Storage-related errors (database operations).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// CLI command errors.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

/// Errors from the hybrid retrieval engine.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// The search pipeline failed as a whole.
    #[error("search failed: {0}")]
    SearchFailed(String),

    /// The embedder could not produce a query vector.
    #[error("embedding failed: {0}")]
    Embedding(String),
}

/// Errors from LLM providers and response handling.
#[derive(Error, Debug)]
pub enum LlmError {
    /// API request failure (network, provider error, timeout).
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Provider error description.
        message: String,
        /// HTTP status code when available.
        status: Option<u16>,
    },

    /// The model's output could not be parsed into the expected shape.
    #[error("failed to parse response: {message}")]
    ResponseParse {
        /// What went wrong during parsing.
        message: String,
        /// The raw response content for diagnostics.
        content: String,
    },

    /// No API key was configured for the selected provider.
    #[error("no API key configured for provider: {provider}")]
    ApiKeyMissing {
        /// The provider name.
        provider: String,
    },

    /// The configured provider name is not recognized.
    #[error("unknown LLM provider: {name}")]
    UnknownProvider {
        /// The unrecognized provider name.
        name: String,
    },
}

/// Errors from agent graphs and the orchestrator.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The model did not produce a usable SQL statement.
    #[error("SQL generation failed: {0}")]
    SqlGeneration(String),

    /// A generated SQL statement failed during execution.
    #[error("SQL execution failed: {0}")]
    SqlExecution(String),

    /// A generated statement violated the read-only policy.
    #[error("SQL statement rejected by policy: {reason}")]
    SqlForbidden {
        /// Why the statement was rejected.
        reason: String,
    },

    /// The query matched no rows.
    #[error("no results")]
    NoResults,

    /// An execution plan failed validation.
    #[error("invalid execution plan: {0}")]
    PlanInvalid(String),

    /// A step could not run because a dependency failed.
    #[error("dependency failed: {step_id}")]
    DependencyFailed {
        /// ID of the failed dependency step.
        step_id: String,
    },

    /// A graph was malformed or misrouted at runtime.
    #[error("graph error: {message}")]
    Graph {
        /// Description of the graph failure.
        message: String,
    },

    /// General orchestration failure.
    #[error("orchestration error: {message}")]
    Orchestration {
        /// Description of the failure.
        message: String,
    },
}

/// Errors from the HITL confirmation lifecycle.
#[derive(Error, Debug)]
pub enum HitlError {
    /// No confirmation request with the given ID exists.
    #[error("confirmation request not found: {request_id}")]
    RequestNotFound {
        /// The missing request ID.
        request_id: String,
    },

    /// The request expired before a response arrived.
    #[error("confirmation request expired: {request_id}")]
    RequestExpired {
        /// The expired request ID.
        request_id: String,
    },

    /// The request already left the pending state.
    #[error("confirmation request already resolved: {request_id}")]
    AlreadyResolved {
        /// The resolved request ID.
        request_id: String,
    },

    /// The selected option does not exist on the request.
    #[error("unknown option: {option_id}")]
    UnknownOption {
        /// The unrecognized option ID.
        option_id: String,
    },

    /// Generic rewind is not available for this action.
    #[error("rollback not supported for option: {option_id}")]
    RollbackUnsupported {
        /// The option that cannot be rolled back.
        option_id: String,
    },
}

/// Storage-specific errors for database operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),

    /// Storage not initialized (init command not run).
    #[error("steward not initialized. Run: steward-rs init")]
    NotInitialized,

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// CLI command-specific errors.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Invalid argument provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Command execution failed.
    #[error("command execution failed: {0}")]
    ExecutionFailed(String),

    /// Output format error.
    #[error("output format error: {0}")]
    OutputFormat(String),
}

// Implement From traits for standard library and dependency errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Command(CommandError::ExecutionFailed(err.to_string()))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err.to_string()))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
