//! Command execution.
//!
//! Wires the configured stack together (storage, embedder, retriever,
//! memory, agents, orchestrator, HITL controller) and runs one
//! subcommand to completion, returning the text to print.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use crate::agents::{BoardAgent, DocumentAgent, TaskAgent};
use crate::cli::parser::{Cli, Commands};
use crate::config::StewardConfig;
use crate::core::{Chunk, new_id};
use crate::embedding::{Embedder, HashEmbedder};
use crate::error::{CommandError, Error, Result};
use crate::hitl::{HitlController, HitlOutcome, Sentiment, UserFeedback};
use crate::llm::{LlmHandle, create_provider};
use crate::memory::{FactExtractor, MemoryStore};
use crate::orchestrator::Orchestrator;
use crate::retrieval::HybridRetriever;
use crate::storage::{
    ChunkRepo, ConfirmationRepo, ConversationRepo, FactRepo, SqlExecutor, SqliteStorage,
};

/// The fully wired assistant stack.
struct Stack {
    memory: Arc<MemoryStore>,
    orchestrator: Arc<Orchestrator>,
    hitl: HitlController,
}

fn open_storage(cli: &Cli) -> Result<Arc<SqliteStorage>> {
    let path = cli
        .db_path
        .clone()
        .unwrap_or_else(|| crate::storage::DEFAULT_DB_PATH.into());
    Ok(Arc::new(SqliteStorage::open(path)?))
}

fn build_stack(cli: &Cli, storage: &Arc<SqliteStorage>) -> Result<Stack> {
    let mut builder = StewardConfig::builder().from_env();
    if let Some(provider) = &cli.provider {
        builder = builder.default_provider(provider.clone());
    }
    let config = builder.build()?;

    let provider = create_provider(&config.llm.default_provider, &config.llm)?;
    let provider_config = config
        .llm
        .providers
        .get(&config.llm.default_provider)
        .ok_or_else(|| Error::Config {
            message: format!("no settings for provider {}", config.llm.default_provider),
        })?;
    let llm = LlmHandle::new(provider, provider_config);

    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
    let retriever = Arc::new(HybridRetriever::new(config.retrieval.clone(), embedder));

    let conversations: Arc<dyn ConversationRepo> = storage.clone() as Arc<dyn ConversationRepo>;
    let facts: Arc<dyn FactRepo> = storage.clone() as Arc<dyn FactRepo>;
    let chunks: Arc<dyn ChunkRepo> = storage.clone() as Arc<dyn ChunkRepo>;
    let executor: Arc<dyn SqlExecutor> = storage.clone() as Arc<dyn SqlExecutor>;
    let confirmations: Arc<dyn ConfirmationRepo> = storage.clone() as Arc<dyn ConfirmationRepo>;

    let memory = Arc::new(MemoryStore::new(
        config.memory,
        conversations,
        facts,
        Some(FactExtractor::new(llm.clone())),
    ));
    let document = Arc::new(DocumentAgent::new(
        llm.clone(),
        retriever,
        chunks,
        Arc::clone(&memory),
    ));
    let task = Arc::new(TaskAgent::new(llm.clone(), Arc::clone(&executor), config.sql));
    let board = Arc::new(BoardAgent::new(llm.clone(), executor));
    let orchestrator = Arc::new(Orchestrator::new(
        llm,
        document,
        Arc::clone(&task),
        Arc::clone(&board),
    ));
    let hitl = HitlController::new(
        config.hitl,
        Arc::clone(&orchestrator),
        task,
        board,
        confirmations,
    );

    Ok(Stack {
        memory,
        orchestrator,
        hitl,
    })
}

/// Executes the parsed CLI command, returning the output to print.
pub async fn execute(cli: &Cli) -> Result<String> {
    match &cli.command {
        Commands::Init => {
            let storage = open_storage(cli)?;
            storage.init()?;
            Ok(format!(
                "Initialized steward database at {}\n",
                storage
                    .path()
                    .map_or_else(|| "<memory>".to_string(), |p| p.display().to_string())
            ))
        }
        Commands::Status => {
            let storage = open_storage(cli)?;
            let stats = storage.stats()?;
            if cli.format == "json" {
                return serde_json::to_string_pretty(&stats)
                    .map_err(|e| Error::Command(CommandError::OutputFormat(e.to_string())));
            }
            Ok(format!(
                "chunks: {}\nturns: {}\nfacts: {}\ntasks: {}\npending confirmations: {}\n",
                stats.chunk_count,
                stats.turn_count,
                stats.fact_count,
                stats.task_count,
                stats.pending_confirmations,
            ))
        }
        Commands::Ingest {
            file,
            workspace,
            document_name,
        } => {
            let storage = open_storage(cli)?;
            let count = ingest_file(&storage, file, workspace, document_name.as_deref())?;
            Ok(format!("Stored {count} chunks from {}\n", file.display()))
        }
        Commands::Query {
            query,
            workspace,
            user,
            session,
            no_hitl,
        } => {
            let storage = open_storage(cli)?;
            let stack = build_stack(cli, &storage)?;
            run_query(&stack, cli, query, workspace, user, session, *no_hitl).await
        }
        Commands::Pending { workspace } => {
            let storage = open_storage(cli)?;
            let stack = build_stack(cli, &storage)?;
            let pending = stack.hitl.pending(workspace)?;
            if pending.is_empty() {
                return Ok("No pending confirmation requests.\n".to_string());
            }
            let mut out = String::new();
            for request in pending {
                let _ = writeln!(
                    out,
                    "{}  [{}]  {}  (expires {})",
                    request.request_id,
                    request.max_severity().as_str(),
                    request.title,
                    request.expires_at.to_rfc3339(),
                );
                for option in &request.options {
                    let _ = writeln!(out, "    {} — {}", option.id, option.label);
                }
            }
            Ok(out)
        }
        Commands::Respond {
            request_id,
            option,
            reject,
            reason,
            execute,
        } => {
            let storage = open_storage(cli)?;
            let stack = build_stack(cli, &storage)?;
            let selected = if *reject { None } else { option.as_deref() };
            let response =
                stack
                    .hitl
                    .submit_response(request_id, selected, reason.as_deref(), None)?;
            let mut out = format!(
                "Request {} -> {}\n",
                request_id,
                response.status.as_str()
            );
            if *execute {
                let outcome = stack
                    .hitl
                    .execute_confirmed_action(request_id, &response)
                    .await?;
                let _ = writeln!(out, "{}", outcome.answer);
                if let Some(rollback_id) = outcome.rollback_id {
                    let _ = writeln!(out, "rollback id: {rollback_id}");
                }
            }
            Ok(out)
        }
        Commands::Feedback {
            request_id,
            rating,
            sentiment,
            comment,
        } => {
            let storage = open_storage(cli)?;
            let stack = build_stack(cli, &storage)?;
            let sentiment = match sentiment.as_str() {
                "positive" => Sentiment::Positive,
                "negative" => Sentiment::Negative,
                _ => Sentiment::Neutral,
            };
            let feedback = UserFeedback::new(request_id, *rating, sentiment, comment.clone());
            stack.hitl.collect_feedback(&feedback)?;
            Ok(format!("Feedback recorded ({}/5)\n", feedback.rating))
        }
        Commands::SweepFacts { workspace } => {
            let storage = open_storage(cli)?;
            let stack = build_stack(cli, &storage)?;
            let removed = stack.memory.sweep_facts(workspace)?;
            Ok(format!("Removed {removed} low-confidence facts\n"))
        }
        Commands::ClearSession { session } => {
            let storage = open_storage(cli)?;
            let stack = build_stack(cli, &storage)?;
            let removed = stack.memory.clear_session(session)?;
            Ok(format!("Deleted {removed} turns from session {session}\n"))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_query(
    stack: &Stack,
    cli: &Cli,
    query: &str,
    workspace: &str,
    user: &str,
    session: &str,
    no_hitl: bool,
) -> Result<String> {
    if no_hitl {
        let response = stack
            .orchestrator
            .query_as(workspace, query, user, session, None, None)
            .await?;
        if cli.format == "json" {
            return serde_json::to_string_pretty(&response)
                .map_err(|e| Error::Command(CommandError::OutputFormat(e.to_string())));
        }
        return Ok(format!("{}\n", response.answer));
    }

    match stack
        .hitl
        .query_with_hitl(query, workspace, user, None)
        .await?
    {
        HitlOutcome::Answer(response) => {
            if cli.format == "json" {
                return serde_json::to_string_pretty(&*response)
                    .map_err(|e| Error::Command(CommandError::OutputFormat(e.to_string())));
            }
            Ok(format!("{}\n", response.answer))
        }
        HitlOutcome::ConfirmationRequired(payload) => {
            if cli.format == "json" {
                return serde_json::to_string_pretty(&*payload)
                    .map_err(|e| Error::Command(CommandError::OutputFormat(e.to_string())));
            }
            let mut out = format!(
                "{}\n\nrequest id: {}\nseverity: {}\nexpires: {}\noptions:\n",
                payload.answer,
                payload.request_id,
                payload.severity.as_str(),
                payload.expires_at.to_rfc3339(),
            );
            for option in &payload.options {
                let _ = writeln!(
                    out,
                    "  {} — {} ({})",
                    option.id,
                    option.label,
                    if option.reversible {
                        "reversible"
                    } else {
                        "irreversible"
                    }
                );
            }
            let _ = writeln!(
                out,
                "\nRespond with: steward-rs respond {} --option <id> --execute",
                payload.request_id
            );
            Ok(out)
        }
    }
}

/// Splits a text file on blank lines and stores each paragraph as a
/// chunk with a hash embedding.
fn ingest_file(
    storage: &Arc<SqliteStorage>,
    file: &Path,
    workspace: &str,
    document_name: Option<&str>,
) -> Result<usize> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| CommandError::ExecutionFailed(format!("{}: {e}", file.display())))?;
    let name = document_name
        .map(str::to_string)
        .or_else(|| {
            file.file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "document".to_string());

    let embedder = HashEmbedder::default();
    let document_id = new_id("doc");
    let chunks: Vec<Chunk> = content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(index, paragraph)| {
            let embedding = embedder.embed(paragraph).ok();
            Chunk {
                chunk_id: new_id("chunk"),
                document_id: document_id.clone(),
                workspace_id: workspace.to_string(),
                chunk_index: index,
                text: paragraph.to_string(),
                embedding,
                metadata: serde_json::json!({"document_name": name}),
            }
        })
        .collect();

    if chunks.is_empty() {
        return Err(Error::Command(CommandError::InvalidArgument(
            "file contains no text".to_string(),
        )));
    }
    storage.insert_chunks(&chunks)?;
    Ok(chunks.len())
}
