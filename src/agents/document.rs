//! Document QA agent.
//!
//! A retrieval-augmented workflow over the hybrid search engine:
//! reformulate → retrieve → memory → rerank → generate, with a fallback
//! path that tries a memory-only answer before giving up.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::agents::prompts::{
    build_generation_prompt, build_memory_fallback_prompt, build_reformulation_prompt,
    fallback_answer,
};
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeFuture, Target, hrtb_node};
use crate::llm::LlmHandle;
use crate::memory::MemoryStore;
use crate::retrieval::{HybridRetriever, SearchHit};
use crate::storage::ChunkRepo;

/// Turns of history used for query reformulation.
const REFORMULATION_TURNS: usize = 5;
/// Minimum length for a memory-only fallback answer to count as
/// substantive.
const MIN_FALLBACK_ANSWER_LEN: usize = 100;
/// Refusal marker checked in the head of a memory-only answer.
const REFUSAL_MARKER: &str = "don't have";
/// Divisor normalizing the top rerank score into a confidence.
const CONFIDENCE_NORM: f64 = 1.5;

/// A source reference extracted from the generated answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Cited chunk.
    pub chunk_id: String,
    /// Owning document.
    pub document_id: String,
    /// Document display name, when known.
    pub document_name: Option<String>,
    /// Chunk position within the document.
    pub chunk_index: usize,
    /// Short excerpt of the cited text.
    pub snippet: String,
}

/// Final output of a document QA run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentAnswer {
    /// Generated answer text.
    pub answer: String,
    /// Sources referenced by the answer.
    pub citations: Vec<Citation>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// True only when the canned no-information path was taken.
    pub fallback_triggered: bool,
    /// Standalone form of the query, when reformulated.
    pub reformulated_query: Option<String>,
    /// Number of chunks surfaced by retrieval.
    pub retrieved_count: usize,
}

/// Workflow state for the document QA graph.
///
/// `retrieved_chunks` is append-only: nodes extend it, never replace it.
#[derive(Debug, Default)]
pub struct DocumentQaState {
    /// Original user query.
    pub query: String,
    /// Workspace scope.
    pub workspace_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Conversation session.
    pub session_id: String,
    /// Standalone form of the query.
    pub reformulated_query: Option<String>,
    /// Chunks surfaced by retrieval (append-only).
    pub retrieved_chunks: Vec<SearchHit>,
    /// Chunks after the final cutoff.
    pub reranked_chunks: Vec<SearchHit>,
    /// Whether the top reranked chunk clears the relevance threshold.
    pub has_relevant_docs: bool,
    /// Composed memory context block.
    pub conversation_context: String,
    /// Generated answer.
    pub answer: String,
    /// Extracted citations.
    pub citations: Vec<Citation>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// True only when the canned no-information path was taken.
    pub fallback_triggered: bool,
    /// Recoverable error captured along the way.
    pub error: Option<String>,
}

/// Retrieval-augmented document question answering.
pub struct DocumentAgent {
    llm: LlmHandle,
    retriever: Arc<HybridRetriever>,
    chunks: Arc<dyn ChunkRepo>,
    memory: Arc<MemoryStore>,
}

impl std::fmt::Debug for DocumentAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentAgent")
            .field("llm", &self.llm)
            .finish()
    }
}

impl DocumentAgent {
    /// Creates a document agent over the given dependencies.
    #[must_use]
    pub fn new(
        llm: LlmHandle,
        retriever: Arc<HybridRetriever>,
        chunks: Arc<dyn ChunkRepo>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        Self {
            llm,
            retriever,
            chunks,
            memory,
        }
    }

    /// Answers a question from the workspace's documents.
    ///
    /// The exchange is recorded in conversation memory and fed to fact
    /// extraction after answering.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures surface as errors; empty retrieval
    /// and low relevance resolve through the fallback path.
    #[instrument(skip(self, query), fields(workspace = workspace_id))]
    pub async fn query(
        &self,
        workspace_id: &str,
        query: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<DocumentAnswer> {
        let mut state = DocumentQaState {
            query: query.to_string(),
            workspace_id: workspace_id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            ..DocumentQaState::default()
        };

        let graph = self.build_graph()?;
        graph.invoke(&mut state).await.map_err(Error::Agent)?;

        // Memory writes are best-effort; they never fail the answer.
        if let Err(e) = self.memory.record_qa_pair(
            workspace_id,
            user_id,
            session_id,
            query,
            &state.answer,
            Some("document"),
            Some(state.confidence),
        ) {
            warn!(error = %e, "failed to record conversation turns");
        }
        if !state.fallback_triggered
            && let Err(e) = self
                .memory
                .extract_and_store_facts(query, &state.answer, workspace_id, user_id, session_id)
                .await
        {
            warn!(error = %e, "fact extraction failed");
        }

        Ok(DocumentAnswer {
            answer: state.answer,
            citations: state.citations,
            confidence: state.confidence,
            fallback_triggered: state.fallback_triggered,
            reformulated_query: state.reformulated_query,
            retrieved_count: state.retrieved_chunks.len(),
        })
    }

    /// Continues text in the active document from the cursor position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Llm`] on provider failure.
    pub async fn complete_text(
        &self,
        query: &str,
        current_content: &str,
        cursor_position: Option<usize>,
    ) -> Result<String> {
        let upto = cursor_position
            .filter(|&p| p <= current_content.len() && current_content.is_char_boundary(p))
            .map_or(current_content, |p| &current_content[..p]);
        let prompt = format!(
            "Continue the document below from where it ends. Match its tone and formatting. \
             Instruction from the user: {query}\n\n---\n{upto}"
        );
        self.llm
            .generate_simple(None, &prompt)
            .await
            .map_err(Error::Llm)
    }

    /// Builds the QA workflow graph.
    fn build_graph(&self) -> Result<Graph<DocumentQaState>> {
        let final_top_k = self.retriever.config().top_k;
        let relevance_threshold = self.retriever.config().relevance_threshold;

        let reformulate = {
            let memory = Arc::clone(&self.memory);
            let llm = self.llm.clone();
            hrtb_node(move |state: &mut DocumentQaState| -> NodeFuture<'_> {
                let memory = Arc::clone(&memory);
                let llm = llm.clone();
                Box::pin(async move {
                    let history = memory
                        .format_for_reformulation(&state.session_id, REFORMULATION_TURNS)
                        .unwrap_or_default();
                    if history.is_empty() {
                        state.reformulated_query = Some(state.query.clone());
                        return Ok(());
                    }
                    let prompt = build_reformulation_prompt(&history, &state.query);
                    match llm.generate_simple(None, &prompt).await {
                        Ok(text) if !text.trim().is_empty() => {
                            state.reformulated_query = Some(text.trim().to_string());
                        }
                        // A failed reformulation falls back to the
                        // original query.
                        _ => state.reformulated_query = Some(state.query.clone()),
                    }
                    Ok(())
                })
            })
        };

        let retrieve = {
            let retriever = Arc::clone(&self.retriever);
            let chunks = Arc::clone(&self.chunks);
            hrtb_node(move |state: &mut DocumentQaState| -> NodeFuture<'_> {
                let retriever = Arc::clone(&retriever);
                let chunks = Arc::clone(&chunks);
                Box::pin(async move {
                    let query = state
                        .reformulated_query
                        .clone()
                        .unwrap_or_else(|| state.query.clone());
                    match retriever.search(
                        chunks.as_ref(),
                        &query,
                        &state.workspace_id,
                        final_top_k * 2,
                    ) {
                        Ok(hits) => {
                            debug!(count = hits.len(), "retrieval complete");
                            state.retrieved_chunks.extend(hits);
                        }
                        Err(e) => {
                            state.error = Some(format!("Retrieval failed: {e}"));
                        }
                    }
                    Ok(())
                })
            })
        };

        let memory_retrieval = {
            let memory = Arc::clone(&self.memory);
            hrtb_node(move |state: &mut DocumentQaState| -> NodeFuture<'_> {
                let memory = Arc::clone(&memory);
                Box::pin(async move {
                    state.conversation_context = memory
                        .get_context(
                            &state.workspace_id,
                            &state.user_id,
                            &state.session_id,
                            &state.query,
                        )
                        .unwrap_or_default();
                    Ok(())
                })
            })
        };

        let rerank = hrtb_node(move |state: &mut DocumentQaState| -> NodeFuture<'_> {
            Box::pin(async move {
                let mut top = state.retrieved_chunks.clone();
                top.truncate(final_top_k);
                for (i, hit) in top.iter_mut().enumerate() {
                    hit.rank = Some(i + 1);
                }
                let top_score = top
                    .first()
                    .and_then(|h| h.score_rerank)
                    .unwrap_or(0.0);
                state.has_relevant_docs = top_score >= relevance_threshold;
                state.reranked_chunks = top;
                Ok(())
            })
        });

        let generate = {
            let llm = self.llm.clone();
            hrtb_node(move |state: &mut DocumentQaState| -> NodeFuture<'_> {
                let llm = llm.clone();
                Box::pin(async move {
                    let prompt = build_generation_prompt(
                        &state.query,
                        &state.reranked_chunks,
                        &state.conversation_context,
                    );
                    match llm.generate_simple(None, &prompt).await {
                        Ok(answer) => {
                            state.citations = extract_citations(&answer, &state.reranked_chunks);
                            let top_score = state
                                .reranked_chunks
                                .first()
                                .and_then(|h| h.score_rerank)
                                .unwrap_or(0.0);
                            state.confidence = (top_score / CONFIDENCE_NORM).min(1.0);
                            state.answer = answer;
                            state.fallback_triggered = false;
                        }
                        Err(e) => {
                            state.error = Some(format!("Generation failed: {e}"));
                            run_fallback(state, &llm).await;
                        }
                    }
                    Ok(())
                })
            })
        };

        let fallback = {
            let llm = self.llm.clone();
            hrtb_node(move |state: &mut DocumentQaState| -> NodeFuture<'_> {
                let llm = llm.clone();
                Box::pin(async move {
                    run_fallback(state, &llm).await;
                    Ok(())
                })
            })
        };

        Graph::builder("reformulate_query")
            .node("reformulate_query", reformulate)
            .node("retrieve", retrieve)
            .node("memory_retrieval", memory_retrieval)
            .node("rerank", rerank)
            .node("generate", generate)
            .node("fallback", fallback)
            .edge("reformulate_query", "retrieve")
            .edge("retrieve", "memory_retrieval")
            .branch(
                "memory_retrieval",
                |state: &DocumentQaState| {
                    if state.retrieved_chunks.is_empty() || state.error.is_some() {
                        "fallback"
                    } else {
                        "rerank"
                    }
                },
                &[
                    ("fallback", Target::Node("fallback")),
                    ("rerank", Target::Node("rerank")),
                ],
            )
            .branch(
                "rerank",
                |state: &DocumentQaState| {
                    if state.has_relevant_docs {
                        "generate"
                    } else {
                        "fallback"
                    }
                },
                &[
                    ("generate", Target::Node("generate")),
                    ("fallback", Target::Node("fallback")),
                ],
            )
            .terminal("generate")
            .terminal("fallback")
            .build()
            .map_err(Error::Agent)
    }
}

/// Fallback path: memory-only answer when context exists, canned
/// no-information answer otherwise.
async fn run_fallback(state: &mut DocumentQaState, llm: &LlmHandle) {
    if !state.conversation_context.is_empty() && state.error.is_none() {
        let prompt = build_memory_fallback_prompt(&state.conversation_context, &state.query);
        if let Ok(answer) = llm.generate_simple(None, &prompt).await {
            let head: String = answer.to_lowercase().chars().take(50).collect();
            if answer.len() > MIN_FALLBACK_ANSWER_LEN && !head.contains(REFUSAL_MARKER) {
                state.answer = answer;
                state.citations = Vec::new();
                state.confidence = 0.5;
                state.fallback_triggered = false;
                return;
            }
        }
    }

    let mut answer = fallback_answer(&state.query);
    if let Some(error) = &state.error {
        answer.push_str("\n\nTechnical details: ");
        answer.push_str(error);
    }
    state.answer = answer;
    state.citations = Vec::new();
    state.confidence = 0.0;
    state.fallback_triggered = true;
}

/// Extracts citations by matching `[n]` references and document-name
/// mentions in the answer against the chunks passed to generation.
#[must_use]
pub fn extract_citations(answer: &str, chunks: &[SearchHit]) -> Vec<Citation> {
    let mut cited: Vec<usize> = Vec::new();

    // Numbered references.
    let mut rest = answer;
    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        if let Some(close) = rest.find(']') {
            if let Ok(num) = rest[..close].trim().parse::<usize>()
                && num >= 1
                && num <= chunks.len()
                && !cited.contains(&(num - 1))
            {
                cited.push(num - 1);
            }
            rest = &rest[close + 1..];
        } else {
            break;
        }
    }

    // Document-name mentions.
    for (i, chunk) in chunks.iter().enumerate() {
        if cited.contains(&i) {
            continue;
        }
        if let Some(name) = chunk.metadata.get("document_name").and_then(|v| v.as_str())
            && !name.is_empty()
            && answer.contains(name)
        {
            cited.push(i);
        }
    }

    cited.sort_unstable();
    cited
        .into_iter()
        .filter_map(|i| {
            let chunk = chunks.get(i)?;
            let mut snippet = chunk.text.clone();
            snippet.truncate(160);
            Some(Citation {
                chunk_id: chunk.chunk_id.clone(),
                document_id: chunk.document_id.clone(),
                document_name: chunk
                    .metadata
                    .get("document_name")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                chunk_index: chunk.chunk_index,
                snippet,
            })
        })
        .collect()
}
