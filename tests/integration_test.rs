//! Integration tests for steward-rs.
//!
//! End-to-end scenarios run the real stack (sqlite storage, hash
//! embedder, graph workflows, HITL controller) against a scripted LLM
//! provider that answers by prompt shape.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use steward_rs::agents::board::BoardFilters;
use steward_rs::agents::{BoardAgent, ChartType, DocumentAgent, TaskAgent};
use steward_rs::config::{HitlConfig, MemoryConfig, RetrievalConfig, SqlConfig};
use steward_rs::core::{Chunk, new_id};
use steward_rs::embedding::{Embedder, HashEmbedder};
use steward_rs::error::LlmError;
use steward_rs::hitl::{
    ConfirmationRequest, ConfirmationStatus, HitlController, HitlOutcome, Severity,
};
use steward_rs::llm::{ChatRequest, ChatResponse, LlmHandle, LlmProvider, TokenUsage};
use steward_rs::memory::MemoryStore;
use steward_rs::orchestrator::Orchestrator;
use steward_rs::retrieval::HybridRetriever;
use steward_rs::storage::{ChunkRepo, ConfirmationRepo, SqliteStorage};

/// Scripted provider: answers by matching needles against the prompt.
struct ScriptedProvider {
    rules: Vec<(&'static str, String)>,
}

impl ScriptedProvider {
    fn new(rules: Vec<(&'static str, &str)>) -> Arc<Self> {
        Arc::new(Self {
            rules: rules
                .into_iter()
                .map(|(needle, response)| (needle, response.to_string()))
                .collect(),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let haystack: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        for (needle, response) in &self.rules {
            if haystack.contains(needle) {
                return Ok(ChatResponse {
                    content: response.clone(),
                    usage: TokenUsage::default(),
                    finish_reason: Some("stop".to_string()),
                });
            }
        }
        Err(LlmError::ApiRequest {
            message: format!("no scripted response for prompt: {:.80}", haystack),
            status: None,
        })
    }
}

struct TestStack {
    storage: Arc<SqliteStorage>,
    document: Arc<DocumentAgent>,
    task: Arc<TaskAgent>,
    board: Arc<BoardAgent>,
    orchestrator: Arc<Orchestrator>,
    hitl: HitlController,
}

fn build_stack(provider: Arc<dyn LlmProvider>) -> TestStack {
    let storage = Arc::new(SqliteStorage::in_memory().expect("storage"));
    storage.init().expect("init");

    let llm = LlmHandle::with_settings(provider, "scripted-1", 0.0, 1024);
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
    let retriever = Arc::new(HybridRetriever::new(RetrievalConfig::default(), embedder));
    let memory = Arc::new(MemoryStore::new(
        MemoryConfig::default(),
        Arc::clone(&storage),
        Arc::clone(&storage),
        None,
    ));
    let document = Arc::new(DocumentAgent::new(
        llm.clone(),
        retriever,
        Arc::clone(&storage),
        memory,
    ));
    let task = Arc::new(TaskAgent::new(
        llm.clone(),
        Arc::clone(&storage),
        SqlConfig::default(),
    ));
    let board = Arc::new(BoardAgent::new(llm.clone(), Arc::clone(&storage)));
    let orchestrator = Arc::new(Orchestrator::new(
        llm,
        Arc::clone(&document),
        Arc::clone(&task),
        Arc::clone(&board),
    ));
    let hitl_config = HitlConfig {
        poll_interval: std::time::Duration::from_millis(20),
        ..HitlConfig::default()
    };
    let hitl = HitlController::new(
        hitl_config,
        Arc::clone(&orchestrator),
        Arc::clone(&task),
        Arc::clone(&board),
        Arc::clone(&storage),
    );

    TestStack {
        storage,
        document,
        task,
        board,
        orchestrator,
        hitl,
    }
}

fn seed_chunks(storage: &SqliteStorage, workspace: &str, texts: &[&str]) {
    let embedder = HashEmbedder::default();
    let document_id = new_id("doc");
    let chunks: Vec<Chunk> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            chunk_id: format!("chunk-{i}"),
            document_id: document_id.clone(),
            workspace_id: workspace.to_string(),
            chunk_index: i,
            text: (*text).to_string(),
            embedding: Some(embedder.embed(text).expect("embed")),
            metadata: serde_json::json!({"document_name": "notes.md"}),
        })
        .collect();
    storage.insert_chunks(&chunks).expect("insert chunks");
}

fn seed_tasks(storage: &SqliteStorage, workspace: &str, count: usize, with_dates: bool) {
    storage.insert_user("u-ada", "Ada").expect("user");
    for i in 0..count {
        let due = with_dates.then(|| format!("2026-08-{:02}", (i % 28) + 1));
        storage
            .insert_task(
                &format!("task-{i}"),
                workspace,
                &format!("Task number {i}"),
                if i % 3 == 0 { "done" } else { "in_progress" },
                if i % 4 == 0 { "high" } else { "medium" },
                Some("u-ada"),
                due.as_deref(),
            )
            .expect("task");
    }
}

const TASK_INTENT: &str = r#"{"type": "task_query", "confidence": 0.95, "agent": "task", "reasoning": "task data", "entities": {}, "requires_decomposition": false, "requires_agents": true}"#;
const BOARD_INTENT: &str = r#"{"type": "board_query", "confidence": 0.9, "agent": "board", "reasoning": "chart", "entities": {}, "requires_decomposition": false, "requires_agents": true}"#;

// ---------------------------------------------------------------------------
// S1: document QA hit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s1_document_qa_hit() {
    let provider = ScriptedProvider::new(vec![(
        "## Sources",
        "Agentic AI uses large language models to plan and act autonomously [1].",
    )]);
    let stack = build_stack(provider);
    seed_chunks(
        &stack.storage,
        "ws-1",
        &["Agentic AI uses LLMs to plan and act."],
    );

    let answer = stack
        .document
        .query("ws-1", "What is agentic AI?", "u1", "s1")
        .await
        .expect("document query");

    assert!(!answer.answer.is_empty());
    assert!(!answer.fallback_triggered);
    assert!(answer.confidence > 0.0);
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].chunk_id, "chunk-0");
}

// ---------------------------------------------------------------------------
// S2: document QA miss
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s2_document_qa_miss_falls_back() {
    let provider = ScriptedProvider::new(vec![]);
    let stack = build_stack(provider);
    seed_chunks(
        &stack.storage,
        "ws-1",
        &[
            "Boil the pasta in salted water for nine minutes.",
            "A good tomato sauce starts with garlic and olive oil.",
        ],
    );

    let answer = stack
        .document
        .query("ws-1", "Explain kernel scheduling.", "u1", "s1")
        .await
        .expect("document query");

    assert!(answer.fallback_triggered);
    assert!((answer.confidence - 0.0).abs() < f64::EPSILON);
    assert!(answer.citations.is_empty());
    assert!(!answer.answer.is_empty());
}

// ---------------------------------------------------------------------------
// S3: task risk — delete with condition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s3_delete_completed_tasks_requires_confirmation() {
    let provider = ScriptedProvider::new(vec![
        ("# Intent Detection Task", TASK_INTENT),
        (
            "# Task Question",
            "```sql\nSELECT id FROM tasks WHERE workspace_id = :workspace_id AND status = 'done'\n```",
        ),
    ]);
    let stack = build_stack(provider);

    let outcome = stack
        .hitl
        .query_with_hitl("Delete all completed tasks", "ws-1", "u1", None)
        .await
        .expect("hitl query");

    let HitlOutcome::ConfirmationRequired(payload) = outcome else {
        unreachable!("expected a confirmation request")
    };
    assert!(payload.requires_confirmation);
    assert_eq!(payload.severity, Severity::High);
    let archive = payload
        .options
        .iter()
        .find(|o| o.id == "archive_instead")
        .expect("archive option present");
    assert!(archive.reversible);
}

// ---------------------------------------------------------------------------
// S4: task risk — bulk delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s4_bulk_delete_is_critical_with_long_timeout() {
    let provider = ScriptedProvider::new(vec![
        ("# Intent Detection Task", TASK_INTENT),
        (
            "# Task Question",
            "```sql\nSELECT id FROM tasks WHERE workspace_id = :workspace_id\n```",
        ),
    ]);
    let stack = build_stack(provider);

    let outcome = stack
        .hitl
        .query_with_hitl("Delete every task", "ws-1", "u1", None)
        .await
        .expect("hitl query");

    let HitlOutcome::ConfirmationRequired(payload) = outcome else {
        unreachable!("expected a confirmation request")
    };
    assert_eq!(payload.severity, Severity::Critical);

    let pending = stack.hitl.pending("ws-1").expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].timeout_seconds, 600);
}

// ---------------------------------------------------------------------------
// S5: board risk — large gantt
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s5_large_gantt_offers_limited_scope() {
    let provider = ScriptedProvider::new(vec![("# Intent Detection Task", BOARD_INTENT)]);
    let stack = build_stack(provider);
    seed_tasks(&stack.storage, "ws-1", 150, true);

    let outcome = stack
        .hitl
        .query_with_hitl("Generate Gantt for all tasks", "ws-1", "u1", None)
        .await
        .expect("hitl query");

    let HitlOutcome::ConfirmationRequired(payload) = outcome else {
        unreachable!("expected a confirmation request")
    };
    assert_eq!(payload.severity, Severity::Medium);
    assert!(payload.options.iter().any(|o| o.id == "generate_limited"));

    let pending = stack.hitl.pending("ws-1").expect("pending");
    let limited = pending[0]
        .option("generate_limited")
        .expect("limited option");
    assert_eq!(limited.parameters["limit"], 100);
}

// ---------------------------------------------------------------------------
// S6: plan with dependency failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s6_dependency_failure_marks_dependent_without_execution() {
    let plan_json = r#"{
        "steps": [
            {"step_id": "step1", "type": "document_completion", "agent": "document", "query": "continue the doc", "dependencies": [], "reasoning": ""},
            {"step_id": "step2", "type": "query_document", "agent": "document", "query": "summarize", "dependencies": ["step1"], "reasoning": ""}
        ],
        "estimated_complexity": "medium",
        "requires_synthesis": true,
        "reasoning": "completion then summary"
    }"#;
    let provider = ScriptedProvider::new(vec![
        (
            "# Intent Detection Task",
            r#"{"type": "hybrid_query", "confidence": 0.9, "agent": "both", "reasoning": "", "entities": {}, "requires_decomposition": true, "requires_agents": true}"#,
        ),
        ("# Planning Task", plan_json),
    ]);
    let stack = build_stack(provider);

    // No document context is supplied, so step1 must fail.
    let response = stack
        .orchestrator
        .query("ws-1", "finish the doc then summarize it", None, None)
        .await
        .expect("orchestrator query");

    assert!(!response.answer.is_empty());
    let error = response.metadata.error.expect("error recorded");
    assert!(error.contains("step1"), "error should mention step1: {error}");

    assert_eq!(response.metadata.step_results.len(), 2);
    let step2 = &response.metadata.step_results[1];
    assert_eq!(step2.step_id, "step2");
    assert!(!step2.success);
    assert!(
        step2
            .error
            .as_deref()
            .is_some_and(|e| e.contains("step1")),
        "step2 must be failed by its dependency"
    );
    assert_eq!(step2.execution_time_ms, 0, "step2 must not have executed");
}

// ---------------------------------------------------------------------------
// S7: HITL timeout with default option
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s7_timeout_approves_default_option() {
    let provider = ScriptedProvider::new(vec![]);
    let stack = build_stack(provider);

    let request = ConfirmationRequest::new(
        "ws-1",
        "u1",
        "TaskAgent",
        "Confirm".to_string(),
        "desc".to_string(),
        serde_json::json!({}),
        vec![steward_rs::hitl::ActionOption {
            id: "cancel".to_string(),
            label: "Cancel".to_string(),
            description: "Do nothing".to_string(),
            action_type: steward_rs::hitl::ActionType::TaskDelete,
            severity: Severity::Low,
            parameters: serde_json::json!({}),
            reversible: true,
            estimated_impact: None,
        }],
        Some("cancel".to_string()),
        0, // expires immediately
    );
    stack.storage.create(&request).expect("create request");

    let response = stack
        .hitl
        .wait_for_response(&request.request_id)
        .await
        .expect("wait");
    assert_eq!(response.status, ConfirmationStatus::Approved);
    assert_eq!(response.selected_option_id.as_deref(), Some("cancel"));
}

// ---------------------------------------------------------------------------
// Further end-to-end coverage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn small_talk_short_circuits_without_agents() {
    let provider = ScriptedProvider::new(vec![(
        "# Intent Detection Task",
        r#"{"type": "unknown", "confidence": 0.4, "agent": "both", "reasoning": "greeting", "entities": {}, "requires_decomposition": false, "requires_agents": false}"#,
    )]);
    let stack = build_stack(provider);

    let response = stack
        .orchestrator
        .query("ws-1", "hello", None, None)
        .await
        .expect("query");
    assert!(response.answer.starts_with("Hello!"));
    assert!(response.metadata.step_results.is_empty());

    // Same canned output on repeat.
    let again = stack
        .orchestrator
        .query("ws-1", "hello", None, None)
        .await
        .expect("query");
    assert_eq!(response.answer, again.answer);
}

#[tokio::test]
async fn single_step_task_query_passes_answer_through() {
    let provider = ScriptedProvider::new(vec![
        ("# Intent Detection Task", TASK_INTENT),
        (
            "# Task Question",
            "```sql\nSELECT t.title, t.status FROM tasks t WHERE t.workspace_id = :workspace_id\n```",
        ),
        (
            "# Question",
            "## Findings\nThree tasks in flight.\n\n## Risks\nNone.\n\n## Recommendations\nKeep going.",
        ),
    ]);
    let stack = build_stack(provider);
    seed_tasks(&stack.storage, "ws-1", 3, false);

    let response = stack
        .orchestrator
        .query("ws-1", "what is the team working on?", None, None)
        .await
        .expect("query");

    assert!(response.answer.contains("## Findings"));
    assert_eq!(response.metadata.successful_steps, 1);
    assert!(response.metadata.error.is_none());
}

#[tokio::test]
async fn task_agent_reports_no_results() {
    let provider = ScriptedProvider::new(vec![(
        "# Task Question",
        "```sql\nSELECT t.title FROM tasks t WHERE t.workspace_id = :workspace_id AND t.status = 'blocked'\n```",
    )]);
    let stack = build_stack(provider);

    let analysis = stack
        .task
        .query("ws-1", "which tasks are blocked?")
        .await
        .expect("task query");
    assert!(analysis.sql_success);
    assert_eq!(analysis.row_count, 0);
    assert!(analysis.answer.contains("No Results Found"));
}

#[tokio::test]
async fn task_agent_rejects_generated_mutation() {
    let provider = ScriptedProvider::new(vec![(
        "# Task Question",
        "```sql\nDELETE FROM tasks WHERE workspace_id = :workspace_id\n```",
    )]);
    let stack = build_stack(provider);

    let analysis = stack
        .task
        .query("ws-1", "remove everything")
        .await
        .expect("task query");
    assert!(!analysis.sql_success);
    assert!(analysis.answer.contains("Error"));
    assert!((analysis.confidence - 0.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn board_kanban_end_to_end() {
    let kanban = r#"{"title": "Sprint Board", "columns": [
        {"name": "In Progress", "status": "in_progress", "tasks": [{"title": "Task number 1", "priority": "medium", "assignee": "Ada"}]},
        {"name": "Done", "status": "done", "tasks": [{"title": "Task number 0", "priority": "high"}]}
    ]}"#;
    let provider = ScriptedProvider::new(vec![
        ("Produce a Kanban board", kanban),
        (
            "Summarize this visualization",
            "Two columns with one task each; the done column holds the high-priority item.",
        ),
    ]);
    let stack = build_stack(provider);
    seed_tasks(&stack.storage, "ws-1", 2, false);

    let output = stack
        .board
        .visualize("ws-1", "show the kanban board", None, BoardFilters::default())
        .await
        .expect("visualize");

    assert_eq!(output.chart_type, ChartType::Kanban);
    assert!(output.error.is_none());
    assert!(output.markdown_output.contains("# Sprint Board"));
    assert!(output.markdown_output.contains("🟠 Task number 0"));
    assert!(!output.summary.is_empty());
    // Property 7: valid kanban JSON with named columns.
    let columns = output.visualization["columns"]
        .as_array()
        .expect("columns array");
    assert!(!columns.is_empty());
    assert!(columns.iter().all(|c| c["name"].is_string()));
}

#[tokio::test]
async fn board_gantt_produces_mermaid() {
    let envelope = r#"{"chart_type": "gantt", "title": "Delivery", "mermaid_code": "gantt\n  title Delivery\n  section Tasks\n  Task number 0 :2026-08-01, 3d", "metadata": {}}"#;
    let provider = ScriptedProvider::new(vec![
        ("Produce the chart as JSON", envelope),
        ("Summarize this visualization", "A short delivery timeline."),
    ]);
    let stack = build_stack(provider);
    seed_tasks(&stack.storage, "ws-1", 2, true);

    let output = stack
        .board
        .visualize("ws-1", "gantt of the sprint", None, BoardFilters::default())
        .await
        .expect("visualize");

    assert_eq!(output.chart_type, ChartType::Gantt);
    assert!(output.markdown_output.contains("```mermaid"));
    // Property 7: non-empty mermaid source.
    assert!(
        !output.visualization["mermaid_code"]
            .as_str()
            .unwrap_or("")
            .is_empty()
    );
}

#[tokio::test]
async fn board_timeline_without_dates_uses_canned_message() {
    let provider = ScriptedProvider::new(vec![]);
    let stack = build_stack(provider);
    seed_tasks(&stack.storage, "ws-1", 2, false);

    let output = stack
        .board
        .visualize("ws-1", "timeline of the sprint", None, BoardFilters::default())
        .await
        .expect("visualize");
    assert!(
        output
            .error
            .as_deref()
            .is_some_and(|e| e.contains("No dates available for timeline"))
    );
}

#[tokio::test]
async fn document_memory_fallback_answers_from_context() {
    let long_answer = "Based on our earlier discussion, reciprocal rank fusion combines the \
                       vector and lexical rankings by summing reciprocal ranks, which we covered \
                       when you asked about hybrid retrieval quality.";
    let provider = ScriptedProvider::new(vec![(
        "no relevant documents were found",
        long_answer,
    )]);
    let stack = build_stack(provider);

    // Prior conversation provides context; the workspace has no chunks.
    let memory = MemoryStore::new(
        MemoryConfig::default(),
        Arc::clone(&stack.storage),
        Arc::clone(&stack.storage),
        None,
    );
    memory
        .record_qa_pair(
            "ws-1",
            "u1",
            "s1",
            "what is RRF?",
            "Reciprocal rank fusion sums 1/(k+rank).",
            Some("document"),
            Some(0.8),
        )
        .expect("record");

    let answer = stack
        .document
        .query("ws-1", "remind me how fusion worked", "u1", "s1")
        .await
        .expect("query");
    assert!(!answer.fallback_triggered);
    assert!((answer.confidence - 0.5).abs() < f64::EPSILON);
    assert!(answer.citations.is_empty());
}

#[tokio::test]
async fn hitl_double_submit_is_idempotent() {
    let provider = ScriptedProvider::new(vec![
        ("# Intent Detection Task", TASK_INTENT),
        (
            "# Task Question",
            "```sql\nSELECT id FROM tasks WHERE workspace_id = :workspace_id AND status = 'done'\n```",
        ),
    ]);
    let stack = build_stack(provider);

    let outcome = stack
        .hitl
        .query_with_hitl("Delete all completed tasks", "ws-1", "u1", None)
        .await
        .expect("hitl");
    let HitlOutcome::ConfirmationRequired(payload) = outcome else {
        unreachable!("expected confirmation")
    };

    let first = stack
        .hitl
        .submit_response(&payload.request_id, Some("archive_instead"), None, None)
        .expect("first submit");
    assert_eq!(first.status, ConfirmationStatus::Approved);

    // A second submission must return the first outcome unchanged.
    let second = stack
        .hitl
        .submit_response(&payload.request_id, Some("cancel"), None, None)
        .expect("second submit");
    assert_eq!(second.status, ConfirmationStatus::Approved);
    assert_eq!(second.selected_option_id.as_deref(), Some("archive_instead"));
}

#[tokio::test]
async fn hitl_executes_archive_alternative() {
    let provider = ScriptedProvider::new(vec![
        ("# Intent Detection Task", TASK_INTENT),
        (
            "# Task Question",
            "```sql\nSELECT id, title FROM tasks WHERE workspace_id = :workspace_id AND status = 'done'\n```",
        ),
        (
            "# Question",
            "## Findings\nTwo completed tasks would be archived.\n\n## Risks\nNone.\n\n## Recommendations\nArchive them.",
        ),
    ]);
    let stack = build_stack(provider);
    seed_tasks(&stack.storage, "ws-1", 6, false);

    let outcome = stack
        .hitl
        .query_with_hitl("Delete all completed tasks", "ws-1", "u1", None)
        .await
        .expect("hitl");
    let HitlOutcome::ConfirmationRequired(payload) = outcome else {
        unreachable!("expected confirmation")
    };

    let response = stack
        .hitl
        .submit_response(&payload.request_id, Some("archive_instead"), None, None)
        .expect("submit");
    let execution = stack
        .hitl
        .execute_confirmed_action(&payload.request_id, &response)
        .await
        .expect("execute");

    assert!(execution.success);
    assert!(execution.answer.contains("archived"));
    assert!(execution.rollback_available);
    assert!(execution.rollback_id.is_some());
}

#[tokio::test]
async fn hitl_disabled_bypasses_all_checks() {
    let provider = ScriptedProvider::new(vec![
        ("# Intent Detection Task", TASK_INTENT),
        (
            "# Task Question",
            "```sql\nSELECT id FROM tasks WHERE workspace_id = :workspace_id\n```",
        ),
    ]);
    let storage_stack = build_stack(provider);

    let hitl = HitlController::new(
        HitlConfig {
            enabled: false,
            ..HitlConfig::default()
        },
        Arc::clone(&storage_stack.orchestrator),
        Arc::clone(&storage_stack.task),
        Arc::clone(&storage_stack.board),
        Arc::clone(&storage_stack.storage),
    );

    let outcome = hitl
        .query_with_hitl("Delete every task", "ws-1", "u1", None)
        .await
        .expect("hitl");
    assert!(matches!(outcome, HitlOutcome::Answer(_)));
}

// ---------------------------------------------------------------------------
// Property-based invariants
// ---------------------------------------------------------------------------

mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use steward_rs::config::RerankWeights;
    use steward_rs::core::{Fact, KnowledgeType};
    use steward_rs::hitl::assess_sql;
    use steward_rs::orchestrator::smalltalk;
    use steward_rs::retrieval::{SearchHit, reciprocal_rank_fusion, rerank};
    use steward_rs::storage::FactRepo;

    fn seeded_search_storage() -> SqliteStorage {
        let storage = SqliteStorage::in_memory().expect("storage");
        storage.init().expect("init");
        let embedder = HashEmbedder::default();
        let texts = [
            "alpha beta gamma delta",
            "beta gamma epsilon",
            "gamma delta zeta eta",
            "completely different content here",
            "alpha epsilon zeta",
        ];
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                chunk_id: format!("c{i}"),
                document_id: "d".to_string(),
                workspace_id: "w".to_string(),
                chunk_index: i,
                text: (*text).to_string(),
                embedding: Some(embedder.embed(text).expect("embed")),
                metadata: serde_json::json!({}),
            })
            .collect();
        storage.insert_chunks(&chunks).expect("insert");
        storage
    }

    fn hit(id: String, hybrid: f64) -> SearchHit {
        SearchHit {
            chunk_id: id,
            text: "some text".to_string(),
            metadata: serde_json::json!({}),
            document_id: "d".to_string(),
            workspace_id: "w".to_string(),
            chunk_index: 0,
            score_vector: None,
            score_lexical: None,
            score_hybrid: Some(hybrid),
            score_rerank: None,
            rank: None,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        // Invariant 1: bounded result count, unique chunk IDs, correct
        // workspace.
        #[test]
        fn search_bounded_and_unique(
            query in "[a-z]{1,8}( [a-z]{1,8}){0,3}",
            top_k in 1usize..6,
        ) {
            let storage = seeded_search_storage();
            let retriever = HybridRetriever::new(
                RetrievalConfig::default(),
                Arc::new(HashEmbedder::default()),
            );
            let hits = retriever.search(&storage, &query, "w", top_k).expect("search");
            prop_assert!(hits.len() <= top_k);
            let ids: std::collections::HashSet<&str> =
                hits.iter().map(|h| h.chunk_id.as_str()).collect();
            prop_assert_eq!(ids.len(), hits.len());
            for hit in &hits {
                prop_assert_eq!(hit.workspace_id.as_str(), "w");
            }
        }

        // Invariant 2: rerank output is a subset with strictly
        // increasing ranks.
        #[test]
        fn rerank_subset_and_ranks(
            scores in proptest::collection::vec(0.0f64..1.0, 1..12),
            top_k in 1usize..8,
        ) {
            let hits: Vec<SearchHit> = scores
                .iter()
                .enumerate()
                .map(|(i, s)| hit(format!("c{i}"), *s))
                .collect();
            let input_ids: std::collections::HashSet<String> =
                hits.iter().map(|h| h.chunk_id.clone()).collect();
            let out = rerank("some text", hits, RerankWeights::default(), 500, top_k);
            prop_assert!(out.len() <= top_k);
            for h in &out {
                prop_assert!(input_ids.contains(&h.chunk_id));
            }
            let ranks: Vec<usize> = out.iter().filter_map(|h| h.rank).collect();
            let expected: Vec<usize> = (1..=out.len()).collect();
            prop_assert_eq!(ranks, expected);
        }

        // Invariant 3: RRF is symmetric under input-list reordering.
        #[test]
        fn rrf_symmetric(
            list1 in proptest::collection::vec("[a-f]", 0..6),
            list2 in proptest::collection::vec("[a-f]", 0..6),
        ) {
            let forward = reciprocal_rank_fusion(&[&list1, &list2], 60);
            let backward = reciprocal_rank_fusion(&[&list2, &list1], 60);
            prop_assert_eq!(forward.len(), backward.len());
            for (id, score) in &forward {
                let other = backward.get(id).copied().unwrap_or(f64::NAN);
                prop_assert!((score - other).abs() < 1e-12);
            }
        }

        // Invariant 4: fact upsert is idempotent.
        #[test]
        fn fact_upsert_idempotent(
            key in "[a-z]{1,12}",
            value in "[a-z ]{1,30}",
            confidence in 0.0f64..=1.0,
        ) {
            let storage = SqliteStorage::in_memory().expect("storage");
            storage.init().expect("init");
            let fact = Fact {
                fact_id: String::new(),
                workspace_id: "w".to_string(),
                knowledge_type: KnowledgeType::Concept,
                key: key.clone(),
                value: value.clone(),
                source: "conversation".to_string(),
                confidence,
                access_count: 0,
                last_accessed_at: None,
                metadata: serde_json::json!({}),
            };
            storage.upsert(&fact).expect("first upsert");
            let once = FactRepo::get(&storage, "w", KnowledgeType::Concept, &key)
                .expect("get")
                .expect("stored");
            storage.upsert(&fact).expect("second upsert");
            let twice = FactRepo::get(&storage, "w", KnowledgeType::Concept, &key)
                .expect("get")
                .expect("stored");
            prop_assert_eq!(&once.fact_id, &twice.fact_id);
            prop_assert_eq!(&once.value, &twice.value);
            prop_assert!((once.confidence - twice.confidence).abs() < f64::EPSILON);
        }

        // Invariant 8: the small-talk short-circuit is pure.
        #[test]
        fn smalltalk_pure(query in ".{0,40}") {
            prop_assert_eq!(smalltalk::respond(&query), smalltalk::respond(&query));
        }

        // Invariant 9: removing the delete dimension never raises
        // severity.
        #[test]
        fn risk_monotone_in_delete(
            rest in "[a-z ]{0,30}",
            sql_where in proptest::bool::ANY,
        ) {
            let sql = if sql_where {
                "UPDATE tasks SET status = 'done' WHERE id = 'x'"
            } else {
                "UPDATE tasks SET status = 'done'"
            };
            let with_delete = format!("delete {rest}");
            let sev_with = assess_sql(&with_delete, sql)
                .map_or(Severity::Low, |a| a.severity);
            let sev_without = assess_sql(&rest, sql)
                .map_or(Severity::Low, |a| a.severity);
            prop_assert!(sev_without <= sev_with);
        }
    }

    // Invariant 5: steps execute in dependency-respecting list order.
    #[tokio::test]
    async fn plan_steps_visit_in_order() {
        let plan_json = r#"{
            "steps": [
                {"step_id": "a", "type": "query_task", "agent": "task", "query": "count tasks", "dependencies": [], "reasoning": ""},
                {"step_id": "b", "type": "validate", "agent": "both", "query": "check", "dependencies": ["a"], "reasoning": ""},
                {"step_id": "c", "type": "synthesize", "agent": "both", "query": "combine", "dependencies": ["a", "b"], "reasoning": ""}
            ],
            "estimated_complexity": "medium",
            "requires_synthesis": true,
            "reasoning": ""
        }"#;
        let provider = ScriptedProvider::new(vec![
            (
                "# Intent Detection Task",
                r#"{"type": "task_query", "confidence": 0.9, "agent": "task", "reasoning": "", "entities": {}, "requires_decomposition": true, "requires_agents": true}"#,
            ),
            ("# Planning Task", plan_json),
            (
                "# Task Question",
                "```sql\nSELECT COUNT(*) AS n FROM tasks WHERE workspace_id = :workspace_id\n```",
            ),
            (
                "# Question",
                "## Findings\nCounted.\n\n## Risks\nNone.\n\n## Recommendations\nNone.",
            ),
            ("# Synthesis Task", "All three steps agree: the workspace is in good shape."),
        ]);
        let stack = build_stack(provider);
        seed_tasks(&stack.storage, "ws-1", 2, false);

        let response = stack
            .orchestrator
            .query("ws-1", "weekly check", None, None)
            .await
            .expect("query");

        let order: Vec<&str> = response
            .metadata
            .step_results
            .iter()
            .map(|r| r.step_id.as_str())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(response.metadata.failed_steps, 0);
        assert!(response.answer.contains("good shape"));
    }

    // Invariant 6: a request leaves pending exactly once.
    #[tokio::test]
    async fn confirmation_transitions_once() {
        let provider = ScriptedProvider::new(vec![]);
        let stack = build_stack(provider);
        let request = ConfirmationRequest::new(
            "ws-1",
            "u1",
            "TaskAgent",
            "t".to_string(),
            "d".to_string(),
            serde_json::json!({}),
            vec![steward_rs::hitl::ActionOption {
                id: "cancel".to_string(),
                label: "Cancel".to_string(),
                description: "Do nothing".to_string(),
                action_type: steward_rs::hitl::ActionType::TaskDelete,
                severity: Severity::Low,
                parameters: serde_json::json!({}),
                reversible: true,
                estimated_impact: None,
            }],
            None,
            300,
        );
        stack.storage.create(&request).expect("create");

        let first = stack
            .hitl
            .submit_response(&request.request_id, None, Some("changed my mind"), None)
            .expect("reject");
        assert_eq!(first.status, ConfirmationStatus::Rejected);

        let second = stack
            .hitl
            .submit_response(&request.request_id, Some("cancel"), None, None)
            .expect("second");
        assert_eq!(second.status, ConfirmationStatus::Rejected);
    }
}
