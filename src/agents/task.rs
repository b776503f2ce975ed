//! Task analysis agent.
//!
//! Translates natural-language questions about tasks into a single
//! guarded SELECT, executes it under a row cap and wall-clock timeout,
//! and has the model interpret the rows. The execution policy is
//! strictly read-only; any generated mutation is rejected before it
//! reaches the database.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::agents::prompts::{
    TASK_AGENT_SYSTEM_PROMPT, TASK_SCHEMA_DOC, build_analysis_prompt, build_sql_generation_prompt,
    format_sql_error, no_results_answer,
};
use crate::config::SqlConfig;
use crate::error::{AgentError, Error, Result};
use crate::graph::{Graph, NodeFuture, Target, hrtb_node};
use crate::llm::{LlmHandle, system_message, user_message};
use crate::storage::SqlExecutor;

/// Statement keywords rejected by the read-only policy.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "replace", "attach",
    "pragma", "vacuum", "grant", "revoke",
];

fn sql_fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?is)```sql\s+(.*?)\s*```").unwrap_or_else(|_| unreachable!())
    })
}

fn bare_select_regex() -> &'static Regex {
    static SELECT: OnceLock<Regex> = OnceLock::new();
    SELECT.get_or_init(|| Regex::new(r"(?is)(SELECT\s+.*?)(?:;|$)").unwrap_or_else(|_| unreachable!()))
}

fn keyword_regex(keyword: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b{keyword}\b")).unwrap_or_else(|_| unreachable!())
}

/// Final output of a task analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAnalysis {
    /// Markdown answer.
    pub answer: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// The generated SQL (empty when generation failed).
    pub generated_sql: String,
    /// Rows returned by the query.
    pub row_count: usize,
    /// Wall-clock query time in milliseconds.
    pub query_time_ms: u64,
    /// Whether the SQL stage succeeded.
    pub sql_success: bool,
    /// Error captured along the way, when any.
    pub error: Option<String>,
}

/// Workflow state for the task analysis graph.
#[derive(Debug, Default)]
pub struct TaskState {
    /// User question.
    pub query: String,
    /// Workspace scope.
    pub workspace_id: String,
    /// Schema description handed to the model.
    pub schema_info: String,
    /// Generated SQL statement.
    pub generated_sql: String,
    /// Result rows as JSON objects.
    pub sql_results: Vec<serde_json::Value>,
    /// Whether execution succeeded.
    pub sql_success: bool,
    /// SQL-stage error.
    pub sql_error: Option<String>,
    /// Number of rows returned.
    pub row_count: usize,
    /// Wall-clock query time in milliseconds.
    pub query_time_ms: u64,
    /// Markdown answer.
    pub answer: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Unrecoverable error.
    pub error: Option<String>,
}

/// SQL-backed task analysis.
pub struct TaskAgent {
    llm: LlmHandle,
    executor: Arc<dyn SqlExecutor>,
    config: SqlConfig,
}

impl std::fmt::Debug for TaskAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskAgent")
            .field("config", &self.config)
            .finish()
    }
}

impl TaskAgent {
    /// Creates a task agent over the given executor.
    #[must_use]
    pub fn new(llm: LlmHandle, executor: Arc<dyn SqlExecutor>, config: SqlConfig) -> Self {
        Self {
            llm,
            executor,
            config,
        }
    }

    /// Answers a task question end to end.
    #[instrument(skip(self, query), fields(workspace = workspace_id))]
    pub async fn query(&self, workspace_id: &str, query: &str) -> Result<TaskAnalysis> {
        let mut state = TaskState {
            query: query.to_string(),
            workspace_id: workspace_id.to_string(),
            ..TaskState::default()
        };
        let graph = self.build_graph()?;
        graph.invoke(&mut state).await.map_err(Error::Agent)?;
        Ok(TaskAnalysis {
            answer: state.answer,
            confidence: state.confidence,
            generated_sql: state.generated_sql,
            row_count: state.row_count,
            query_time_ms: state.query_time_ms,
            sql_success: state.sql_success,
            error: state.error.or(state.sql_error),
        })
    }

    /// Runs only schema loading and SQL generation, returning the
    /// statement the model intends to run. Used by the HITL layer to
    /// classify risk before anything executes.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::SqlGeneration`] when no statement can be
    /// extracted from the model output.
    pub async fn plan_sql(&self, workspace_id: &str, query: &str) -> Result<String> {
        let prompt = build_sql_generation_prompt(query, TASK_SCHEMA_DOC, workspace_id);
        let response = self
            .llm
            .generate(
                vec![
                    system_message(TASK_AGENT_SYSTEM_PROMPT),
                    user_message(&prompt),
                ],
                false,
            )
            .await
            .map_err(Error::Llm)?;
        extract_sql(&response.content).ok_or_else(|| {
            Error::Agent(AgentError::SqlGeneration(
                "model output contained no SQL statement".to_string(),
            ))
        })
    }

    fn build_graph(&self) -> Result<Graph<TaskState>> {
        let load_schema = hrtb_node(|state: &mut TaskState| -> NodeFuture<'_> {
            Box::pin(async move {
                state.schema_info = TASK_SCHEMA_DOC.to_string();
                Ok(())
            })
        });

        let generate_sql = {
            let llm = self.llm.clone();
            hrtb_node(move |state: &mut TaskState| -> NodeFuture<'_> {
                let llm = llm.clone();
                Box::pin(async move {
                    let prompt = build_sql_generation_prompt(
                        &state.query,
                        &state.schema_info,
                        &state.workspace_id,
                    );
                    let response = llm
                        .generate(
                            vec![
                                system_message(TASK_AGENT_SYSTEM_PROMPT),
                                user_message(&prompt),
                            ],
                            false,
                        )
                        .await;
                    match response {
                        Ok(response) => match extract_sql(&response.content) {
                            Some(sql) => {
                                debug!(sql = %sql, "SQL generated");
                                state.generated_sql = sql;
                            }
                            None => {
                                state.sql_success = false;
                                state.error =
                                    Some("model did not generate a SQL query".to_string());
                            }
                        },
                        Err(e) => {
                            state.sql_success = false;
                            state.error = Some(format!("SQL generation failed: {e}"));
                        }
                    }
                    Ok(())
                })
            })
        };

        let execute_sql = {
            let executor = Arc::clone(&self.executor);
            let config = self.config;
            hrtb_node(move |state: &mut TaskState| -> NodeFuture<'_> {
                let executor = Arc::clone(&executor);
                Box::pin(async move {
                    if state.error.is_some() {
                        return Ok(());
                    }
                    if let Err(e) = validate_sql(&state.generated_sql) {
                        warn!(error = %e, "generated SQL rejected");
                        state.sql_success = false;
                        state.sql_error = Some(e.to_string());
                        return Ok(());
                    }

                    let start = Instant::now();
                    let result = executor.execute(
                        &state.generated_sql,
                        &[(":workspace_id", state.workspace_id.as_str())],
                        config.row_limit,
                        config.timeout,
                        true,
                    );
                    state.query_time_ms = u64::try_from(start.elapsed().as_millis())
                        .unwrap_or(u64::MAX);

                    match result {
                        Ok(output) => {
                            state.row_count = output.row_count;
                            state.sql_results = output.rows;
                            state.sql_success = true;
                        }
                        Err(e) => {
                            state.sql_success = false;
                            state.sql_error = Some(e.to_string());
                        }
                    }
                    Ok(())
                })
            })
        };

        let analyze_results = {
            let llm = self.llm.clone();
            hrtb_node(move |state: &mut TaskState| -> NodeFuture<'_> {
                let llm = llm.clone();
                Box::pin(async move {
                    let prompt =
                        build_analysis_prompt(&state.query, &state.sql_results, state.row_count);
                    match llm
                        .generate(
                            vec![
                                system_message(TASK_AGENT_SYSTEM_PROMPT),
                                user_message(&prompt),
                            ],
                            false,
                        )
                        .await
                    {
                        Ok(response) => {
                            state.answer = response.content;
                            state.confidence = 0.8;
                        }
                        Err(e) => {
                            state.answer =
                                "Sorry, I encountered an error analyzing the results.".to_string();
                            state.confidence = 0.0;
                            state.error = Some(format!("analysis failed: {e}"));
                        }
                    }
                    Ok(())
                })
            })
        };

        let no_results = hrtb_node(|state: &mut TaskState| -> NodeFuture<'_> {
            Box::pin(async move {
                state.answer = no_results_answer(&state.workspace_id);
                state.confidence = 1.0;
                Ok(())
            })
        });

        let error_node = hrtb_node(|state: &mut TaskState| -> NodeFuture<'_> {
            Box::pin(async move {
                let message = state
                    .sql_error
                    .clone()
                    .or_else(|| state.error.clone())
                    .unwrap_or_else(|| "Unknown error occurred".to_string());
                state.answer = format_sql_error(&message);
                state.confidence = 0.0;
                Ok(())
            })
        });

        Graph::builder("load_schema")
            .node("load_schema", load_schema)
            .node("generate_sql", generate_sql)
            .node("execute_sql", execute_sql)
            .node("analyze_results", analyze_results)
            .node("no_results", no_results)
            .node("error", error_node)
            .edge("load_schema", "generate_sql")
            .edge("generate_sql", "execute_sql")
            .branch(
                "execute_sql",
                |state: &TaskState| {
                    if !state.sql_success {
                        "error"
                    } else if state.row_count == 0 {
                        "empty"
                    } else {
                        "ok"
                    }
                },
                &[
                    ("error", Target::Node("error")),
                    ("empty", Target::Node("no_results")),
                    ("ok", Target::Node("analyze_results")),
                ],
            )
            .terminal("analyze_results")
            .terminal("no_results")
            .terminal("error")
            .build()
            .map_err(Error::Agent)
    }
}

/// Extracts a SQL statement from model output: a ```sql fenced block
/// first, then a bare `SELECT …`.
#[must_use]
pub fn extract_sql(response: &str) -> Option<String> {
    if let Some(captures) = sql_fence_regex().captures(response) {
        let sql = captures.get(1)?.as_str().trim();
        if !sql.is_empty() {
            return Some(sql.to_string());
        }
    }
    if let Some(captures) = bare_select_regex().captures(response) {
        let sql = captures.get(1)?.as_str().trim();
        if !sql.is_empty() {
            return Some(sql.to_string());
        }
    }
    None
}

/// Enforces the execution policy on a generated statement:
/// read-only SELECT, single statement, no DDL/DML keywords, and the
/// workspace parameter present.
pub fn validate_sql(sql: &str) -> std::result::Result<(), AgentError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(AgentError::SqlGeneration("empty SQL statement".to_string()));
    }
    if !trimmed.to_uppercase().starts_with("SELECT") {
        return Err(AgentError::SqlForbidden {
            reason: "only SELECT statements are allowed".to_string(),
        });
    }
    if trimmed.contains(';') {
        return Err(AgentError::SqlForbidden {
            reason: "multiple statements are not allowed".to_string(),
        });
    }
    for keyword in FORBIDDEN_KEYWORDS {
        if keyword_regex(keyword).is_match(trimmed) {
            return Err(AgentError::SqlForbidden {
                reason: format!("forbidden keyword: {keyword}"),
            });
        }
    }
    if !trimmed.contains(":workspace_id") {
        return Err(AgentError::SqlForbidden {
            reason: "statement must reference :workspace_id".to_string(),
        });
    }
    Ok(())
}
