//! Orchestrator: intent → plan → execute → synthesize.
//!
//! Classifies the user's intent, builds an execution plan over the
//! specialized agents, runs the steps in dependency order, and
//! synthesizes a final answer. Every response is well-formed: failures
//! surface as canned answers with details under `metadata.error`.

pub mod intent;
pub mod plan;
pub mod smalltalk;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::agents::board::BoardFilters;
use crate::agents::prompts::{
    ORCHESTRATOR_SYSTEM_PROMPT, build_intent_prompt, build_planning_prompt, build_synthesis_prompt,
    error_messages,
};
use crate::agents::{BoardAgent, DocumentAgent, TaskAgent};
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeFuture, Target, hrtb_node};
use crate::llm::{LlmHandle, system_message, user_message};

pub use intent::{AgentTarget, Intent, IntentType, parse_intent};
pub use plan::{Complexity, ExecutionPlan, ExecutionStep, StepResult, StepType, parse_plan};

/// Minimum intent confidence to proceed past classification.
const MIN_INTENT_CONFIDENCE: f64 = 0.3;
/// User identity used when the caller supplies none.
const DEFAULT_USER: &str = "default-user";
/// Session identity used when the caller supplies none.
const DEFAULT_SESSION: &str = "default-session";

/// Context of the currently open document, for completion requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentContext {
    /// Document identifier.
    pub id: Option<String>,
    /// Document title.
    pub title: Option<String>,
    /// Full document content.
    pub content: String,
    /// Byte offset of the cursor, when known.
    pub cursor_position: Option<usize>,
}

/// Response metadata: what ran and how it went.
#[derive(Debug, Clone, Serialize)]
pub struct QueryMetadata {
    /// Workspace the query ran against.
    pub workspace_id: String,
    /// The original query.
    pub query: String,
    /// Detected intent.
    pub intent: Option<Intent>,
    /// Executed plan.
    pub execution_plan: Option<ExecutionPlan>,
    /// Per-step results.
    pub step_results: Vec<StepResult>,
    /// Error details, when any part failed.
    pub error: Option<String>,
    /// Steps that ran (or were marked failed).
    pub steps_executed: usize,
    /// Steps that succeeded.
    pub successful_steps: usize,
    /// Steps that failed.
    pub failed_steps: usize,
}

/// A complete orchestrator response.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    /// The final answer. Always present.
    pub answer: String,
    /// Execution metadata.
    pub metadata: QueryMetadata,
}

/// Workflow state for the orchestrator graph.
///
/// `step_results` is append-only: the execution loop extends it, never
/// replaces it.
#[derive(Debug, Default)]
pub struct OrchestratorState {
    /// Workspace scope.
    pub workspace_id: String,
    /// User query.
    pub query: String,
    /// Requesting user.
    pub user_id: String,
    /// Conversation session.
    pub session_id: String,
    /// Formatted recent conversation, when supplied.
    pub conversation_history: Option<String>,
    /// Active document context, when supplied.
    pub document_context: Option<DocumentContext>,
    /// Detected intent.
    pub intent: Option<Intent>,
    /// Confidence of the detected intent.
    pub intent_confidence: f64,
    /// Validated plan.
    pub execution_plan: Option<ExecutionPlan>,
    /// Results in step order (append-only).
    pub step_results: Vec<StepResult>,
    /// Index of the step currently executing.
    pub current_step_index: usize,
    /// Final answer, once produced.
    pub final_answer: Option<String>,
    /// Error captured along the way.
    pub error: Option<String>,
}

/// Coordinates the document, task, and board agents.
pub struct Orchestrator {
    llm: LlmHandle,
    document: Arc<DocumentAgent>,
    task: Arc<TaskAgent>,
    board: Arc<BoardAgent>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").field("llm", &self.llm).finish()
    }
}

impl Orchestrator {
    /// Creates an orchestrator over the three agents.
    #[must_use]
    pub fn new(
        llm: LlmHandle,
        document: Arc<DocumentAgent>,
        task: Arc<TaskAgent>,
        board: Arc<BoardAgent>,
    ) -> Self {
        Self {
            llm,
            document,
            task,
            board,
        }
    }

    /// Processes a query through the full workflow with default user
    /// and session identities.
    pub async fn query(
        &self,
        workspace_id: &str,
        query: &str,
        conversation_history: Option<&str>,
        document_context: Option<DocumentContext>,
    ) -> Result<QueryResponse> {
        self.query_as(
            workspace_id,
            query,
            DEFAULT_USER,
            DEFAULT_SESSION,
            conversation_history,
            document_context,
        )
        .await
    }

    /// Processes a query with explicit user and session identities.
    #[instrument(skip_all, fields(workspace = workspace_id))]
    pub async fn query_as(
        &self,
        workspace_id: &str,
        query: &str,
        user_id: &str,
        session_id: &str,
        conversation_history: Option<&str>,
        document_context: Option<DocumentContext>,
    ) -> Result<QueryResponse> {
        info!(query_len = query.len(), "processing query");
        let mut state = OrchestratorState {
            workspace_id: workspace_id.to_string(),
            query: query.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            conversation_history: conversation_history.map(str::to_string),
            document_context,
            ..OrchestratorState::default()
        };

        let graph = self.build_graph()?;
        graph.invoke(&mut state).await.map_err(Error::Agent)?;

        let successful = state.step_results.iter().filter(|r| r.success).count();
        let failed = state.step_results.len() - successful;
        Ok(QueryResponse {
            answer: state
                .final_answer
                .unwrap_or_else(|| error_messages::EXECUTION_FAILED.to_string()),
            metadata: QueryMetadata {
                workspace_id: state.workspace_id,
                query: state.query,
                intent: state.intent,
                execution_plan: state.execution_plan,
                steps_executed: state.step_results.len(),
                successful_steps: successful,
                failed_steps: failed,
                step_results: state.step_results,
                error: state.error,
            },
        })
    }

    /// Classifies the query and builds its plan without executing
    /// anything. Used by the HITL layer to assess risk first.
    ///
    /// Returns `None` for the plan when the query short-circuits to
    /// small talk.
    pub async fn plan_preview(
        &self,
        workspace_id: &str,
        query: &str,
        conversation_history: Option<&str>,
    ) -> Result<(Intent, Option<ExecutionPlan>)> {
        let intent = detect(&self.llm, query, workspace_id, conversation_history)
            .await
            .map_err(|e| Error::Agent(crate::error::AgentError::Orchestration { message: e }))?;
        if intent.is_small_talk() {
            return Ok((intent, None));
        }
        let plan = make_plan(&self.llm, query, &intent, workspace_id).await?;
        Ok((intent, Some(plan)))
    }

    fn build_graph(&self) -> Result<Graph<OrchestratorState>> {
        let detect_intent = {
            let llm = self.llm.clone();
            hrtb_node(move |state: &mut OrchestratorState| -> NodeFuture<'_> {
                let llm = llm.clone();
                Box::pin(async move {
                    match detect(
                        &llm,
                        &state.query,
                        &state.workspace_id,
                        state.conversation_history.as_deref(),
                    )
                    .await
                    {
                        Ok(intent) => {
                            state.intent_confidence = intent.confidence;
                            if intent.is_small_talk() {
                                state.final_answer = Some(smalltalk::respond(&state.query));
                            } else if intent.confidence < MIN_INTENT_CONFIDENCE {
                                state.error = Some(format!(
                                    "Intent confidence too low ({:.2})",
                                    intent.confidence
                                ));
                            }
                            debug!(intent = intent.intent_type.as_str(), "intent detected");
                            state.intent = Some(intent);
                        }
                        Err(e) => state.error = Some(format!("Intent detection failed: {e}")),
                    }
                    Ok(())
                })
            })
        };

        let create_plan = {
            let llm = self.llm.clone();
            hrtb_node(move |state: &mut OrchestratorState| -> NodeFuture<'_> {
                let llm = llm.clone();
                Box::pin(async move {
                    let Some(intent) = state.intent.clone() else {
                        state.error = Some("Planning failed: no intent".to_string());
                        return Ok(());
                    };
                    match make_plan(&llm, &state.query, &intent, &state.workspace_id).await {
                        Ok(plan) => {
                            debug!(steps = plan.steps.len(), "plan created");
                            state.execution_plan = Some(plan);
                            state.current_step_index = 0;
                        }
                        Err(e) => state.error = Some(format!("Planning failed: {e}")),
                    }
                    Ok(())
                })
            })
        };

        let execute_plan = {
            let document = Arc::clone(&self.document);
            let task = Arc::clone(&self.task);
            let board = Arc::clone(&self.board);
            hrtb_node(move |state: &mut OrchestratorState| -> NodeFuture<'_> {
                let document = Arc::clone(&document);
                let task = Arc::clone(&task);
                let board = Arc::clone(&board);
                Box::pin(async move {
                    let Some(plan) = state.execution_plan.clone() else {
                        state.error = Some("no execution plan".to_string());
                        return Ok(());
                    };

                    for (index, step) in plan.steps.iter().enumerate() {
                        state.current_step_index = index;

                        // Dependencies are checked before dispatch.
                        let unmet = step.dependencies.iter().find(|dep| {
                            !state
                                .step_results
                                .iter()
                                .any(|r| &r.step_id == *dep && r.success)
                        });
                        if let Some(dep) = unmet {
                            warn!(step = %step.step_id, dep = %dep, "dependency not satisfied");
                            state.step_results.push(StepResult {
                                step_id: step.step_id.clone(),
                                success: false,
                                result: serde_json::json!({}),
                                error: Some(format!(
                                    "Dependency {dep} not completed successfully"
                                )),
                                execution_time_ms: 0,
                            });
                            continue;
                        }

                        let start = Instant::now();
                        let outcome = dispatch_step(
                            step,
                            state.workspace_id.as_str(),
                            state.user_id.as_str(),
                            state.session_id.as_str(),
                            state.document_context.as_ref(),
                            &state.step_results,
                            &document,
                            &task,
                            &board,
                        )
                        .await;
                        let elapsed =
                            u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                        let result = match outcome {
                            Ok(value) => StepResult {
                                step_id: step.step_id.clone(),
                                success: true,
                                result: value,
                                error: None,
                                execution_time_ms: elapsed,
                            },
                            Err(message) => StepResult {
                                step_id: step.step_id.clone(),
                                success: false,
                                result: serde_json::json!({}),
                                error: Some(message),
                                execution_time_ms: elapsed,
                            },
                        };

                        // A failure is critical only when later steps
                        // depend on this one.
                        if !result.success && !plan.dependents_of(&step.step_id).is_empty() {
                            state.error =
                                Some(format!("Critical step {} failed", step.step_id));
                        }
                        state.step_results.push(result);
                    }
                    Ok(())
                })
            })
        };

        let synthesize = {
            let llm = self.llm.clone();
            hrtb_node(move |state: &mut OrchestratorState| -> NodeFuture<'_> {
                let llm = llm.clone();
                Box::pin(async move {
                    if state.final_answer.is_some() {
                        return Ok(());
                    }
                    let Some(plan) = &state.execution_plan else {
                        return Ok(());
                    };

                    // Single-step plans pass the agent answer through
                    // verbatim.
                    if !plan.requires_synthesis && state.step_results.len() == 1 {
                        let result = &state.step_results[0];
                        if result.success {
                            let answer = result
                                .result
                                .get("answer")
                                .and_then(serde_json::Value::as_str)
                                .map_or_else(|| result.result.to_string(), str::to_string);
                            state.final_answer = Some(answer);
                        } else {
                            state.error = result.error.clone();
                            state.final_answer =
                                Some(error_messages::EXECUTION_FAILED.to_string());
                        }
                        return Ok(());
                    }

                    let step_results_json = serde_json::to_string_pretty(&state.step_results)
                        .unwrap_or_else(|_| "[]".to_string());
                    let prompt = build_synthesis_prompt(&state.query, &step_results_json);
                    match llm
                        .generate(
                            vec![
                                system_message(ORCHESTRATOR_SYSTEM_PROMPT),
                                user_message(&prompt),
                            ],
                            false,
                        )
                        .await
                    {
                        Ok(response) => state.final_answer = Some(response.content),
                        Err(e) => {
                            state.error = Some(format!("Synthesis failed: {e}"));
                            state.final_answer = Some(format!(
                                "I encountered an error while synthesizing the answer: {e}"
                            ));
                        }
                    }
                    Ok(())
                })
            })
        };

        let handle_error = hrtb_node(move |state: &mut OrchestratorState| -> NodeFuture<'_> {
            Box::pin(async move {
                // Small talk routes here with its answer already set.
                if state.final_answer.is_some() {
                    return Ok(());
                }
                let error = state
                    .error
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string());
                warn!(error = %error, "query failed");
                let lower = error.to_lowercase();
                let answer = if lower.contains("intent") {
                    error_messages::INTENT_UNCLEAR
                } else if lower.contains("planning") {
                    error_messages::PLANNING_FAILED
                } else {
                    error_messages::EXECUTION_FAILED
                };
                state.final_answer = Some(answer.to_string());
                Ok(())
            })
        });

        Graph::builder("detect_intent")
            .node("detect_intent", detect_intent)
            .node("create_plan", create_plan)
            .node("execute_plan", execute_plan)
            .node("synthesize", synthesize)
            .node("handle_error", handle_error)
            .branch(
                "detect_intent",
                |state: &OrchestratorState| {
                    if state.error.is_some()
                        || state.intent.is_none()
                        || state.final_answer.is_some()
                    {
                        "error"
                    } else {
                        "plan"
                    }
                },
                &[
                    ("error", Target::Node("handle_error")),
                    ("plan", Target::Node("create_plan")),
                ],
            )
            .branch(
                "create_plan",
                |state: &OrchestratorState| {
                    if state.error.is_some() || state.execution_plan.is_none() {
                        "error"
                    } else {
                        "execute"
                    }
                },
                &[
                    ("error", Target::Node("handle_error")),
                    ("execute", Target::Node("execute_plan")),
                ],
            )
            .branch(
                "execute_plan",
                |state: &OrchestratorState| {
                    if state.error.is_some() {
                        "error"
                    } else {
                        "synthesize"
                    }
                },
                &[
                    ("error", Target::Node("handle_error")),
                    ("synthesize", Target::Node("synthesize")),
                ],
            )
            .terminal("synthesize")
            .terminal("handle_error")
            .build()
            .map_err(Error::Agent)
    }
}

/// Classifies a query, returning the normalized intent.
async fn detect(
    llm: &LlmHandle,
    query: &str,
    workspace_id: &str,
    conversation_history: Option<&str>,
) -> std::result::Result<Intent, String> {
    let prompt = build_intent_prompt(query, workspace_id, conversation_history);
    let response = llm
        .generate(
            vec![
                system_message(ORCHESTRATOR_SYSTEM_PROMPT),
                user_message(&prompt),
            ],
            true,
        )
        .await
        .map_err(|e| e.to_string())?;
    let intent = parse_intent(&response.content).map_err(|e| e.to_string())?;
    Ok(intent.normalize())
}

/// Builds a validated plan for an intent, skipping the model for
/// simple single-agent queries.
async fn make_plan(
    llm: &LlmHandle,
    query: &str,
    intent: &Intent,
    workspace_id: &str,
) -> Result<ExecutionPlan> {
    if !intent.requires_decomposition && intent.agent != AgentTarget::Both {
        return Ok(ExecutionPlan::single_step(query, intent));
    }
    let prompt = build_planning_prompt(
        query,
        intent.intent_type.as_str(),
        intent.agent.as_str(),
        workspace_id,
    );
    let response = llm
        .generate(
            vec![
                system_message(ORCHESTRATOR_SYSTEM_PROMPT),
                user_message(&prompt),
            ],
            true,
        )
        .await
        .map_err(Error::Llm)?;
    parse_plan(&response.content, query)
}

/// Dispatches one step to its agent, returning the result payload.
#[allow(clippy::too_many_arguments)]
async fn dispatch_step(
    step: &ExecutionStep,
    workspace_id: &str,
    user_id: &str,
    session_id: &str,
    document_context: Option<&DocumentContext>,
    prior_results: &[StepResult],
    document: &DocumentAgent,
    task: &TaskAgent,
    board: &BoardAgent,
) -> std::result::Result<serde_json::Value, String> {
    match step.step_type {
        StepType::QueryDocument => {
            let answer = document
                .query(workspace_id, &step.query, user_id, session_id)
                .await
                .map_err(|e| e.to_string())?;
            serde_json::to_value(answer).map_err(|e| e.to_string())
        }
        StepType::DocumentCompletion => {
            let context = document_context.ok_or("No document context available for completion")?;
            let completion = document
                .complete_text(&step.query, &context.content, context.cursor_position)
                .await
                .map_err(|e| e.to_string())?;
            Ok(serde_json::json!({ "answer": completion, "completion": true }))
        }
        StepType::QueryTask => {
            let analysis = task
                .query(workspace_id, &step.query)
                .await
                .map_err(|e| e.to_string())?;
            serde_json::to_value(analysis).map_err(|e| e.to_string())
        }
        StepType::QueryBoard => {
            let output = board
                .visualize(workspace_id, &step.query, None, BoardFilters::default())
                .await
                .map_err(|e| e.to_string())?;
            if let Some(error) = &output.error {
                return Err(error.clone());
            }
            let answer = format!("{}\n\n{}", output.markdown_output, output.summary);
            let mut value = serde_json::to_value(&output).map_err(|e| e.to_string())?;
            if let Some(object) = value.as_object_mut() {
                object.insert("answer".to_string(), serde_json::Value::String(answer));
            }
            Ok(value)
        }
        StepType::Synthesize => {
            let results: Vec<&serde_json::Value> = prior_results
                .iter()
                .filter(|r| r.success)
                .map(|r| &r.result)
                .collect();
            Ok(serde_json::json!({ "synthesized": true, "results": results }))
        }
        StepType::Validate => {
            let all_success = prior_results.iter().all(|r| r.success);
            Ok(serde_json::json!({
                "validated": all_success,
                "steps_checked": prior_results.len(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_context_round_trip() {
        let context = DocumentContext {
            id: Some("doc-1".to_string()),
            title: Some("Notes".to_string()),
            content: "Once upon a time".to_string(),
            cursor_position: Some(4),
        };
        let json = serde_json::to_string(&context).unwrap_or_default();
        let back: DocumentContext =
            serde_json::from_str(&json).unwrap_or_else(|_| unreachable!());
        assert_eq!(back.content, "Once upon a time");
        assert_eq!(back.cursor_position, Some(4));
    }

    #[tokio::test]
    async fn test_dispatch_synthesize_collects_successes() {
        let prior = vec![
            StepResult {
                step_id: "a".to_string(),
                success: true,
                result: serde_json::json!({"answer": "one"}),
                error: None,
                execution_time_ms: 1,
            },
            StepResult {
                step_id: "b".to_string(),
                success: false,
                result: serde_json::json!({}),
                error: Some("boom".to_string()),
                execution_time_ms: 1,
            },
        ];
        let all_success = prior.iter().all(|r| r.success);
        assert!(!all_success);
        let results: Vec<&serde_json::Value> = prior
            .iter()
            .filter(|r| r.success)
            .map(|r| &r.result)
            .collect();
        assert_eq!(results.len(), 1);
    }
}
