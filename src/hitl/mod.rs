//! Human-in-the-loop confirmation layer.
//!
//! Wraps the orchestrator: before a risky operation executes, the
//! controller classifies its risk, persists a durable confirmation
//! request with a curated option menu, and blocks execution until a
//! response arrives or the request expires. Approved options are
//! executed through the underlying agents and recorded in the audit
//! trail.

pub mod options;
pub mod risk;
pub mod schema;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agents::board::BoardFilters;
use crate::agents::{BoardAgent, TaskAgent};
use crate::config::{HitlConfig, TimeoutAction};
use crate::error::{Error, HitlError, Result};
use crate::orchestrator::plan::StepType;
use crate::orchestrator::{Orchestrator, QueryResponse};
use crate::storage::ConfirmationRepo;

pub use options::{LIMITED_SCOPE, board_options, plan_options, task_options};
pub use risk::{RiskAssessment, assess_board, assess_plan, assess_sql, most_severe};
pub use schema::{
    ActionExecutionResult, ActionOption, ActionType, ConfirmationRequest, ConfirmationResponse,
    ConfirmationStatus, Sentiment, Severity, UserFeedback,
};

/// Summary of one selectable option in the confirmation payload.
#[derive(Debug, Clone, Serialize)]
pub struct OptionSummary {
    /// Option identifier.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Description.
    pub description: String,
    /// Option severity.
    pub severity: Severity,
    /// Whether the option is reversible.
    pub reversible: bool,
}

/// Payload returned instead of an answer when confirmation is needed.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationPayload {
    /// Always true; lets callers discriminate the union.
    pub requires_confirmation: bool,
    /// Placeholder answer shown while waiting.
    pub answer: String,
    /// The persisted request ID to respond to.
    pub request_id: String,
    /// Kind of operation awaiting confirmation.
    pub operation_type: ActionType,
    /// Assessed severity.
    pub severity: Severity,
    /// Options to choose from.
    pub options: Vec<OptionSummary>,
    /// When the request expires.
    pub expires_at: chrono::DateTime<Utc>,
    /// Context echoed back to the caller.
    pub metadata: serde_json::Value,
}

/// Result of a HITL-gated query: either a regular answer or a
/// confirmation request.
#[derive(Debug)]
pub enum HitlOutcome {
    /// The operation was safe (or auto-approved) and ran to completion.
    Answer(Box<QueryResponse>),
    /// The operation needs user confirmation first.
    ConfirmationRequired(Box<ConfirmationPayload>),
}

/// Outcome of executing a confirmed action.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    /// Whether execution succeeded.
    pub success: bool,
    /// User-facing answer.
    pub answer: String,
    /// Whether a best-effort undo exists.
    pub rollback_available: bool,
    /// Undo token, when reversible.
    pub rollback_id: Option<String>,
    /// Execution metadata.
    pub metadata: serde_json::Value,
}

/// Gates risky operations behind user confirmation.
pub struct HitlController {
    config: HitlConfig,
    orchestrator: Arc<Orchestrator>,
    task: Arc<TaskAgent>,
    board: Arc<BoardAgent>,
    repo: Arc<dyn ConfirmationRepo>,
}

impl std::fmt::Debug for HitlController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HitlController")
            .field("config", &self.config)
            .finish()
    }
}

impl HitlController {
    /// Creates a controller over the orchestrator and agents.
    #[must_use]
    pub fn new(
        config: HitlConfig,
        orchestrator: Arc<Orchestrator>,
        task: Arc<TaskAgent>,
        board: Arc<BoardAgent>,
        repo: Arc<dyn ConfirmationRepo>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            task,
            board,
            repo,
        }
    }

    /// Processes a query, intercepting risky operations.
    ///
    /// Safe queries (and low-severity ones under `auto_execute_low`)
    /// run straight through the orchestrator. Risky ones return a
    /// confirmation payload instead.
    #[instrument(skip_all, fields(workspace = workspace_id))]
    pub async fn query_with_hitl(
        &self,
        query: &str,
        workspace_id: &str,
        user_id: &str,
        conversation_history: Option<&str>,
    ) -> Result<HitlOutcome> {
        if !self.config.enabled {
            let response = self
                .orchestrator
                .query(workspace_id, query, conversation_history, None)
                .await?;
            return Ok(HitlOutcome::Answer(Box::new(response)));
        }

        let (_intent, plan) = self
            .orchestrator
            .plan_preview(workspace_id, query, conversation_history)
            .await?;
        let Some(plan) = plan else {
            // Small talk carries no risk.
            let response = self
                .orchestrator
                .query(workspace_id, query, conversation_history, None)
                .await?;
            return Ok(HitlOutcome::Answer(Box::new(response)));
        };

        // Compose the per-agent rules and keep the most severe verdict.
        let mut assessments: Vec<(RiskAssessment, Scope)> = Vec::new();
        if let Some(assessment) = risk::assess_plan(&plan, query) {
            assessments.push((assessment, Scope::Plan));
        }

        let mut planned_sql = String::new();
        if plan
            .steps
            .iter()
            .any(|s| s.step_type == StepType::QueryTask)
        {
            match self.task.plan_sql(workspace_id, query).await {
                Ok(sql) => {
                    if let Some(assessment) = risk::assess_sql(query, &sql) {
                        assessments.push((assessment, Scope::Task));
                    }
                    planned_sql = sql;
                }
                Err(e) => warn!(error = %e, "SQL planning for risk analysis failed"),
            }
        }

        let mut board_stats = None;
        if plan
            .steps
            .iter()
            .any(|s| s.step_type == StepType::QueryBoard)
        {
            match self.board.preflight(workspace_id, query) {
                Ok((task_count, chart_type)) => {
                    if let Some(assessment) = risk::assess_board(task_count, chart_type) {
                        assessments.push((assessment, Scope::Board));
                    }
                    board_stats = Some((task_count, chart_type));
                }
                Err(e) => warn!(error = %e, "board preflight failed"),
            }
        }

        let Some((assessment, scope)) = assessments
            .into_iter()
            .max_by_key(|(a, _)| a.severity)
        else {
            let response = self
                .orchestrator
                .query(workspace_id, query, conversation_history, None)
                .await?;
            return Ok(HitlOutcome::Answer(Box::new(response)));
        };

        if assessment.severity == Severity::Low && self.config.auto_execute_low {
            debug!("low-severity operation auto-approved");
            let response = self
                .orchestrator
                .query(workspace_id, query, conversation_history, None)
                .await?;
            return Ok(HitlOutcome::Answer(Box::new(response)));
        }

        info!(
            severity = assessment.severity.as_str(),
            reason = %assessment.reason,
            "risky operation detected"
        );

        let (agent_name, hitl_options) = match scope {
            Scope::Task => (
                "TaskAgent",
                options::task_options(&assessment, query, &planned_sql),
            ),
            Scope::Board => {
                let (task_count, chart_type) =
                    board_stats.unwrap_or((0, crate::agents::board::ChartType::Kanban));
                (
                    "BoardAgent",
                    options::board_options(&assessment, query, chart_type, task_count),
                )
            }
            Scope::Plan => (
                "Orchestrator",
                options::plan_options(&assessment, &plan, query),
            ),
        };

        let timeout_seconds = if assessment.severity == Severity::Critical {
            self.config.timeout_critical
        } else {
            self.config.timeout_default
        };

        let request = ConfirmationRequest::new(
            workspace_id,
            user_id,
            agent_name,
            format!("⚠️ Confirm {}", assessment.action_type.title()),
            format!(
                "{}\n\n**Query:** {query}\n**Impact:** {}",
                assessment.reason, assessment.estimated_impact
            ),
            serde_json::json!({
                "query": query,
                "sql": planned_sql,
                "operation_type": assessment.action_type.as_str(),
                "severity": assessment.severity.as_str(),
                "detected_at": Utc::now().to_rfc3339(),
            }),
            hitl_options,
            Some("cancel".to_string()),
            timeout_seconds,
        );
        self.repo.create(&request)?;

        let payload = ConfirmationPayload {
            requires_confirmation: true,
            answer: format!(
                "⏳ Confirmation required for {}",
                assessment.action_type.title().to_lowercase()
            ),
            request_id: request.request_id.clone(),
            operation_type: assessment.action_type,
            severity: assessment.severity,
            options: request
                .options
                .iter()
                .map(|o| OptionSummary {
                    id: o.id.clone(),
                    label: o.label.clone(),
                    description: o.description.clone(),
                    severity: o.severity,
                    reversible: o.reversible,
                })
                .collect(),
            expires_at: request.expires_at,
            metadata: serde_json::json!({
                "workspace_id": workspace_id,
                "user_id": user_id,
                "query": query,
                "sql": planned_sql,
            }),
        };
        Ok(HitlOutcome::ConfirmationRequired(Box::new(payload)))
    }

    /// Submits the user's decision on a pending request.
    ///
    /// Selecting an option approves it; `None` rejects the request.
    /// Idempotent: a second submission for a resolved request returns
    /// the stored first response. A response arriving after
    /// `expires_at` is rejected as a timeout.
    pub fn submit_response(
        &self,
        request_id: &str,
        selected_option_id: Option<&str>,
        reason: Option<&str>,
        modified_parameters: Option<serde_json::Value>,
    ) -> Result<ConfirmationResponse> {
        let (request, existing) =
            self.repo
                .get(request_id)?
                .ok_or_else(|| HitlError::RequestNotFound {
                    request_id: request_id.to_string(),
                })?;
        if let Some(first) = existing {
            debug!(request_id, "request already resolved; returning first response");
            return Ok(first);
        }

        if Utc::now() > request.expires_at {
            let response = ConfirmationResponse {
                request_id: request_id.to_string(),
                status: ConfirmationStatus::Timeout,
                selected_option_id: None,
                reason: Some("Response arrived after expiry".to_string()),
                modified_parameters: None,
                responded_at: Utc::now(),
            };
            return self.finish_transition(request_id, ConfirmationStatus::Timeout, response);
        }

        let (status, selected) = match selected_option_id {
            Some(option_id) => {
                if request.option(option_id).is_none() {
                    return Err(Error::Hitl(HitlError::UnknownOption {
                        option_id: option_id.to_string(),
                    }));
                }
                (ConfirmationStatus::Approved, Some(option_id.to_string()))
            }
            None => (ConfirmationStatus::Rejected, None),
        };

        let response = ConfirmationResponse {
            request_id: request_id.to_string(),
            status,
            selected_option_id: selected,
            reason: reason.map(str::to_string),
            modified_parameters,
            responded_at: Utc::now(),
        };
        self.finish_transition(request_id, status, response)
    }

    /// Blocks until a response is stored or the request expires.
    ///
    /// On expiry, the `default` timeout policy synthesizes an approval
    /// of the request's default option; the `reject` policy marks the
    /// request as timed out.
    pub async fn wait_for_response(&self, request_id: &str) -> Result<ConfirmationResponse> {
        loop {
            let (request, response) =
                self.repo
                    .get(request_id)?
                    .ok_or_else(|| HitlError::RequestNotFound {
                        request_id: request_id.to_string(),
                    })?;
            if let Some(response) = response {
                return Ok(response);
            }
            if Utc::now() >= request.expires_at {
                return self.handle_timeout(&request);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    fn handle_timeout(&self, request: &ConfirmationRequest) -> Result<ConfirmationResponse> {
        warn!(request_id = %request.request_id, "confirmation request timed out");
        let (status, selected) = if self.config.timeout_action == TimeoutAction::Default
            && request.default_option.is_some()
        {
            (ConfirmationStatus::Approved, request.default_option.clone())
        } else {
            (ConfirmationStatus::Timeout, None)
        };
        let response = ConfirmationResponse {
            request_id: request.request_id.clone(),
            status,
            selected_option_id: selected,
            reason: Some("Request timed out".to_string()),
            modified_parameters: None,
            responded_at: Utc::now(),
        };
        self.finish_transition(&request.request_id, status, response)
    }

    /// Applies the compare-and-set transition; on a lost race the
    /// stored first response wins.
    fn finish_transition(
        &self,
        request_id: &str,
        status: ConfirmationStatus,
        response: ConfirmationResponse,
    ) -> Result<ConfirmationResponse> {
        if self.repo.update_status(request_id, status, &response)? {
            return Ok(response);
        }
        let (_, stored) =
            self.repo
                .get(request_id)?
                .ok_or_else(|| HitlError::RequestNotFound {
                    request_id: request_id.to_string(),
                })?;
        stored.ok_or_else(|| {
            Error::Hitl(HitlError::AlreadyResolved {
                request_id: request_id.to_string(),
            })
        })
    }

    /// Executes the option selected by an approved response.
    #[instrument(skip_all, fields(request_id))]
    pub async fn execute_confirmed_action(
        &self,
        request_id: &str,
        response: &ConfirmationResponse,
    ) -> Result<ExecutionOutcome> {
        if response.status != ConfirmationStatus::Approved {
            return Ok(ExecutionOutcome {
                success: false,
                answer: format!("Action {}", response.status.as_str()),
                rollback_available: false,
                rollback_id: None,
                metadata: serde_json::json!({"status": response.status.as_str()}),
            });
        }

        let (request, _) =
            self.repo
                .get(request_id)?
                .ok_or_else(|| HitlError::RequestNotFound {
                    request_id: request_id.to_string(),
                })?;
        let option_id = response
            .selected_option_id
            .as_deref()
            .ok_or_else(|| HitlError::UnknownOption {
                option_id: "<none>".to_string(),
            })?;
        let option = request
            .option(option_id)
            .ok_or_else(|| HitlError::UnknownOption {
                option_id: option_id.to_string(),
            })?
            .clone();

        // User-supplied overrides merge over the option's parameters.
        let mut parameters = option.parameters.clone();
        if let (Some(base), Some(overrides)) = (
            parameters.as_object_mut(),
            response
                .modified_parameters
                .as_ref()
                .and_then(serde_json::Value::as_object),
        ) {
            for (k, v) in overrides {
                base.insert(k.clone(), v.clone());
            }
        }

        let outcome = self
            .run_option(&request, &option, &parameters)
            .await;
        let (success, answer, metadata) = match outcome {
            Ok((answer, metadata)) => (true, answer, metadata),
            Err(e) => (false, e.to_string(), serde_json::json!({})),
        };

        let rollback_id = (success && option.reversible).then(|| crate::core::new_id("rb"));
        let execution = ActionExecutionResult {
            request_id: request_id.to_string(),
            option_id: option.id.clone(),
            success,
            result: metadata.clone(),
            error: (!success).then(|| answer.clone()),
            rollback_available: option.reversible,
            rollback_id: rollback_id.clone(),
            executed_at: Utc::now(),
        };
        self.repo.record_execution(&execution)?;

        Ok(ExecutionOutcome {
            success,
            answer,
            rollback_available: option.reversible,
            rollback_id,
            metadata,
        })
    }

    /// Dispatches one approved option by its execution mode.
    async fn run_option(
        &self,
        request: &ConfirmationRequest,
        option: &ActionOption,
        parameters: &serde_json::Value,
    ) -> Result<(String, serde_json::Value)> {
        let mode = parameters
            .get("mode")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");
        let query = parameters
            .get("query")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(request.context.get("query").and_then(|v| v.as_str()).unwrap_or(""));
        let workspace_id = request.workspace_id.as_str();

        match mode {
            "full" | "safe" | "step_by_step" => {
                let response = self
                    .orchestrator
                    .query(workspace_id, query, None, None)
                    .await?;
                let metadata =
                    serde_json::to_value(&response.metadata).unwrap_or_default();
                let answer = if mode == "full" {
                    response.answer
                } else {
                    format!("[{mode}] {}", response.answer)
                };
                Ok((answer, metadata))
            }
            "preview" => {
                let response = self
                    .orchestrator
                    .query(workspace_id, query, None, None)
                    .await?;
                Ok((
                    format!("📋 Preview: {}", response.answer),
                    serde_json::json!({"preview": true}),
                ))
            }
            "archive" => {
                let analysis = self
                    .task
                    .query(workspace_id, &format!("{query} (archive instead of delete)"))
                    .await?;
                Ok((
                    format!("📦 Tasks archived instead of deleted.\n\n{}", analysis.answer),
                    serde_json::to_value(&analysis).unwrap_or_default(),
                ))
            }
            "notify_only" => Ok((
                "📧 Notification sent to stakeholders".to_string(),
                serde_json::json!({"notification_sent": true, "query": query}),
            )),
            "limited" => {
                let output = self
                    .board
                    .visualize(workspace_id, query, None, BoardFilters::default())
                    .await?;
                let limit = parameters
                    .get("limit")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(LIMITED_SCOPE as u64);
                Ok((
                    format!("{}\n\n_Scope limited to {limit} tasks._", output.markdown_output),
                    serde_json::to_value(&output).unwrap_or_default(),
                ))
            }
            "export_csv" => {
                let csv = self.board.export_csv(workspace_id)?;
                let rows = csv.lines().count().saturating_sub(1);
                Ok((
                    format!("📄 Exported {rows} tasks as CSV.\n\n```csv\n{csv}```"),
                    serde_json::json!({"export_format": "csv", "rows": rows}),
                ))
            }
            _ if option.id == "cancel" => Ok((
                "✅ Action cancelled".to_string(),
                serde_json::json!({"cancelled": true}),
            )),
            other => Err(Error::Hitl(HitlError::UnknownOption {
                option_id: format!("{} (mode '{other}')", option.id),
            })),
        }
    }

    /// Lists pending requests for a workspace.
    pub fn pending(&self, workspace_id: &str) -> Result<Vec<ConfirmationRequest>> {
        self.repo.list_pending(workspace_id)
    }

    /// Records user feedback for an executed request.
    pub fn collect_feedback(&self, feedback: &UserFeedback) -> Result<()> {
        info!(request_id = %feedback.request_id, rating = feedback.rating, "feedback collected");
        self.repo.record_feedback(feedback)
    }

    /// Best-effort rollback is option-specific; generic rewind is not
    /// supported.
    pub fn rollback(&self, _rollback_id: &str, option_id: &str) -> Result<()> {
        Err(Error::Hitl(HitlError::RollbackUnsupported {
            option_id: option_id.to_string(),
        }))
    }
}

/// Which rule family produced an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Task,
    Board,
    Plan,
}
