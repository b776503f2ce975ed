//! Confirmation lifecycle data types.
//!
//! These are the durable, wire-shaped records of the HITL protocol:
//! requests, selectable options, responses, execution results, and
//! feedback. Requests survive process restarts; the responding user may
//! be a different process from the requester.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::new_id;

/// Risk level assigned to an action.
///
/// Variants are ordered so severities compare with `<`/`>`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine operation.
    #[default]
    Low,
    /// Noticeable impact, reversible.
    Medium,
    /// Significant or hard-to-reverse impact.
    High,
    /// Irreversible or workspace-wide impact.
    Critical,
}

impl Severity {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Kind of operation an option performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Deleting tasks.
    TaskDelete,
    /// Updating task fields.
    TaskUpdate,
    /// Changing a deadline.
    DeadlineChange,
    /// Changing a priority.
    PriorityChange,
    /// An operation touching many records at once.
    BulkOperation,
    /// Sending a notification instead of mutating data.
    NotificationSend,
    /// Executing a multi-step orchestration plan.
    PlanExecution,
    /// Generating a visualization.
    Visualization,
}

impl ActionType {
    /// Returns the snake_case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskDelete => "task_delete",
            Self::TaskUpdate => "task_update",
            Self::DeadlineChange => "deadline_change",
            Self::PriorityChange => "priority_change",
            Self::BulkOperation => "bulk_operation",
            Self::NotificationSend => "notification_send",
            Self::PlanExecution => "plan_execution",
            Self::Visualization => "visualization",
        }
    }

    /// Human-readable label ("task delete" → "Task Delete").
    #[must_use]
    pub fn title(self) -> String {
        self.as_str()
            .split('_')
            .map(|w| {
                let mut chars = w.chars();
                chars.next().map_or_else(String::new, |c| {
                    c.to_uppercase().collect::<String>() + chars.as_str()
                })
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A user-selectable action variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOption {
    /// Stable option identifier (e.g. `"archive_instead"`).
    pub id: String,
    /// Short label shown to the user.
    pub label: String,
    /// What selecting the option does.
    pub description: String,
    /// Operation kind.
    pub action_type: ActionType,
    /// Risk level of this specific option.
    pub severity: Severity,
    /// Execution parameters (mode, SQL, limits, ...).
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Whether the effect can be undone.
    pub reversible: bool,
    /// Expected impact, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_impact: Option<String>,
}

/// Lifecycle state of a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    /// Awaiting a response.
    Pending,
    /// Approved by the user.
    Approved,
    /// Rejected by the user.
    Rejected,
    /// Expired without a response.
    Timeout,
    /// Approved action has been executed.
    Executed,
}

impl ConfirmationStatus {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
            Self::Executed => "executed",
        }
    }

    /// Parses a stored status string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "timeout" => Self::Timeout,
            "executed" => Self::Executed,
            _ => Self::Pending,
        }
    }
}

/// A durable request for user confirmation of a risky operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    /// Unique request identifier.
    pub request_id: String,
    /// Workspace scope.
    pub workspace_id: String,
    /// User asked to confirm.
    pub user_id: String,
    /// Agent that raised the request.
    pub agent_name: String,
    /// Short request title.
    pub title: String,
    /// Detailed description of the operation and its impact.
    pub description: String,
    /// Context captured at detection time (query, SQL, plan, ...).
    #[serde(default)]
    pub context: serde_json::Value,
    /// Selectable options, in presentation order.
    pub options: Vec<ActionOption>,
    /// Option applied on timeout under the `default` policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_option: Option<String>,
    /// Seconds until expiry, derived from severity.
    pub timeout_seconds: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time. Always `created_at + timeout_seconds`, computed at
    /// write time.
    pub expires_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: ConfirmationStatus,
}

impl ConfirmationRequest {
    /// Creates a new pending request, stamping `created_at` and
    /// computing `expires_at` from the timeout.
    #[must_use]
    #[allow(clippy::too_many_arguments, clippy::cast_possible_wrap)]
    pub fn new(
        workspace_id: &str,
        user_id: &str,
        agent_name: &str,
        title: String,
        description: String,
        context: serde_json::Value,
        options: Vec<ActionOption>,
        default_option: Option<String>,
        timeout_seconds: u64,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = created_at + Duration::seconds(timeout_seconds as i64);
        Self {
            request_id: new_id("req"),
            workspace_id: workspace_id.to_string(),
            user_id: user_id.to_string(),
            agent_name: agent_name.to_string(),
            title,
            description,
            context,
            options,
            default_option,
            timeout_seconds,
            created_at,
            expires_at,
            status: ConfirmationStatus::Pending,
        }
    }

    /// Finds an option by ID.
    #[must_use]
    pub fn option(&self, option_id: &str) -> Option<&ActionOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    /// Highest severity across the request's options.
    #[must_use]
    pub fn max_severity(&self) -> Severity {
        self.options
            .iter()
            .map(|o| o.severity)
            .max()
            .unwrap_or_default()
    }
}

/// The user's (or timeout handler's) decision on a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    /// Request this responds to.
    pub request_id: String,
    /// Outcome.
    pub status: ConfirmationStatus,
    /// Selected option, for approved outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option_id: Option<String>,
    /// Free-form reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Parameter overrides supplied by the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_parameters: Option<serde_json::Value>,
    /// When the decision was recorded.
    pub responded_at: DateTime<Utc>,
}

/// Outcome of executing an approved option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecutionResult {
    /// Request the action belonged to.
    pub request_id: String,
    /// Option that was executed.
    pub option_id: String,
    /// Whether execution succeeded.
    pub success: bool,
    /// Agent result payload.
    #[serde(default)]
    pub result: serde_json::Value,
    /// Error description on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether a best-effort undo exists for this action.
    pub rollback_available: bool,
    /// Token identifying the undo record, when reversible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_id: Option<String>,
    /// Execution time.
    pub executed_at: DateTime<Utc>,
}

/// User sentiment attached to feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    /// Positive experience.
    Positive,
    /// Neutral experience.
    Neutral,
    /// Negative experience.
    Negative,
}

impl Sentiment {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

/// Post-execution feedback linked to a confirmation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFeedback {
    /// Unique feedback identifier.
    pub feedback_id: String,
    /// Request the feedback refers to.
    pub request_id: String,
    /// Rating from 1 to 5.
    pub rating: u8,
    /// Overall sentiment.
    pub sentiment: Sentiment,
    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// When the feedback was recorded.
    pub created_at: DateTime<Utc>,
}

impl UserFeedback {
    /// Creates feedback, clamping the rating into 1..=5.
    #[must_use]
    pub fn new(request_id: &str, rating: u8, sentiment: Sentiment, comment: Option<String>) -> Self {
        Self {
            feedback_id: new_id("fb"),
            request_id: request_id.to_string(),
            rating: rating.clamp(1, 5),
            sentiment,
            comment,
            created_at: Utc::now(),
        }
    }
}
