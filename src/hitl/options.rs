//! Option menu generation for confirmation requests.
//!
//! Every menu contains at least one reversible alternative (archive
//! instead of delete, notify instead of modify, preview instead of
//! execute, limited scope instead of full) and an explicit cancel.

use serde_json::json;

use crate::agents::board::ChartType;
use crate::hitl::risk::RiskAssessment;
use crate::hitl::schema::{ActionOption, ActionType, Severity};
use crate::orchestrator::plan::ExecutionPlan;

/// Scope limit offered for oversized board exports.
pub const LIMITED_SCOPE: usize = 100;

fn cancel_option(action_type: ActionType) -> ActionOption {
    ActionOption {
        id: "cancel".to_string(),
        label: "❌ Cancel".to_string(),
        description: "Do nothing".to_string(),
        action_type,
        severity: Severity::Low,
        parameters: json!({}),
        reversible: true,
        estimated_impact: None,
    }
}

/// Builds the option menu for a risky task operation.
#[must_use]
pub fn task_options(assessment: &RiskAssessment, query: &str, sql: &str) -> Vec<ActionOption> {
    match assessment.action_type {
        ActionType::TaskDelete => vec![
            ActionOption {
                id: "confirm_delete".to_string(),
                label: "✅ Confirm deletion".to_string(),
                description: "Execute the delete operation".to_string(),
                action_type: ActionType::TaskDelete,
                severity: assessment.severity,
                parameters: json!({"mode": "full", "sql": sql, "query": query}),
                reversible: false,
                estimated_impact: Some(assessment.estimated_impact.clone()),
            },
            ActionOption {
                id: "archive_instead".to_string(),
                label: "📦 Archive instead".to_string(),
                description: "Mark tasks as archived instead of deleting".to_string(),
                action_type: ActionType::TaskUpdate,
                severity: Severity::Low,
                parameters: json!({"mode": "archive", "query": query}),
                reversible: true,
                estimated_impact: Some("Tasks can be restored from archive".to_string()),
            },
            cancel_option(ActionType::TaskDelete),
        ],
        ActionType::DeadlineChange => vec![
            ActionOption {
                id: "confirm_change".to_string(),
                label: "✅ Confirm deadline change".to_string(),
                description: "Execute the deadline modification".to_string(),
                action_type: ActionType::DeadlineChange,
                severity: assessment.severity,
                parameters: json!({"mode": "full", "sql": sql, "query": query}),
                reversible: true,
                estimated_impact: Some(assessment.estimated_impact.clone()),
            },
            ActionOption {
                id: "notify_only".to_string(),
                label: "📧 Notify stakeholders only".to_string(),
                description: "Send notification without changing deadlines".to_string(),
                action_type: ActionType::NotificationSend,
                severity: Severity::Low,
                parameters: json!({"mode": "notify_only", "query": query}),
                reversible: false,
                estimated_impact: Some("No changes to tasks".to_string()),
            },
            cancel_option(ActionType::DeadlineChange),
        ],
        _ => vec![
            ActionOption {
                id: "confirm_update".to_string(),
                label: "✅ Confirm update".to_string(),
                description: "Execute the update operation".to_string(),
                action_type: assessment.action_type,
                severity: assessment.severity,
                parameters: json!({"mode": "full", "sql": sql, "query": query}),
                reversible: true,
                estimated_impact: Some(assessment.estimated_impact.clone()),
            },
            ActionOption {
                id: "preview_only".to_string(),
                label: "👁️ Preview changes".to_string(),
                description: "Show what would be changed without executing".to_string(),
                action_type: ActionType::TaskUpdate,
                severity: Severity::Low,
                parameters: json!({"mode": "preview", "query": query}),
                reversible: false,
                estimated_impact: Some("No changes to tasks".to_string()),
            },
            cancel_option(assessment.action_type),
        ],
    }
}

/// Builds the option menu for an oversized board export.
#[must_use]
pub fn board_options(
    assessment: &RiskAssessment,
    query: &str,
    chart_type: ChartType,
    task_count: usize,
) -> Vec<ActionOption> {
    vec![
        ActionOption {
            id: "generate_full".to_string(),
            label: format!("📊 Generate full {}", chart_type.as_str()),
            description: format!("Visualize all {task_count} tasks"),
            action_type: ActionType::Visualization,
            severity: assessment.severity,
            parameters: json!({"mode": "full", "query": query, "chart_type": chart_type.as_str()}),
            reversible: false,
            estimated_impact: Some(assessment.estimated_impact.clone()),
        },
        ActionOption {
            id: "generate_limited".to_string(),
            label: format!("⚡ Generate top {LIMITED_SCOPE} only"),
            description: "Faster generation with limited scope".to_string(),
            action_type: ActionType::Visualization,
            severity: Severity::Low,
            parameters: json!({
                "mode": "limited",
                "query": query,
                "chart_type": chart_type.as_str(),
                "limit": LIMITED_SCOPE,
            }),
            reversible: false,
            estimated_impact: Some("Quick generation with most important tasks".to_string()),
        },
        ActionOption {
            id: "export_csv".to_string(),
            label: "📄 Export as CSV".to_string(),
            description: "Export data to CSV for external processing".to_string(),
            action_type: ActionType::BulkOperation,
            severity: Severity::Low,
            parameters: json!({"mode": "export_csv", "query": query}),
            reversible: false,
            estimated_impact: Some("Lightweight export, can process externally".to_string()),
        },
        cancel_option(ActionType::Visualization),
    ]
}

/// Builds the option menu for a risky execution plan.
#[must_use]
pub fn plan_options(
    assessment: &RiskAssessment,
    plan: &ExecutionPlan,
    query: &str,
) -> Vec<ActionOption> {
    let plan_value = serde_json::to_value(plan).unwrap_or_default();
    let step_count = plan.steps.len();

    if assessment.severity == Severity::Critical {
        return vec![
            ActionOption {
                id: "execute_full".to_string(),
                label: "⚠️ Execute complete plan".to_string(),
                description: format!("Execute all {step_count} steps as planned"),
                action_type: ActionType::PlanExecution,
                severity: assessment.severity,
                parameters: json!({"mode": "full", "plan": plan_value, "query": query}),
                reversible: false,
                estimated_impact: Some(assessment.estimated_impact.clone()),
            },
            ActionOption {
                id: "execute_safe".to_string(),
                label: "🛡️ Execute safe subset".to_string(),
                description: "Run reversible operations only, skipping deletions".to_string(),
                action_type: ActionType::PlanExecution,
                severity: Severity::Medium,
                parameters: json!({"mode": "safe", "plan": plan_value, "query": query}),
                reversible: true,
                estimated_impact: Some("No deletions, reversible operations only".to_string()),
            },
            ActionOption {
                id: "preview_plan".to_string(),
                label: "👁️ Preview plan".to_string(),
                description: "Show what each step would do without executing".to_string(),
                action_type: ActionType::PlanExecution,
                severity: Severity::Low,
                parameters: json!({"mode": "preview", "plan": plan_value, "query": query}),
                reversible: false,
                estimated_impact: Some("No changes, view-only".to_string()),
            },
            cancel_option(ActionType::PlanExecution),
        ];
    }

    vec![
        ActionOption {
            id: "execute_full".to_string(),
            label: "▶️ Execute plan".to_string(),
            description: format!("Execute all {step_count} steps"),
            action_type: ActionType::PlanExecution,
            severity: assessment.severity,
            parameters: json!({"mode": "full", "plan": plan_value, "query": query}),
            reversible: assessment.severity == Severity::Medium,
            estimated_impact: Some(assessment.estimated_impact.clone()),
        },
        ActionOption {
            id: "step_by_step".to_string(),
            label: "🔄 Execute step-by-step".to_string(),
            description: "Pause after each step for review".to_string(),
            action_type: ActionType::PlanExecution,
            severity: Severity::Low,
            parameters: json!({"mode": "step_by_step", "plan": plan_value, "query": query}),
            reversible: true,
            estimated_impact: Some("Full control over each operation".to_string()),
        },
        ActionOption {
            id: "preview_plan".to_string(),
            label: "👁️ Preview plan".to_string(),
            description: "Show what each step would do without executing".to_string(),
            action_type: ActionType::PlanExecution,
            severity: Severity::Low,
            parameters: json!({"mode": "preview", "plan": plan_value, "query": query}),
            reversible: false,
            estimated_impact: Some("No changes".to_string()),
        },
        cancel_option(ActionType::PlanExecution),
    ]
}
