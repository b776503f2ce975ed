//! Risk classification for agent-initiated operations.
//!
//! Composable per-agent rules: the task rules inspect the planned SQL
//! and the query text, the board rules inspect task volume and chart
//! type, and the plan rules inspect the full execution plan. The
//! classifier is monotone: removing a deletion or a multi-agent
//! dimension from an operation never raises its severity.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::agents::board::ChartType;
use crate::hitl::schema::{ActionType, Severity};
use crate::orchestrator::plan::ExecutionPlan;

/// Phrasings that mark an operation as workspace-wide.
const BULK_PHRASES: &[&str] = &["all tasks", "every task", "bulk"];
/// Keywords that escalate a plan to high severity.
const ESCALATION_KEYWORDS: &[&str] = &["escalate", "urgent", "critical", "emergency"];
/// Keywords marking deletion steps in a plan.
const DELETE_KEYWORDS: &[&str] = &["delete", "remove", "drop", "erase"];
/// Keywords marking mutation steps in a plan.
const MUTATION_KEYWORDS: &[&str] = &["update", "change", "modify", "set ", "assign", "move"];
/// Plans longer than this are flagged as complex workflows.
const MAX_UNFLAGGED_STEPS: usize = 4;
/// Board volume thresholds.
const BOARD_HIGH_THRESHOLD: usize = 500;
/// Above this many tasks any export is flagged.
const BOARD_MEDIUM_THRESHOLD: usize = 100;
/// Gantt charts above this many tasks are flagged.
const GANTT_THRESHOLD: usize = 50;

/// A detected risky operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Kind of operation.
    pub action_type: ActionType,
    /// Assigned severity.
    pub severity: Severity,
    /// Why the operation was flagged.
    pub reason: String,
    /// Expected impact, for the confirmation description.
    pub estimated_impact: String,
}

fn contains_bulk_phrase(query: &str) -> bool {
    BULK_PHRASES.iter().any(|p| query.contains(p))
}

/// Classifies a task operation from the user query and the planned SQL.
///
/// Returns `None` for safe, read-only analysis queries.
#[must_use]
pub fn assess_sql(query: &str, sql: &str) -> Option<RiskAssessment> {
    let query = query.to_lowercase();
    let sql = sql.to_lowercase();

    // Deletions first: they carry the highest stakes.
    if query.contains("delete") || sql.contains("delete from") {
        if !sql.contains("where") || contains_bulk_phrase(&query) {
            return Some(RiskAssessment {
                action_type: ActionType::TaskDelete,
                severity: Severity::Critical,
                reason: "Bulk delete without condition".to_string(),
                estimated_impact: "Will delete ALL tasks in workspace".to_string(),
            });
        }
        return Some(RiskAssessment {
            action_type: ActionType::TaskDelete,
            severity: Severity::High,
            reason: "Task deletion".to_string(),
            estimated_impact: "Deleted tasks cannot be recovered".to_string(),
        });
    }

    // Deadline changes.
    if ["deadline", "due date", "extend", "postpone"]
        .iter()
        .any(|w| query.contains(w))
        && sql.contains("update")
        && sql.contains("due_date")
    {
        return Some(RiskAssessment {
            action_type: ActionType::DeadlineChange,
            severity: Severity::Medium,
            reason: "Deadline modification".to_string(),
            estimated_impact: "Will affect task schedules and dependencies".to_string(),
        });
    }

    // Priority changes: low for a single targeted task, medium in bulk.
    if query.contains("priority") && sql.contains("update") {
        if sql.contains("where id =") {
            return Some(RiskAssessment {
                action_type: ActionType::PriorityChange,
                severity: Severity::Low,
                reason: "Priority change for single task".to_string(),
                estimated_impact: "May affect task ordering".to_string(),
            });
        }
        return Some(RiskAssessment {
            action_type: ActionType::PriorityChange,
            severity: Severity::Medium,
            reason: "Bulk priority changes".to_string(),
            estimated_impact: "Will affect multiple tasks".to_string(),
        });
    }

    // Status updates touching many tasks.
    if query.contains("status")
        && sql.contains("update")
        && (!sql.contains("where")
            || ["all", "bulk", "multiple"].iter().any(|w| query.contains(w)))
    {
        return Some(RiskAssessment {
            action_type: ActionType::TaskUpdate,
            severity: Severity::Medium,
            reason: "Bulk status update".to_string(),
            estimated_impact: "Will change status of multiple tasks".to_string(),
        });
    }

    // Any other bulk mutation phrasing.
    if contains_bulk_phrase(&query) && (sql.contains("update") || sql.contains("delete")) {
        return Some(RiskAssessment {
            action_type: ActionType::BulkOperation,
            severity: Severity::Critical,
            reason: "Bulk operation on all tasks".to_string(),
            estimated_impact: "Will affect entire workspace".to_string(),
        });
    }

    None
}

/// Classifies a board visualization from task volume and chart type.
#[must_use]
pub fn assess_board(task_count: usize, chart_type: ChartType) -> Option<RiskAssessment> {
    if task_count > BOARD_HIGH_THRESHOLD {
        return Some(RiskAssessment {
            action_type: ActionType::BulkOperation,
            severity: Severity::High,
            reason: format!("Very large export ({task_count} tasks)"),
            estimated_impact: format!(
                "Will generate {} for {task_count} tasks. May take 2-5 minutes and impact performance.",
                chart_type.as_str()
            ),
        });
    }
    if task_count > BOARD_MEDIUM_THRESHOLD {
        return Some(RiskAssessment {
            action_type: ActionType::BulkOperation,
            severity: Severity::Medium,
            reason: format!("Large export operation ({task_count} tasks)"),
            estimated_impact: format!(
                "Will generate {} for {task_count} tasks. May take 30-60 seconds.",
                chart_type.as_str()
            ),
        });
    }
    if chart_type == ChartType::Gantt && task_count > GANTT_THRESHOLD {
        return Some(RiskAssessment {
            action_type: ActionType::BulkOperation,
            severity: Severity::Medium,
            reason: format!("Large Gantt chart ({task_count} tasks)"),
            estimated_impact: "Complex timeline visualization may be slow to render".to_string(),
        });
    }
    None
}

/// Classifies a full execution plan.
#[must_use]
pub fn assess_plan(plan: &ExecutionPlan, query: &str) -> Option<RiskAssessment> {
    let query = query.to_lowercase();
    let agents: HashSet<&str> = plan.steps.iter().map(|s| s.agent.as_str()).collect();
    let multi_agent = agents.len() > 1 || agents.contains("both");

    let step_text = |step: &crate::orchestrator::plan::ExecutionStep| step.query.to_lowercase();
    let has_deletions = plan
        .steps
        .iter()
        .any(|s| DELETE_KEYWORDS.iter().any(|k| step_text(s).contains(k)));
    let has_mutations = plan
        .steps
        .iter()
        .any(|s| MUTATION_KEYWORDS.iter().any(|k| step_text(s).contains(k)));

    if multi_agent && has_deletions {
        return Some(RiskAssessment {
            action_type: ActionType::PlanExecution,
            severity: Severity::Critical,
            reason: "Multi-agent operation with deletions".to_string(),
            estimated_impact: format!(
                "Affects {} systems with irreversible deletions",
                agents.len()
            ),
        });
    }
    if multi_agent && has_mutations {
        return Some(RiskAssessment {
            action_type: ActionType::PlanExecution,
            severity: Severity::High,
            reason: "Multi-agent coordination with modifications".to_string(),
            estimated_impact: format!("Affects {} systems with data changes", agents.len()),
        });
    }
    if ESCALATION_KEYWORDS.iter().any(|k| query.contains(k)) {
        return Some(RiskAssessment {
            action_type: ActionType::PlanExecution,
            severity: Severity::High,
            reason: "Escalation request detected".to_string(),
            estimated_impact: "Will notify stakeholders and potentially trigger alerts".to_string(),
        });
    }
    if multi_agent {
        return Some(RiskAssessment {
            action_type: ActionType::PlanExecution,
            severity: Severity::Medium,
            reason: "Multi-agent coordination required".to_string(),
            estimated_impact: format!(
                "Involves multiple agents: {}",
                {
                    let mut names: Vec<&str> = agents.into_iter().collect();
                    names.sort_unstable();
                    names.join(", ")
                }
            ),
        });
    }
    if has_deletions {
        return Some(RiskAssessment {
            action_type: ActionType::PlanExecution,
            severity: Severity::Medium,
            reason: "Operation involves deletions".to_string(),
            estimated_impact: "Data will be permanently removed".to_string(),
        });
    }
    if plan.steps.len() > MAX_UNFLAGGED_STEPS {
        return Some(RiskAssessment {
            action_type: ActionType::PlanExecution,
            severity: Severity::Medium,
            reason: format!("Complex workflow with {} steps", plan.steps.len()),
            estimated_impact: "Long execution time with multiple operations".to_string(),
        });
    }
    None
}

/// Picks the most severe of the given assessments.
#[must_use]
pub fn most_severe(assessments: Vec<RiskAssessment>) -> Option<RiskAssessment> {
    assessments.into_iter().max_by_key(|a| a.severity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::intent::{AgentTarget, Intent, IntentType};
    use crate::orchestrator::plan::{ExecutionStep, StepType};

    const SAFE_SQL: &str = "select t.title from tasks t where t.workspace_id = :workspace_id";

    #[test]
    fn test_delete_with_where_is_high() {
        let assessment = assess_sql(
            "Delete all completed tasks",
            "DELETE FROM tasks WHERE status = 'done'",
        );
        let Some(assessment) = assessment else {
            unreachable!("delete must be flagged")
        };
        assert_eq!(assessment.severity, Severity::High);
        assert_eq!(assessment.action_type, ActionType::TaskDelete);
    }

    #[test]
    fn test_delete_without_where_is_critical() {
        let assessment = assess_sql("delete everything", "DELETE FROM tasks");
        assert_eq!(
            assessment.map(|a| a.severity),
            Some(Severity::Critical)
        );
    }

    #[test]
    fn test_delete_every_task_phrasing_is_critical() {
        let assessment = assess_sql(
            "Delete every task",
            "DELETE FROM tasks WHERE workspace_id = :workspace_id",
        );
        assert_eq!(assessment.map(|a| a.severity), Some(Severity::Critical));
    }

    #[test]
    fn test_deadline_update_is_medium() {
        let assessment = assess_sql(
            "extend the deadline for the release",
            "UPDATE tasks SET due_date = '2026-09-01' WHERE id = 't1'",
        );
        assert_eq!(assessment.map(|a| a.severity), Some(Severity::Medium));
    }

    #[test]
    fn test_single_task_priority_is_low() {
        let assessment = assess_sql(
            "raise the priority of the login bug",
            "UPDATE tasks SET priority = 'high' WHERE id = 't1'",
        );
        assert_eq!(assessment.map(|a| a.severity), Some(Severity::Low));
    }

    #[test]
    fn test_bulk_priority_is_medium() {
        let assessment = assess_sql(
            "raise priority for the sprint",
            "UPDATE tasks SET priority = 'high' WHERE status = 'todo'",
        );
        assert_eq!(assessment.map(|a| a.severity), Some(Severity::Medium));
    }

    #[test]
    fn test_read_only_query_is_safe() {
        assert!(assess_sql("how many tasks are overdue?", SAFE_SQL).is_none());
    }

    #[test]
    fn test_monotone_removing_delete_never_raises() {
        let with_delete = assess_sql("delete old tasks", "DELETE FROM tasks WHERE old = 1")
            .map_or(Severity::Low, |a| a.severity);
        let without_delete =
            assess_sql("show old tasks", SAFE_SQL).map_or(Severity::Low, |a| a.severity);
        assert!(without_delete <= with_delete);
    }

    #[test]
    fn test_board_thresholds() {
        assert!(assess_board(10, ChartType::Kanban).is_none());
        assert_eq!(
            assess_board(150, ChartType::Gantt).map(|a| a.severity),
            Some(Severity::Medium)
        );
        assert_eq!(
            assess_board(501, ChartType::Kanban).map(|a| a.severity),
            Some(Severity::High)
        );
        assert_eq!(
            assess_board(60, ChartType::Gantt).map(|a| a.severity),
            Some(Severity::Medium)
        );
        assert!(assess_board(60, ChartType::Kanban).is_none());
    }

    fn step(id: &str, agent: AgentTarget, query: &str) -> ExecutionStep {
        ExecutionStep {
            step_id: id.to_string(),
            step_type: StepType::QueryTask,
            agent,
            query: query.to_string(),
            dependencies: Vec::new(),
            reasoning: String::new(),
        }
    }

    fn plan_with(steps: Vec<ExecutionStep>) -> ExecutionPlan {
        let intent = Intent {
            intent_type: IntentType::TaskQuery,
            confidence: 0.9,
            agent: AgentTarget::Task,
            reasoning: String::new(),
            entities: serde_json::json!({}),
            requires_decomposition: true,
            requires_agents: true,
        };
        let mut plan = ExecutionPlan::single_step("q", &intent);
        plan.steps = steps;
        plan
    }

    #[test]
    fn test_plan_multi_agent_delete_is_critical() {
        let plan = plan_with(vec![
            step("s1", AgentTarget::Task, "delete finished tasks"),
            step("s2", AgentTarget::Document, "summarize what was removed"),
        ]);
        let assessment = assess_plan(&plan, "clean up the workspace");
        assert_eq!(assessment.map(|a| a.severity), Some(Severity::Critical));
    }

    #[test]
    fn test_plan_multi_agent_mutation_is_high() {
        let plan = plan_with(vec![
            step("s1", AgentTarget::Task, "update the sprint statuses"),
            step("s2", AgentTarget::Board, "draw the board"),
        ]);
        let assessment = assess_plan(&plan, "refresh the board");
        assert_eq!(assessment.map(|a| a.severity), Some(Severity::High));
    }

    #[test]
    fn test_plan_escalation_keyword_is_high() {
        let plan = plan_with(vec![step("s1", AgentTarget::Task, "list blockers")]);
        let assessment = assess_plan(&plan, "this is urgent, escalate to the team");
        assert_eq!(assessment.map(|a| a.severity), Some(Severity::High));
    }

    #[test]
    fn test_plan_multi_agent_read_only_is_medium() {
        let plan = plan_with(vec![
            step("s1", AgentTarget::Task, "list overdue tasks"),
            step("s2", AgentTarget::Document, "find the requirements section"),
        ]);
        let assessment = assess_plan(&plan, "cross-check tasks against the requirements doc");
        assert_eq!(assessment.map(|a| a.severity), Some(Severity::Medium));
    }

    #[test]
    fn test_plan_long_workflow_is_medium() {
        let steps: Vec<ExecutionStep> = (0..5)
            .map(|i| step(&format!("s{i}"), AgentTarget::Task, "count tasks"))
            .collect();
        let plan = plan_with(steps);
        let assessment = assess_plan(&plan, "do the weekly report");
        assert_eq!(assessment.map(|a| a.severity), Some(Severity::Medium));
    }

    #[test]
    fn test_plan_simple_read_is_safe() {
        let plan = plan_with(vec![step("s1", AgentTarget::Task, "count open tasks")]);
        assert!(assess_plan(&plan, "how many open tasks?").is_none());
    }

    #[test]
    fn test_plan_monotone_removing_multi_agent() {
        let multi = plan_with(vec![
            step("s1", AgentTarget::Task, "delete finished tasks"),
            step("s2", AgentTarget::Document, "log it"),
        ]);
        let single = plan_with(vec![step("s1", AgentTarget::Task, "delete finished tasks")]);
        let multi_severity = assess_plan(&multi, "clean up").map_or(Severity::Low, |a| a.severity);
        let single_severity =
            assess_plan(&single, "clean up").map_or(Severity::Low, |a| a.severity);
        assert!(single_severity <= multi_severity);
    }

    #[test]
    fn test_most_severe_picks_max() {
        let low = RiskAssessment {
            action_type: ActionType::PriorityChange,
            severity: Severity::Low,
            reason: String::new(),
            estimated_impact: String::new(),
        };
        let high = RiskAssessment {
            action_type: ActionType::TaskDelete,
            severity: Severity::High,
            reason: String::new(),
            estimated_impact: String::new(),
        };
        let top = most_severe(vec![low, high]);
        assert_eq!(top.map(|a| a.severity), Some(Severity::High));
    }
}
