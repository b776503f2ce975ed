//! Execution plans over the available agents.
//!
//! A plan is an ordered sequence of steps whose dependencies form a
//! DAG. Validation is a required precondition before execution: step
//! IDs must be unique, dependencies must reference earlier steps, and
//! unknown agent values are replaced with type-appropriate defaults.

use serde::{Deserialize, Serialize};

use crate::core::new_id;
use crate::error::{AgentError, LlmError};
use crate::llm::extract_json_object;
use crate::orchestrator::intent::{AgentTarget, Intent, IntentType};

/// Kind of work a plan step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Document retrieval QA.
    QueryDocument,
    /// Text completion in the active document.
    DocumentCompletion,
    /// Task SQL analysis.
    QueryTask,
    /// Board visualization.
    QueryBoard,
    /// Combine previous results.
    Synthesize,
    /// Validate previous results.
    Validate,
}

impl StepType {
    /// Parses a wire value. Unknown step types are a plan error, not a
    /// default.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "query_document" => Some(Self::QueryDocument),
            "document_completion" => Some(Self::DocumentCompletion),
            "query_task" => Some(Self::QueryTask),
            "query_board" => Some(Self::QueryBoard),
            "synthesize" => Some(Self::Synthesize),
            "validate" => Some(Self::Validate),
            _ => None,
        }
    }

    /// The agent a step of this type runs on when the planner supplied
    /// an invalid agent value.
    #[must_use]
    pub const fn default_agent(self) -> AgentTarget {
        match self {
            Self::QueryDocument | Self::DocumentCompletion => AgentTarget::Document,
            Self::QueryTask => AgentTarget::Task,
            Self::QueryBoard => AgentTarget::Board,
            Self::Synthesize | Self::Validate => AgentTarget::Both,
        }
    }
}

/// Estimated complexity of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Single-step.
    #[default]
    Simple,
    /// A few steps.
    Medium,
    /// Many steps or cross-agent work.
    Complex,
}

/// One step of an execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// Unique step identifier within the plan.
    pub step_id: String,
    /// Kind of work.
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Agent the step runs on.
    pub agent: AgentTarget,
    /// Query text handed to the agent.
    pub query: String,
    /// Step IDs that must complete successfully first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Planner reasoning.
    #[serde(default)]
    pub reasoning: String,
}

/// An ordered, validated plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Unique plan identifier.
    pub plan_id: String,
    /// The query the plan answers.
    pub original_query: String,
    /// Steps in execution order.
    pub steps: Vec<ExecutionStep>,
    /// Estimated complexity.
    pub estimated_complexity: Complexity,
    /// Whether step results must be combined by the synthesis stage.
    pub requires_synthesis: bool,
    /// Planner reasoning.
    #[serde(default)]
    pub reasoning: String,
}

/// Result of executing one plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step this result belongs to.
    pub step_id: String,
    /// Whether the step succeeded.
    pub success: bool,
    /// Agent result payload.
    #[serde(default)]
    pub result: serde_json::Value,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time.
    pub execution_time_ms: u64,
}

impl ExecutionPlan {
    /// Builds the single-step plan used when the intent targets one
    /// agent and needs no decomposition.
    #[must_use]
    pub fn single_step(query: &str, intent: &Intent) -> Self {
        let step_type = match intent.agent {
            AgentTarget::Task => StepType::QueryTask,
            AgentTarget::Board => StepType::QueryBoard,
            AgentTarget::Document | AgentTarget::Both => match intent.intent_type {
                IntentType::DocumentCompletion => StepType::DocumentCompletion,
                _ => StepType::QueryDocument,
            },
        };
        Self {
            plan_id: new_id("plan"),
            original_query: query.to_string(),
            steps: vec![ExecutionStep {
                step_id: "step1".to_string(),
                step_type,
                agent: intent.agent,
                query: query.to_string(),
                dependencies: Vec::new(),
                reasoning: "single-agent query, no decomposition required".to_string(),
            }],
            estimated_complexity: Complexity::Simple,
            requires_synthesis: false,
            reasoning: "direct dispatch".to_string(),
        }
    }

    /// Validates the plan as a precondition for execution.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::PlanInvalid`] for empty plans, duplicate
    /// step IDs, or dependencies that do not reference an earlier step
    /// (which also rules out cycles).
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.steps.is_empty() {
            return Err(AgentError::PlanInvalid("plan has no steps".to_string()));
        }
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id.as_str()) {
                return Err(AgentError::PlanInvalid(format!(
                    "duplicate step_id '{}'",
                    step.step_id
                )));
            }
            for dep in &step.dependencies {
                if !seen.contains(dep.as_str()) || dep == &step.step_id {
                    return Err(AgentError::PlanInvalid(format!(
                        "step '{}' depends on '{dep}', which is not an earlier step",
                        step.step_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Steps that (directly) depend on the given step.
    #[must_use]
    pub fn dependents_of(&self, step_id: &str) -> Vec<&ExecutionStep> {
        self.steps
            .iter()
            .filter(|s| s.dependencies.iter().any(|d| d == step_id))
            .collect()
    }
}

#[derive(Deserialize)]
struct StepWire {
    #[serde(default)]
    step_id: String,
    #[serde(rename = "type", default)]
    step_type: String,
    #[serde(default)]
    agent: String,
    #[serde(default)]
    query: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Deserialize)]
struct PlanWire {
    #[serde(default)]
    plan_id: Option<String>,
    steps: Vec<StepWire>,
    #[serde(default)]
    estimated_complexity: String,
    #[serde(default)]
    requires_synthesis: bool,
    #[serde(default)]
    reasoning: String,
}

/// Parses and validates the model's plan JSON.
///
/// Invalid agent values are replaced with the step type's default;
/// an unknown step type rejects the plan.
///
/// # Errors
///
/// Returns [`LlmError::ResponseParse`] when no JSON can be located and
/// [`AgentError::PlanInvalid`] (wrapped) for structural violations.
pub fn parse_plan(content: &str, original_query: &str) -> Result<ExecutionPlan, crate::error::Error> {
    let json = extract_json_object(content).ok_or_else(|| LlmError::ResponseParse {
        message: "no JSON object in plan response".to_string(),
        content: content.to_string(),
    })?;
    let wire: PlanWire = serde_json::from_str(json).map_err(|e| LlmError::ResponseParse {
        message: format!("invalid plan JSON: {e}"),
        content: content.to_string(),
    })?;

    let mut steps = Vec::with_capacity(wire.steps.len());
    for (i, step) in wire.steps.into_iter().enumerate() {
        let step_type = StepType::parse(&step.step_type).ok_or_else(|| {
            AgentError::PlanInvalid(format!("unknown step type '{}'", step.step_type))
        })?;
        let agent = match step.agent.trim() {
            "document" | "task" | "board" | "both" => AgentTarget::parse(&step.agent),
            _ => step_type.default_agent(),
        };
        steps.push(ExecutionStep {
            step_id: if step.step_id.is_empty() {
                format!("step{}", i + 1)
            } else {
                step.step_id
            },
            step_type,
            agent,
            query: if step.query.is_empty() {
                original_query.to_string()
            } else {
                step.query
            },
            dependencies: step.dependencies,
            reasoning: step.reasoning,
        });
    }

    let complexity = match wire.estimated_complexity.as_str() {
        "medium" => Complexity::Medium,
        "complex" => Complexity::Complex,
        _ => Complexity::Simple,
    };

    let plan = ExecutionPlan {
        plan_id: wire.plan_id.unwrap_or_else(|| new_id("plan")),
        original_query: original_query.to_string(),
        steps,
        estimated_complexity: complexity,
        requires_synthesis: wire.requires_synthesis,
        reasoning: wire.reasoning,
    };
    plan.validate()?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(agent: AgentTarget) -> Intent {
        Intent {
            intent_type: IntentType::TaskQuery,
            confidence: 0.9,
            agent,
            reasoning: String::new(),
            entities: serde_json::json!({}),
            requires_decomposition: false,
            requires_agents: true,
        }
    }

    #[test]
    fn test_single_step_plan() {
        let plan = ExecutionPlan::single_step("show overdue tasks", &intent(AgentTarget::Task));
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].step_type, StepType::QueryTask);
        assert!(!plan.requires_synthesis);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_parse_plan_valid() {
        let content = r#"{
            "steps": [
                {"step_id": "step1", "type": "query_task", "agent": "task", "query": "count tasks", "dependencies": [], "reasoning": "r"},
                {"step_id": "step2", "type": "synthesize", "agent": "both", "query": "combine", "dependencies": ["step1"], "reasoning": "r"}
            ],
            "estimated_complexity": "medium",
            "requires_synthesis": true,
            "reasoning": "two stages"
        }"#;
        let plan = parse_plan(content, "original").unwrap_or_else(|_| unreachable!());
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.estimated_complexity, Complexity::Medium);
        assert!(plan.requires_synthesis);
    }

    #[test]
    fn test_parse_plan_invalid_agent_replaced() {
        let content = r#"{"steps": [{"step_id": "s1", "type": "query_board", "agent": "orchestrator", "query": "q"}], "estimated_complexity": "simple", "requires_synthesis": false, "reasoning": ""}"#;
        let plan = parse_plan(content, "q").unwrap_or_else(|_| unreachable!());
        assert_eq!(plan.steps[0].agent, AgentTarget::Board);
    }

    #[test]
    fn test_parse_plan_unknown_step_type_rejected() {
        let content = r#"{"steps": [{"step_id": "s1", "type": "query_weather", "agent": "task", "query": "q"}], "estimated_complexity": "simple", "requires_synthesis": false, "reasoning": ""}"#;
        assert!(parse_plan(content, "q").is_err());
    }

    #[test]
    fn test_parse_plan_forward_dependency_rejected() {
        let content = r#"{"steps": [
            {"step_id": "s1", "type": "query_task", "agent": "task", "query": "q", "dependencies": ["s2"]},
            {"step_id": "s2", "type": "query_task", "agent": "task", "query": "q"}
        ], "estimated_complexity": "simple", "requires_synthesis": false, "reasoning": ""}"#;
        assert!(parse_plan(content, "q").is_err());
    }

    #[test]
    fn test_validate_duplicate_step_ids() {
        let mut plan = ExecutionPlan::single_step("q", &intent(AgentTarget::Task));
        let duplicate = plan.steps[0].clone();
        plan.steps.push(duplicate);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_validate_self_dependency() {
        let mut plan = ExecutionPlan::single_step("q", &intent(AgentTarget::Task));
        plan.steps[0].dependencies.push("step1".to_string());
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_dependents_of() {
        let content = r#"{"steps": [
            {"step_id": "a", "type": "query_task", "agent": "task", "query": "q"},
            {"step_id": "b", "type": "synthesize", "agent": "both", "query": "q", "dependencies": ["a"]}
        ], "estimated_complexity": "simple", "requires_synthesis": true, "reasoning": ""}"#;
        let plan = parse_plan(content, "q").unwrap_or_else(|_| unreachable!());
        let deps = plan.dependents_of("a");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].step_id, "b");
        assert!(plan.dependents_of("b").is_empty());
    }

    #[test]
    fn test_parse_plan_fills_missing_ids_and_queries() {
        let content = r#"{"steps": [{"type": "query_document", "agent": "document"}], "estimated_complexity": "simple", "requires_synthesis": false, "reasoning": ""}"#;
        let plan = parse_plan(content, "fallback query").unwrap_or_else(|_| unreachable!());
        assert_eq!(plan.steps[0].step_id, "step1");
        assert_eq!(plan.steps[0].query, "fallback query");
    }
}
