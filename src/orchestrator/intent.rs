//! Intent classification types and tolerant parsing.
//!
//! The model's intent JSON is parsed defensively: fences stripped, the
//! first balanced object extracted, and unknown enum values replaced
//! with safe defaults instead of failing.

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::extract_json_object;

/// Classified intent of a user query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    /// Content questions over documents.
    DocumentQuery,
    /// Continue/complete text in the active document.
    DocumentCompletion,
    /// Task status, assignees, metrics.
    TaskQuery,
    /// Charts and diagrams.
    BoardQuery,
    /// Needs both documents and task data.
    HybridQuery,
    /// High-level workspace summary.
    WorkspaceOverview,
    /// Risk/delay analysis.
    TaskRisk,
    /// Greetings, small talk, out-of-scope.
    Unknown,
}

impl IntentType {
    /// Parses a wire value; unrecognized strings fall back to
    /// `DocumentQuery` so the query still reaches document search.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "document_completion" => Self::DocumentCompletion,
            "task_query" => Self::TaskQuery,
            "board_query" => Self::BoardQuery,
            "hybrid_query" => Self::HybridQuery,
            "workspace_overview" => Self::WorkspaceOverview,
            "task_risk" => Self::TaskRisk,
            "unknown" => Self::Unknown,
            _ => Self::DocumentQuery,
        }
    }

    /// Returns the snake_case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DocumentQuery => "document_query",
            Self::DocumentCompletion => "document_completion",
            Self::TaskQuery => "task_query",
            Self::BoardQuery => "board_query",
            Self::HybridQuery => "hybrid_query",
            Self::WorkspaceOverview => "workspace_overview",
            Self::TaskRisk => "task_risk",
            Self::Unknown => "unknown",
        }
    }
}

/// Which agent(s) a query routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentTarget {
    /// Document agent.
    Document,
    /// Task agent.
    Task,
    /// Board agent.
    Board,
    /// Multiple agents.
    Both,
}

impl AgentTarget {
    /// Parses a wire value; unrecognized strings (including
    /// `"orchestrator"`) fall back to `Both`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "document" => Self::Document,
            "task" => Self::Task,
            "board" => Self::Board,
            _ => Self::Both,
        }
    }

    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Task => "task",
            Self::Board => "board",
            Self::Both => "both",
        }
    }
}

/// A structured classification of a user query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// Intent type.
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
    /// Target agent(s).
    pub agent: AgentTarget,
    /// Classifier reasoning.
    pub reasoning: String,
    /// Extracted entities.
    #[serde(default)]
    pub entities: serde_json::Value,
    /// Whether the query needs a multi-step plan.
    #[serde(default)]
    pub requires_decomposition: bool,
    /// Whether any agent needs to run at all. False for small talk.
    #[serde(default = "default_requires_agents")]
    pub requires_agents: bool,
}

const fn default_requires_agents() -> bool {
    true
}

impl Intent {
    /// Whether this intent should short-circuit to the small-talk path.
    #[must_use]
    pub const fn is_small_talk(&self) -> bool {
        matches!(self.intent_type, IntentType::Unknown) && !self.requires_agents
    }

    /// Applies the post-parse normalization rules:
    /// small talk gets full confidence; an unknown intent that still
    /// needs agents is retargeted at document search with reduced
    /// confidence.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.intent_type == IntentType::Unknown {
            if self.requires_agents {
                self.intent_type = IntentType::DocumentQuery;
                self.confidence = 0.5;
            } else {
                self.confidence = 1.0;
            }
        }
        self
    }
}

#[derive(Deserialize)]
struct IntentWire {
    #[serde(rename = "type", default)]
    intent_type: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    agent: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    entities: serde_json::Value,
    #[serde(default)]
    requires_decomposition: bool,
    #[serde(default = "default_requires_agents")]
    requires_agents: bool,
}

/// Parses the model's intent JSON.
///
/// # Errors
///
/// Returns [`LlmError::ResponseParse`] only when no JSON object can be
/// located at all; unknown enum values degrade to defaults.
pub fn parse_intent(content: &str) -> Result<Intent, LlmError> {
    let json = extract_json_object(content).ok_or_else(|| LlmError::ResponseParse {
        message: "no JSON object in intent response".to_string(),
        content: content.to_string(),
    })?;
    let wire: IntentWire = serde_json::from_str(json).map_err(|e| LlmError::ResponseParse {
        message: format!("invalid intent JSON: {e}"),
        content: content.to_string(),
    })?;

    Ok(Intent {
        intent_type: IntentType::parse(&wire.intent_type),
        confidence: wire.confidence.clamp(0.0, 1.0),
        agent: AgentTarget::parse(&wire.agent),
        reasoning: if wire.reasoning.is_empty() {
            "No reasoning provided".to_string()
        } else {
            wire.reasoning
        },
        entities: wire.entities,
        requires_decomposition: wire.requires_decomposition,
        requires_agents: wire.requires_agents,
    })
}
