//! Board visualization agent.
//!
//! Loads the workspace's tasks through a fixed parametrized query,
//! has the model produce either a Kanban board (strict JSON) or a
//! Mermaid diagram (JSON envelope), renders Markdown, and summarizes
//! the result.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::agents::prompts::{
    BOARD_AGENT_SYSTEM_PROMPT, build_board_summary_prompt, build_kanban_prompt,
    build_mermaid_prompt, error_messages,
};
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeFuture, Target, hrtb_node};
use crate::llm::{extract_json_object, system_message, user_message, LlmHandle};
use crate::storage::SqlExecutor;

/// Fixed query joining tasks with users for a workspace.
const TASK_JOIN_SQL: &str = "SELECT t.id, t.title, t.status, t.priority, u.name AS assignee, t.due_date
 FROM tasks t LEFT JOIN users u ON u.id = t.assignee_id
 WHERE t.workspace_id = :workspace_id
 ORDER BY t.created_at";

/// Upper bound on tasks loaded for one visualization.
const TASK_LOAD_LIMIT: usize = 1_000;
/// Timeout for the task load query.
const TASK_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Supported chart types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    /// Status-column board.
    Kanban,
    /// Timeline bars by date.
    Gantt,
    /// Dependency flowchart.
    Flowchart,
    /// Sequence diagram.
    Sequence,
    /// State diagram.
    State,
    /// Date-ordered timeline.
    Timeline,
}

impl ChartType {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kanban => "kanban",
            Self::Gantt => "gantt",
            Self::Flowchart => "flowchart",
            Self::Sequence => "sequence",
            Self::State => "state",
            Self::Timeline => "timeline",
        }
    }

    /// Infers the chart type from query keywords. Kanban is the
    /// default.
    #[must_use]
    pub fn detect(query: &str) -> Self {
        let query = query.to_lowercase();
        if query.contains("gantt") {
            Self::Gantt
        } else if query.contains("flowchart") || query.contains("flow chart") || query.contains("dependency")
        {
            Self::Flowchart
        } else if query.contains("sequence") {
            Self::Sequence
        } else if query.contains("state diagram") || query.contains("state chart") {
            Self::State
        } else if query.contains("timeline") {
            Self::Timeline
        } else {
            Self::Kanban
        }
    }

    /// Whether this chart needs task dates to be meaningful.
    #[must_use]
    pub const fn needs_dates(self) -> bool {
        matches!(self, Self::Gantt | Self::Timeline)
    }
}

impl std::str::FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kanban" => Ok(Self::Kanban),
            "gantt" => Ok(Self::Gantt),
            "flowchart" => Ok(Self::Flowchart),
            "sequence" => Ok(Self::Sequence),
            "state" => Ok(Self::State),
            "timeline" => Ok(Self::Timeline),
            other => Err(format!("unknown chart type: {other}")),
        }
    }
}

/// Case-insensitive in-memory task filters.
#[derive(Debug, Clone, Default)]
pub struct BoardFilters {
    /// Keep only tasks with this status.
    pub status: Option<String>,
    /// Keep only tasks assigned to this user.
    pub assignee: Option<String>,
    /// Keep only tasks with this priority.
    pub priority: Option<String>,
}

impl BoardFilters {
    fn matches(&self, task: &TaskRecord) -> bool {
        let eq = |filter: &Option<String>, value: Option<&str>| {
            filter.as_ref().is_none_or(|f| {
                value.is_some_and(|v| v.eq_ignore_ascii_case(f))
            })
        };
        eq(&self.status, Some(&task.status))
            && eq(&self.priority, Some(&task.priority))
            && eq(&self.assignee, task.assignee.as_deref())
    }
}

/// A task row loaded for visualization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task identifier.
    pub id: String,
    /// Task title.
    pub title: String,
    /// Status value.
    pub status: String,
    /// Priority value.
    pub priority: String,
    /// Assignee display name.
    pub assignee: Option<String>,
    /// Due date (ISO), when set.
    pub due_date: Option<String>,
}

/// A parsed Kanban board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KanbanBoard {
    /// Board title.
    #[serde(default)]
    pub title: String,
    /// Columns in display order.
    pub columns: Vec<KanbanColumn>,
}

/// One Kanban column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KanbanColumn {
    /// Column name.
    pub name: String,
    /// Status the column groups.
    #[serde(default)]
    pub status: String,
    /// Tasks in the column.
    #[serde(default)]
    pub tasks: Vec<KanbanTask>,
}

/// One Kanban card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KanbanTask {
    /// Card title.
    pub title: String,
    /// Priority value.
    #[serde(default = "default_priority")]
    pub priority: String,
    /// Assignee display name.
    #[serde(default)]
    pub assignee: Option<String>,
}

fn default_priority() -> String {
    "medium".to_string()
}

/// A Mermaid chart envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MermaidChart {
    /// Chart type echoed by the model.
    #[serde(default)]
    pub chart_type: String,
    /// Chart title.
    #[serde(default)]
    pub title: String,
    /// Mermaid.js source.
    pub mermaid_code: String,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Final output of a visualization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardOutput {
    /// Chart type that was rendered.
    pub chart_type: ChartType,
    /// Rendered Markdown.
    pub markdown_output: String,
    /// Short model-written summary.
    pub summary: String,
    /// Tasks included after filtering.
    pub task_count: usize,
    /// The parsed visualization payload.
    pub visualization: serde_json::Value,
    /// Error captured along the way.
    pub error: Option<String>,
}

/// Workflow state for the board graph.
#[derive(Debug, Default)]
pub struct BoardState {
    /// Workspace scope.
    pub workspace_id: String,
    /// User request.
    pub query: String,
    /// Chart type to render.
    pub chart_type: Option<ChartType>,
    /// In-memory filters.
    pub filters: BoardFilters,
    /// Loaded (and filtered) tasks.
    pub tasks: Vec<TaskRecord>,
    /// Parsed visualization payload.
    pub visualization: serde_json::Value,
    /// Rendered Markdown.
    pub markdown_output: String,
    /// Short summary.
    pub summary: String,
    /// Error captured along the way.
    pub error: Option<String>,
}

/// Priority emoji used in Kanban rendering.
#[must_use]
pub fn priority_emoji(priority: &str) -> &'static str {
    match priority.to_lowercase().as_str() {
        "critical" => "🔴",
        "high" => "🟠",
        "low" => "🟢",
        _ => "🟡",
    }
}

/// Task board visualization.
pub struct BoardAgent {
    llm: LlmHandle,
    executor: Arc<dyn SqlExecutor>,
}

impl std::fmt::Debug for BoardAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardAgent").field("llm", &self.llm).finish()
    }
}

impl BoardAgent {
    /// Creates a board agent over the given executor.
    #[must_use]
    pub fn new(llm: LlmHandle, executor: Arc<dyn SqlExecutor>) -> Self {
        Self { llm, executor }
    }

    /// Generates a visualization for the workspace's tasks.
    #[instrument(skip(self, query), fields(workspace = workspace_id))]
    pub async fn visualize(
        &self,
        workspace_id: &str,
        query: &str,
        chart_type: Option<ChartType>,
        filters: BoardFilters,
    ) -> Result<BoardOutput> {
        let mut state = BoardState {
            workspace_id: workspace_id.to_string(),
            query: query.to_string(),
            chart_type,
            filters,
            ..BoardState::default()
        };
        let graph = self.build_graph()?;
        graph.invoke(&mut state).await.map_err(Error::Agent)?;

        let chart_type = state.chart_type.unwrap_or_else(|| ChartType::detect(query));
        Ok(BoardOutput {
            chart_type,
            markdown_output: state.markdown_output,
            summary: state.summary,
            task_count: state.tasks.len(),
            visualization: state.visualization,
            error: state.error,
        })
    }

    /// Exports the workspace's tasks as CSV. Offered by the HITL layer
    /// as a lightweight alternative to oversized visualizations.
    pub fn export_csv(&self, workspace_id: &str) -> Result<String> {
        let output = self.executor.execute(
            TASK_JOIN_SQL,
            &[(":workspace_id", workspace_id)],
            TASK_LOAD_LIMIT,
            TASK_LOAD_TIMEOUT,
            true,
        )?;
        let mut csv = String::from("id,title,status,priority,assignee,due_date\n");
        for row in &output.rows {
            let field = |key: &str| {
                let value = row
                    .get(key)
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("");
                if value.contains(',') || value.contains('"') {
                    format!("\"{}\"", value.replace('"', "\"\""))
                } else {
                    value.to_string()
                }
            };
            csv.push_str(&format!(
                "{},{},{},{},{},{}\n",
                field("id"),
                field("title"),
                field("status"),
                field("priority"),
                field("assignee"),
                field("due_date"),
            ));
        }
        Ok(csv)
    }

    /// Counts the tasks a visualization would touch and resolves the
    /// chart type, without generating anything. Used by the HITL layer.
    pub fn preflight(&self, workspace_id: &str, query: &str) -> Result<(usize, ChartType)> {
        let output = self.executor.execute(
            "SELECT COUNT(*) AS task_count FROM tasks WHERE workspace_id = :workspace_id",
            &[(":workspace_id", workspace_id)],
            1,
            TASK_LOAD_TIMEOUT,
            true,
        )?;
        let count = output
            .rows
            .first()
            .and_then(|row| row.get("task_count"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        Ok((usize::try_from(count).unwrap_or(0), ChartType::detect(query)))
    }

    fn build_graph(&self) -> Result<Graph<BoardState>> {
        let load_tasks = {
            let executor = Arc::clone(&self.executor);
            hrtb_node(move |state: &mut BoardState| -> NodeFuture<'_> {
                let executor = Arc::clone(&executor);
                Box::pin(async move {
                    if state.chart_type.is_none() {
                        state.chart_type = Some(ChartType::detect(&state.query));
                    }
                    match executor.execute(
                        TASK_JOIN_SQL,
                        &[(":workspace_id", state.workspace_id.as_str())],
                        TASK_LOAD_LIMIT,
                        TASK_LOAD_TIMEOUT,
                        true,
                    ) {
                        Ok(output) => {
                            let tasks: Vec<TaskRecord> = output
                                .rows
                                .into_iter()
                                .filter_map(|row| serde_json::from_value(row).ok())
                                .filter(|task| state.filters.matches(task))
                                .collect();
                            debug!(count = tasks.len(), "tasks loaded");
                            state.tasks = tasks;
                        }
                        Err(e) => state.error = Some(format!("failed to load tasks: {e}")),
                    }
                    Ok(())
                })
            })
        };

        let generate_visualization = {
            let llm = self.llm.clone();
            hrtb_node(move |state: &mut BoardState| -> NodeFuture<'_> {
                let llm = llm.clone();
                Box::pin(async move {
                    let chart_type = state.chart_type.unwrap_or(ChartType::Kanban);
                    if chart_type.needs_dates() && !state.tasks.iter().any(|t| t.due_date.is_some())
                    {
                        state.error = Some(error_messages::NO_TIMELINE_DATES.to_string());
                        return Ok(());
                    }

                    let prompt = match chart_type {
                        ChartType::Kanban => build_kanban_prompt(&state.query, &state.tasks),
                        other => build_mermaid_prompt(other.as_str(), &state.query, &state.tasks),
                    };
                    let response = llm
                        .generate(
                            vec![
                                system_message(BOARD_AGENT_SYSTEM_PROMPT),
                                user_message(&prompt),
                            ],
                            true,
                        )
                        .await;
                    let content = match response {
                        Ok(response) => response.content,
                        Err(e) => {
                            state.error = Some(format!("visualization generation failed: {e}"));
                            return Ok(());
                        }
                    };

                    match chart_type {
                        ChartType::Kanban => match parse_kanban(&content) {
                            Ok(board) => {
                                state.visualization =
                                    serde_json::to_value(&board).unwrap_or_default();
                            }
                            Err(e) => state.error = Some(e),
                        },
                        _ => match parse_mermaid(&content) {
                            Ok(chart) => {
                                state.visualization =
                                    serde_json::to_value(&chart).unwrap_or_default();
                            }
                            Err(e) => state.error = Some(e),
                        },
                    }
                    Ok(())
                })
            })
        };

        let format_output = hrtb_node(move |state: &mut BoardState| -> NodeFuture<'_> {
            Box::pin(async move {
                let chart_type = state.chart_type.unwrap_or(ChartType::Kanban);
                state.markdown_output = match chart_type {
                    ChartType::Kanban => {
                        match serde_json::from_value::<KanbanBoard>(state.visualization.clone()) {
                            Ok(board) => format_kanban_markdown(&board),
                            Err(e) => {
                                state.error = Some(format!("kanban payload invalid: {e}"));
                                String::new()
                            }
                        }
                    }
                    _ => {
                        match serde_json::from_value::<MermaidChart>(state.visualization.clone()) {
                            Ok(chart) => {
                                let title = if chart.title.is_empty() {
                                    "Visualization".to_string()
                                } else {
                                    chart.title
                                };
                                format!("# {title}\n\n```mermaid\n{}\n```\n", chart.mermaid_code)
                            }
                            Err(e) => {
                                state.error = Some(format!("mermaid payload invalid: {e}"));
                                String::new()
                            }
                        }
                    }
                };
                Ok(())
            })
        });

        let create_summary = {
            let llm = self.llm.clone();
            hrtb_node(move |state: &mut BoardState| -> NodeFuture<'_> {
                let llm = llm.clone();
                Box::pin(async move {
                    let prompt = build_board_summary_prompt(&state.query, &state.markdown_output);
                    match llm.generate_simple(None, &prompt).await {
                        Ok(summary) if !summary.trim().is_empty() => {
                            state.summary = summary.trim().to_string();
                        }
                        _ => {
                            state.summary =
                                format!("Visualization generated with {} tasks", state.tasks.len());
                        }
                    }
                    Ok(())
                })
            })
        };

        let error_node = hrtb_node(move |state: &mut BoardState| -> NodeFuture<'_> {
            Box::pin(async move {
                let message = state
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string());
                warn!(error = %message, "board workflow failed");
                if state.tasks.is_empty() && state.markdown_output.is_empty() {
                    state.markdown_output = error_messages::NO_TASKS_FOUND.to_string();
                }
                state.summary = message;
                Ok(())
            })
        });

        Graph::builder("load_tasks")
            .node("load_tasks", load_tasks)
            .node("generate_visualization", generate_visualization)
            .node("format_output", format_output)
            .node("create_summary", create_summary)
            .node("error", error_node)
            .branch(
                "load_tasks",
                |state: &BoardState| {
                    if state.error.is_some() || state.tasks.is_empty() {
                        "error"
                    } else {
                        "ok"
                    }
                },
                &[
                    ("error", Target::Node("error")),
                    ("ok", Target::Node("generate_visualization")),
                ],
            )
            .branch(
                "generate_visualization",
                |state: &BoardState| if state.error.is_some() { "error" } else { "ok" },
                &[
                    ("error", Target::Node("error")),
                    ("ok", Target::Node("format_output")),
                ],
            )
            .branch(
                "format_output",
                |state: &BoardState| if state.error.is_some() { "error" } else { "ok" },
                &[
                    ("error", Target::Node("error")),
                    ("ok", Target::Node("create_summary")),
                ],
            )
            .terminal("create_summary")
            .terminal("error")
            .build()
            .map_err(Error::Agent)
    }
}

/// Parses a Kanban board from model output (strict after JSON
/// extraction).
fn parse_kanban(content: &str) -> std::result::Result<KanbanBoard, String> {
    let json = extract_json_object(content).ok_or("no JSON object in kanban response")?;
    let board: KanbanBoard =
        serde_json::from_str(json).map_err(|e| format!("invalid kanban JSON: {e}"))?;
    if board.columns.is_empty() {
        return Err("kanban board has no columns".to_string());
    }
    Ok(board)
}

/// Parses a Mermaid chart envelope from model output.
fn parse_mermaid(content: &str) -> std::result::Result<MermaidChart, String> {
    let json = extract_json_object(content).ok_or("no JSON object in chart response")?;
    let chart: MermaidChart =
        serde_json::from_str(json).map_err(|e| format!("invalid chart JSON: {e}"))?;
    if chart.mermaid_code.trim().is_empty() {
        return Err("chart has empty mermaid_code".to_string());
    }
    Ok(chart)
}

/// Renders a Kanban board to Markdown with per-column statistics and
/// priority emoji.
#[must_use]
pub fn format_kanban_markdown(board: &KanbanBoard) -> String {
    use std::fmt::Write;

    let title = if board.title.is_empty() {
        "Kanban Board"
    } else {
        &board.title
    };
    let total: usize = board.columns.iter().map(|c| c.tasks.len()).sum();

    let mut markdown = format!("# {title}\n\n**Total tasks:** {total}\n\n");
    for column in &board.columns {
        let _ = write!(markdown, "## {} ({})\n\n", column.name, column.tasks.len());
        if column.tasks.is_empty() {
            markdown.push_str("_empty_\n\n");
            continue;
        }
        for task in &column.tasks {
            let emoji = priority_emoji(&task.priority);
            match &task.assignee {
                Some(assignee) => {
                    let _ = writeln!(markdown, "- {emoji} {} — {assignee}", task.title);
                }
                None => {
                    let _ = writeln!(markdown, "- {emoji} {}", task.title);
                }
            }
        }
        markdown.push('\n');
    }
    markdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Generate Gantt for all tasks", ChartType::Gantt)]
    #[test_case("show me a kanban board", ChartType::Kanban)]
    #[test_case("draw the dependency flowchart", ChartType::Flowchart)]
    #[test_case("timeline of this sprint", ChartType::Timeline)]
    #[test_case("what's on the board", ChartType::Kanban)]
    fn test_chart_type_detection(query: &str, expected: ChartType) {
        assert_eq!(ChartType::detect(query), expected);
    }

    #[test]
    fn test_chart_type_from_str() {
        assert_eq!("gantt".parse::<ChartType>(), Ok(ChartType::Gantt));
        assert!("pie".parse::<ChartType>().is_err());
    }

    #[test_case("critical", "🔴")]
    #[test_case("high", "🟠")]
    #[test_case("medium", "🟡")]
    #[test_case("low", "🟢")]
    #[test_case("unknown", "🟡")]
    fn test_priority_emoji(priority: &str, expected: &str) {
        assert_eq!(priority_emoji(priority), expected);
    }

    #[test]
    fn test_parse_kanban_with_fence() {
        let content = r#"```json
{"title": "Sprint", "columns": [{"name": "Todo", "status": "todo", "tasks": [{"title": "Fix bug", "priority": "high"}]}]}
```"#;
        let Ok(board) = parse_kanban(content) else {
            unreachable!("kanban should parse")
        };
        assert_eq!(board.title, "Sprint");
        assert_eq!(board.columns.len(), 1);
        assert_eq!(board.columns[0].tasks[0].priority, "high");
    }

    #[test]
    fn test_parse_kanban_rejects_empty_columns() {
        let content = r#"{"title": "Empty", "columns": []}"#;
        assert!(parse_kanban(content).is_err());
    }

    #[test]
    fn test_parse_mermaid_requires_code() {
        let good = r#"{"chart_type": "gantt", "title": "T", "mermaid_code": "gantt\n  title T", "metadata": {}}"#;
        assert!(parse_mermaid(good).is_ok());
        let bad = r#"{"chart_type": "gantt", "title": "T", "mermaid_code": "", "metadata": {}}"#;
        assert!(parse_mermaid(bad).is_err());
    }

    #[test]
    fn test_format_kanban_markdown() {
        let board = KanbanBoard {
            title: "Sprint 7".to_string(),
            columns: vec![
                KanbanColumn {
                    name: "In Progress".to_string(),
                    status: "in_progress".to_string(),
                    tasks: vec![KanbanTask {
                        title: "Ship retrieval".to_string(),
                        priority: "critical".to_string(),
                        assignee: Some("Ada".to_string()),
                    }],
                },
                KanbanColumn {
                    name: "Done".to_string(),
                    status: "done".to_string(),
                    tasks: vec![],
                },
            ],
        };
        let markdown = format_kanban_markdown(&board);
        assert!(markdown.contains("# Sprint 7"));
        assert!(markdown.contains("**Total tasks:** 1"));
        assert!(markdown.contains("## In Progress (1)"));
        assert!(markdown.contains("🔴 Ship retrieval — Ada"));
        assert!(markdown.contains("_empty_"));
    }

    #[test]
    fn test_filters_case_insensitive() {
        let task = TaskRecord {
            id: "t1".to_string(),
            title: "x".to_string(),
            status: "In_Progress".to_string(),
            priority: "HIGH".to_string(),
            assignee: Some("Ada".to_string()),
            due_date: None,
        };
        let filters = BoardFilters {
            status: Some("in_progress".to_string()),
            assignee: Some("ada".to_string()),
            priority: Some("high".to_string()),
        };
        assert!(filters.matches(&task));
        let wrong = BoardFilters {
            status: Some("done".to_string()),
            ..BoardFilters::default()
        };
        assert!(!wrong.matches(&task));
    }

    #[test]
    fn test_filter_on_missing_assignee() {
        let task = TaskRecord {
            id: "t1".to_string(),
            title: "x".to_string(),
            status: "todo".to_string(),
            priority: "low".to_string(),
            assignee: None,
            due_date: None,
        };
        let filters = BoardFilters {
            assignee: Some("ada".to_string()),
            ..BoardFilters::default()
        };
        assert!(!filters.matches(&task));
    }
}
