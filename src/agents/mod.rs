//! Specialized agents over the graph runtime.
//!
//! Three deterministic workflows share the execution model in
//! [`crate::graph`]:
//!
//! ```text
//! DocumentAgent   reformulate → retrieve → memory → rerank → generate
//!                 (fallback path for empty or low-relevance retrieval)
//! TaskAgent       load_schema → generate_sql → execute_sql → analyze
//!                 (read-only SQL policy, row cap, wall-clock timeout)
//! BoardAgent      load_tasks → generate_visualization → format → summary
//! ```

pub mod board;
pub mod document;
pub mod prompts;
pub mod task;

pub use board::{
    BoardAgent, BoardFilters, BoardOutput, ChartType, KanbanBoard, KanbanColumn, KanbanTask,
    MermaidChart, TaskRecord, format_kanban_markdown, priority_emoji,
};
pub use document::{Citation, DocumentAgent, DocumentAnswer, DocumentQaState, extract_citations};
pub use task::{TaskAgent, TaskAnalysis, TaskState, extract_sql, validate_sql};
