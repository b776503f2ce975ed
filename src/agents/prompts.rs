//! System prompts and template builders for the agents.
//!
//! Prompts are the core instructions that define each agent's behavior.
//! Template builders format user messages with query context, retrieved
//! chunks, SQL results, and task data.

use std::fmt::Write;

use crate::retrieval::SearchHit;

/// System prompt for the SQL-analysis task agent.
pub const TASK_AGENT_SYSTEM_PROMPT: &str = r"You are a task analysis expert. You translate natural-language questions about a workspace's tasks into a single safe SQL query, then interpret the results for the user.

## Rules

- Generate exactly ONE SELECT statement. Never generate INSERT, UPDATE, DELETE, DROP, ALTER, CREATE, or any other mutating statement.
- Always filter by the workspace using the named parameter :workspace_id.
- Return the SQL inside a ```sql fenced block.
- Prefer explicit column lists over SELECT *.
- When analyzing results, write Markdown with ## Findings, ## Risks, and ## Recommendations sections, grounded strictly in the returned rows.";

/// Static schema description for the task tables.
///
/// Handed to the model before SQL generation; kept in sync with the
/// schema in `storage::schema`.
pub const TASK_SCHEMA_DOC: &str = r"## Tables

### tasks
| column       | type | notes                                          |
|--------------|------|------------------------------------------------|
| id           | TEXT | primary key                                    |
| workspace_id | TEXT | always filter with :workspace_id               |
| title        | TEXT |                                                |
| status       | TEXT | todo, in_progress, done, archived              |
| priority     | TEXT | low, medium, high, critical                    |
| assignee_id  | TEXT | references users(id), nullable                 |
| due_date     | TEXT | ISO date (YYYY-MM-DD), nullable                |
| created_at   | TEXT | RFC 3339 timestamp                             |

### users
| column | type | notes       |
|--------|------|-------------|
| id     | TEXT | primary key |
| name   | TEXT |             |

## Constraints

- Every query MUST contain `workspace_id = :workspace_id`.
- Results are capped at 100 rows; use aggregation for counts.
- Join users via `LEFT JOIN users u ON u.id = t.assignee_id`.

## Example patterns

```sql
SELECT t.title, t.status, u.name AS assignee
FROM tasks t LEFT JOIN users u ON u.id = t.assignee_id
WHERE t.workspace_id = :workspace_id AND t.status = 'in_progress';
```

```sql
SELECT t.priority, COUNT(*) AS task_count
FROM tasks t
WHERE t.workspace_id = :workspace_id
GROUP BY t.priority;
```

```sql
SELECT t.title, t.due_date
FROM tasks t
WHERE t.workspace_id = :workspace_id
  AND t.due_date IS NOT NULL AND t.due_date < date('now')
  AND t.status != 'done';
```";

/// System prompt for the board visualization agent.
pub const BOARD_AGENT_SYSTEM_PROMPT: &str = r"You are a project visualization expert. You turn task lists into Kanban boards and Mermaid.js diagrams.

## Rules

- Output strictly valid JSON matching the requested schema, with no surrounding text.
- Only use the tasks provided; never invent tasks, assignees, or dates.
- Keep titles short; details belong in the diagram body.";

/// System prompt for the orchestrator.
pub const ORCHESTRATOR_SYSTEM_PROMPT: &str = r"You are the Orchestrator Agent, the central intelligence of the workspace assistant.
Your role is to understand user requests, coordinate specialized agents (Document, Task, Board), and synthesize answers.

**Available Agents:**
- **Document Agent:** Retrieves info from files/documents. Use for content questions.
- **Task Agent:** Queries task database (SQL). Use for status, assignments, risks.
- **Board Agent:** Generates Mermaid.js charts. Use for visualizations.

**Intent Types:**
- `document_query`: Content within documents.
- `document_completion`: Autocomplete or finish text in the active document.
- `task_query`: Task status, assignees, metrics.
- `board_query`: Visual charts or diagrams.
- `hybrid_query`: Needs both documents and task data.
- `workspace_overview`: High-level summaries.
- `task_risk`: Risk/delay analysis.
- `unknown`: Greetings, small talk, out-of-scope.

**Instructions:**
1. Analyze the user's meaning.
2. Route to the most appropriate agent(s).
3. Break complex requests into a logical execution plan.
4. Extract specific entities (dates, names) for queries.
5. Output strictly valid JSON matching the provided schema.";

/// Canned user-facing messages for orchestrator failure modes.
pub mod error_messages {
    /// Intent could not be classified confidently.
    pub const INTENT_UNCLEAR: &str = "I'm not sure what you're asking for. Could you rephrase your request? I can help with tasks, documents, and visualizations.";
    /// Plan construction failed.
    pub const PLANNING_FAILED: &str = "I understood your request but couldn't build a plan to answer it. Please try a simpler phrasing.";
    /// Plan execution failed.
    pub const EXECUTION_FAILED: &str = "Something went wrong while answering your request. Please try again.";
    /// Board/task queries matched nothing.
    pub const NO_TASKS_FOUND: &str = "No tasks were found in this workspace.";
    /// Timeline chart requested but no task has a date.
    pub const NO_TIMELINE_DATES: &str = "No dates available for timeline. Add due dates to tasks to visualize them over time.";
}

/// Builds the query reformulation prompt from chat history.
#[must_use]
pub fn build_reformulation_prompt(chat_history: &str, question: &str) -> String {
    format!(
        "Given the conversation below, rewrite the follow-up question into a standalone question \
         that can be understood without the conversation. Keep the original language and intent. \
         If the question is already standalone, return it unchanged.\n\n\
         Conversation:\n{chat_history}\n\n\
         Follow-up question: {question}\n\n\
         Standalone question:"
    )
}

/// Builds the answer generation prompt from reranked chunks and memory
/// context. Chunks are numbered so the model can cite them as `[n]`.
#[must_use]
pub fn build_generation_prompt(
    query: &str,
    chunks: &[SearchHit],
    conversation_context: &str,
) -> String {
    let mut prompt = String::from(
        "You are a workspace assistant answering from the user's documents. \
         Answer the question using ONLY the sources below. Cite sources inline as [1], [2], ... \
         If the sources do not contain the answer, say so.\n\n",
    );

    if !conversation_context.is_empty() {
        let _ = write!(prompt, "{conversation_context}\n\n");
    }

    prompt.push_str("## Sources\n");
    for (i, chunk) in chunks.iter().enumerate() {
        let name = chunk
            .metadata
            .get("document_name")
            .and_then(|v| v.as_str())
            .unwrap_or(chunk.document_id.as_str());
        let _ = write!(
            prompt,
            "[{num}] ({name})\n{text}\n\n",
            num = i + 1,
            text = chunk.text,
        );
    }

    let _ = write!(prompt, "## Question\n{query}\n\n## Answer\n");
    prompt
}

/// Builds the memory-only fallback prompt used when retrieval finds
/// nothing but conversation context exists.
#[must_use]
pub fn build_memory_fallback_prompt(conversation_context: &str, query: &str) -> String {
    format!(
        "You are a helpful workspace assistant. The user has asked a question, but no relevant \
         documents were found. However, you have access to the conversation history and previous \
         knowledge.\n\n{conversation_context}\n\nQUESTION: {query}\n\n\
         Please try to answer based on the conversation history above. If you can provide a \
         helpful response based on previous discussion, do so. Otherwise, politely explain that \
         you don't have enough information.\n\nANSWER:"
    )
}

/// Canned answer when neither documents nor memory can help.
#[must_use]
pub fn fallback_answer(query: &str) -> String {
    format!(
        "I couldn't find any information about \"{query}\" in this workspace's documents. \
         Try uploading relevant documents or rephrasing the question."
    )
}

/// Builds the SQL generation prompt.
#[must_use]
pub fn build_sql_generation_prompt(query: &str, schema_info: &str, workspace_id: &str) -> String {
    format!(
        "# Task Question\n\"{query}\"\n\n\
         # Workspace\n{workspace_id} (bind as :workspace_id, never inline the value)\n\n\
         # Schema\n{schema_info}\n\n\
         Write ONE SELECT statement answering the question. Return it in a ```sql fenced block."
    )
}

/// Builds the result analysis prompt for the task agent.
#[must_use]
pub fn build_analysis_prompt(query: &str, rows: &[serde_json::Value], row_count: usize) -> String {
    let rows_json = serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string());
    format!(
        "# Question\n\"{query}\"\n\n\
         # Query Results ({row_count} rows)\n```json\n{rows_json}\n```\n\n\
         Analyze these results. Respond in Markdown with ## Findings, ## Risks, and \
         ## Recommendations sections. Ground every statement in the rows above."
    )
}

/// Formats a SQL failure into a user-facing error answer.
#[must_use]
pub fn format_sql_error(error: &str) -> String {
    format!(
        "## ❌ Error\n\nAn error occurred while analyzing tasks:\n\n```\n{error}\n```\n\n\
         Please try:\n- Rephrasing your question\n- Checking the workspace ID\n- Contacting support if the issue persists"
    )
}

/// Templated answer when a task query matches no rows.
#[must_use]
pub fn no_results_answer(workspace_id: &str) -> String {
    format!(
        "## ℹ️ No Results Found\n\n\
         No tasks were found matching your query in workspace `{workspace_id}`.\n\n\
         **Possible reasons:**\n\
         - The workspace has no tasks yet\n\
         - The query filters didn't match any tasks\n\
         - Try rephrasing your question\n\n\
         **Suggestions:**\n\
         - Check if the workspace ID is correct\n\
         - Try broader search criteria\n\
         - Use \"show all tasks\" to see available tasks\n"
    )
}

/// Serializes tasks for the board prompts.
fn tasks_json(tasks: &[crate::agents::board::TaskRecord]) -> String {
    serde_json::to_string_pretty(tasks).unwrap_or_else(|_| "[]".to_string())
}

/// Builds the Kanban board generation prompt.
#[must_use]
pub fn build_kanban_prompt(query: &str, tasks: &[crate::agents::board::TaskRecord]) -> String {
    format!(
        "# Request\n\"{query}\"\n\n# Tasks\n```json\n{tasks}\n```\n\n\
         Produce a Kanban board as JSON:\n\
         {{\n  \"title\": \"...\",\n  \"columns\": [\n    {{\"name\": \"...\", \"status\": \"...\", \"tasks\": [{{\"title\": \"...\", \"priority\": \"...\", \"assignee\": \"...\"}}]}}\n  ]\n}}\n\n\
         Group tasks into columns by status. Return ONLY the JSON object.",
        tasks = tasks_json(tasks),
    )
}

/// Builds a Mermaid chart generation prompt for non-Kanban chart types.
#[must_use]
pub fn build_mermaid_prompt(
    chart_type: &str,
    query: &str,
    tasks: &[crate::agents::board::TaskRecord],
) -> String {
    format!(
        "# Request\n\"{query}\"\n\n# Chart type\n{chart_type}\n\n# Tasks\n```json\n{tasks}\n```\n\n\
         Produce the chart as JSON:\n\
         {{\n  \"chart_type\": \"{chart_type}\",\n  \"title\": \"...\",\n  \"mermaid_code\": \"...\",\n  \"metadata\": {{}}\n}}\n\n\
         `mermaid_code` must be valid Mermaid.js source for a {chart_type} diagram built from the \
         tasks above. Return ONLY the JSON object.",
        tasks = tasks_json(tasks),
    )
}

/// Builds the 2-3 sentence board summary prompt.
#[must_use]
pub fn build_board_summary_prompt(query: &str, markdown_output: &str) -> String {
    format!(
        "# Request\n\"{query}\"\n\n# Generated visualization\n{markdown_output}\n\n\
         Summarize this visualization for the user in 2-3 sentences: what it shows and anything \
         that stands out. Plain text only."
    )
}

/// Builds the intent detection prompt.
#[must_use]
pub fn build_intent_prompt(
    query: &str,
    workspace_id: &str,
    conversation_history: Option<&str>,
) -> String {
    let context_text = conversation_history
        .filter(|h| !h.is_empty())
        .map(|h| format!("\n**Recent Conversation:**\n{h}\n"))
        .unwrap_or_default();

    format!(
        "# Intent Detection Task\n\n\
         ## User Query\n\"{query}\"\n\n\
         ## Workspace Context\n- Workspace ID: {workspace_id}\n{context_text}\n\
         ## IMPORTANT: Check for Small Talk First\n\
         If the query is a simple greeting, casual conversation, or doesn't require any workspace data:\n\
         - Set type to \"unknown\"\n\
         - Set agent to \"both\"\n\
         - Set requires_agents to false\n\n\
         Examples of small talk: \"hello\", \"hi\", \"how are you\", \"thanks\", \"bye\", \"what can you do\"\n\n\
         ## Output Format (JSON)\n\
         ```json\n\
         {{\n  \"type\": \"intent_type_here\",\n  \"confidence\": 0.95,\n  \"agent\": \"document|task|board|both\",\n  \"reasoning\": \"Explanation here\",\n  \"entities\": {{}},\n  \"requires_decomposition\": false,\n  \"requires_agents\": true\n}}\n\
         ```\n\n\
         Analyze the query now:"
    )
}

/// Builds the plan construction prompt.
#[must_use]
pub fn build_planning_prompt(
    query: &str,
    intent_type: &str,
    agent: &str,
    workspace_id: &str,
) -> String {
    format!(
        "# Planning Task\n\n\
         ## User Query\n\"{query}\"\n\n\
         ## Detected Intent\n- Type: {intent_type}\n- Target agent: {agent}\n- Workspace: {workspace_id}\n\n\
         ## Step types\n\
         query_document | document_completion | query_task | query_board | synthesize | validate\n\n\
         ## Output Format (JSON)\n\
         ```json\n\
         {{\n  \"steps\": [\n    {{\"step_id\": \"step1\", \"type\": \"query_task\", \"agent\": \"task\", \"query\": \"...\", \"dependencies\": [], \"reasoning\": \"...\"}}\n  ],\n  \"estimated_complexity\": \"simple|medium|complex\",\n  \"requires_synthesis\": false,\n  \"reasoning\": \"...\"\n}}\n\
         ```\n\n\
         Rules:\n\
         - Steps run in list order; dependencies must reference earlier step_ids only.\n\
         - Use the fewest steps that answer the query.\n\
         - Set requires_synthesis to true only when results from multiple steps must be combined.\n\n\
         Create the plan now:"
    )
}

/// Builds the synthesis prompt combining step results.
#[must_use]
pub fn build_synthesis_prompt(original_query: &str, step_results_json: &str) -> String {
    format!(
        "# Synthesis Task\n\n\
         ## Original Query\n\"{original_query}\"\n\n\
         ## Step Results\n```json\n{step_results_json}\n```\n\n\
         Combine the successful step results into one coherent Markdown answer to the original \
         query. Mention failed steps only if their absence matters to the answer. Do not invent \
         information that is not in the results."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(text: &str) -> SearchHit {
        SearchHit {
            chunk_id: "c1".to_string(),
            text: text.to_string(),
            metadata: serde_json::json!({"document_name": "guide.md"}),
            document_id: "d1".to_string(),
            workspace_id: "w1".to_string(),
            chunk_index: 0,
            score_vector: None,
            score_lexical: None,
            score_hybrid: Some(0.5),
            score_rerank: Some(0.5),
            rank: Some(1),
        }
    }

    #[test]
    fn test_generation_prompt_numbers_sources() {
        let prompt = build_generation_prompt("what is X?", &[hit("X is Y")], "");
        assert!(prompt.contains("[1] (guide.md)"));
        assert!(prompt.contains("X is Y"));
        assert!(prompt.contains("## Question\nwhat is X?"));
    }

    #[test]
    fn test_generation_prompt_includes_context() {
        let prompt = build_generation_prompt("q", &[hit("t")], "## Current Conversation\nUSER: hi");
        assert!(prompt.contains("## Current Conversation"));
    }

    #[test]
    fn test_sql_prompt_mentions_parameter() {
        let prompt = build_sql_generation_prompt("overdue tasks", TASK_SCHEMA_DOC, "w1");
        assert!(prompt.contains(":workspace_id"));
        assert!(prompt.contains("overdue tasks"));
    }

    #[test]
    fn test_schema_doc_covers_tables() {
        assert!(TASK_SCHEMA_DOC.contains("### tasks"));
        assert!(TASK_SCHEMA_DOC.contains("### users"));
        assert!(TASK_SCHEMA_DOC.contains(":workspace_id"));
    }

    #[test]
    fn test_no_results_answer_contains_workspace() {
        assert!(no_results_answer("w-42").contains("`w-42`"));
    }

    #[test]
    fn test_intent_prompt_shape() {
        let prompt = build_intent_prompt("delete all tasks", "w1", Some("USER: hi"));
        assert!(prompt.contains("\"delete all tasks\""));
        assert!(prompt.contains("Recent Conversation"));
        assert!(prompt.contains("requires_agents"));
    }

    #[test]
    fn test_planning_prompt_lists_step_types() {
        let prompt = build_planning_prompt("q", "task_query", "task", "w1");
        for step_type in ["query_document", "query_task", "query_board", "synthesize"] {
            assert!(prompt.contains(step_type));
        }
    }

    #[test]
    fn test_prompts_not_empty() {
        assert!(!TASK_AGENT_SYSTEM_PROMPT.is_empty());
        assert!(!BOARD_AGENT_SYSTEM_PROMPT.is_empty());
        assert!(!ORCHESTRATOR_SYSTEM_PROMPT.is_empty());
    }
}
