//! Conversation memory and long-term facts.
//!
//! Short-term memory is the append-only turn log per session; long-term
//! memory is the keyed fact store. [`MemoryStore::get_context`] composes
//! both into one context block with a stable section order: current
//! session → summary → facts → past sessions.

pub mod facts;

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::config::MemoryConfig;
use crate::core::{ConversationTurn, Fact, TurnRole, new_id};
use crate::error::Result;
use crate::storage::{ConversationRepo, FactRepo};

pub use facts::{ExtractedFact, FactExtractor, MAX_FACTS_PER_PAIR};

/// Truncation length for past-session excerpts in composed context.
const PAST_EXCERPT_LEN: usize = 200;

/// Unified access to conversation turns and long-term facts.
pub struct MemoryStore {
    config: MemoryConfig,
    conversations: Arc<dyn ConversationRepo>,
    facts: Arc<dyn FactRepo>,
    extractor: Option<FactExtractor>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.config)
            .finish()
    }
}

impl MemoryStore {
    /// Creates a memory store over the given repositories.
    ///
    /// Without an extractor, `extract_and_store_facts` is a no-op that
    /// returns an empty list.
    #[must_use]
    pub fn new(
        config: MemoryConfig,
        conversations: Arc<dyn ConversationRepo>,
        facts: Arc<dyn FactRepo>,
        extractor: Option<FactExtractor>,
    ) -> Self {
        Self {
            config,
            conversations,
            facts,
            extractor,
        }
    }

    /// Appends one turn, stamping the wall clock at call time.
    #[allow(clippy::too_many_arguments)]
    pub fn record_turn(
        &self,
        workspace_id: &str,
        user_id: &str,
        session_id: &str,
        role: TurnRole,
        content: &str,
        agent_used: Option<&str>,
        confidence: Option<f64>,
    ) -> Result<ConversationTurn> {
        let turn = ConversationTurn {
            turn_id: new_id("turn"),
            workspace_id: workspace_id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            agent_used: agent_used.map(str::to_string),
            confidence,
            metadata: serde_json::json!({}),
        };
        self.conversations.append(&turn)?;
        Ok(turn)
    }

    /// Records a question/answer pair as two turns.
    #[allow(clippy::too_many_arguments)]
    pub fn record_qa_pair(
        &self,
        workspace_id: &str,
        user_id: &str,
        session_id: &str,
        question: &str,
        answer: &str,
        agent_name: Option<&str>,
        confidence: Option<f64>,
    ) -> Result<()> {
        self.record_turn(
            workspace_id,
            user_id,
            session_id,
            TurnRole::User,
            question,
            None,
            None,
        )?;
        self.record_turn(
            workspace_id,
            user_id,
            session_id,
            TurnRole::Assistant,
            answer,
            agent_name,
            confidence,
        )?;
        Ok(())
    }

    /// Derives up to five facts from a Q&A pair and upserts them.
    ///
    /// Extraction failures are logged and yield an empty list; memory
    /// writes never take down the answering path.
    pub async fn extract_and_store_facts(
        &self,
        question: &str,
        answer: &str,
        workspace_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<Fact>> {
        let Some(extractor) = &self.extractor else {
            return Ok(Vec::new());
        };
        let extracted = match extractor.extract(question, answer).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!(error = %e, "fact extraction failed");
                return Ok(Vec::new());
            }
        };

        let mut answer_excerpt = answer.to_string();
        answer_excerpt.truncate(PAST_EXCERPT_LEN);
        let mut stored = Vec::with_capacity(extracted.len());
        for fact in extracted {
            let record = Fact {
                fact_id: String::new(),
                workspace_id: workspace_id.to_string(),
                knowledge_type: fact.knowledge_type,
                key: fact.entity,
                value: fact.content,
                source: "conversation".to_string(),
                confidence: fact.confidence,
                access_count: 0,
                last_accessed_at: None,
                metadata: serde_json::json!({
                    "question": question,
                    "answer": answer_excerpt,
                    "user_id": user_id,
                    "session_id": session_id,
                }),
            };
            stored.push(self.facts.upsert(&record)?);
        }
        debug!(count = stored.len(), "facts stored");
        Ok(stored)
    }

    /// Composes the memory context block for a query.
    ///
    /// Side effect: increments `access_count` and stamps
    /// `last_accessed_at` on the facts that were returned. Turns are
    /// never mutated by reads.
    pub fn get_context(
        &self,
        workspace_id: &str,
        user_id: &str,
        session_id: &str,
        query: &str,
    ) -> Result<String> {
        let mut parts: Vec<String> = Vec::new();

        // 1. Current session.
        let recent = self
            .conversations
            .get_by_session(session_id, self.config.recent_turns)?;
        if !recent.is_empty() {
            parts.push("## Current Conversation".to_string());
            for turn in &recent {
                parts.push(format!(
                    "{}: {}",
                    turn.role.as_str().to_uppercase(),
                    turn.content
                ));
            }

            // 2. Session summary.
            if let Some(summary) = Self::summarize(&recent) {
                parts.push("\n## Session Summary".to_string());
                parts.push(summary);
            }
        }

        // 3. Relevant facts.
        let matched = self
            .facts
            .search(workspace_id, query, self.config.max_facts)?;
        if !matched.is_empty() {
            parts.push("\n## Relevant Knowledge".to_string());
            for fact in &matched {
                parts.push(format!(
                    "- {}: {} (confidence: {:.2})",
                    fact.key, fact.value, fact.confidence
                ));
            }
            let ids: Vec<String> = matched.iter().map(|f| f.fact_id.clone()).collect();
            self.facts.increment_access(&ids)?;
        }

        // 4. Related past discussions within the rolling window.
        let cutoff = Utc::now() - Duration::days(self.config.history_window_days);
        let past = self.conversations.search(
            workspace_id,
            user_id,
            session_id,
            query,
            cutoff,
            self.config.max_history,
        )?;
        if !past.is_empty() {
            parts.push("\n## Related Past Discussions".to_string());
            for turn in &past {
                let mut excerpt = turn.content.clone();
                excerpt.truncate(PAST_EXCERPT_LEN);
                parts.push(format!(
                    "- {}: {excerpt}...",
                    turn.role.as_str().to_uppercase()
                ));
            }
        }

        Ok(parts.join("\n"))
    }

    /// Formats the last `last_n` user/assistant turns for query
    /// reformulation ("USER: ...\nASSISTANT: ..." lines).
    pub fn format_for_reformulation(&self, session_id: &str, last_n: usize) -> Result<String> {
        let turns = self.conversations.get_by_session(session_id, last_n)?;
        let lines: Vec<String> = turns
            .iter()
            .filter(|t| t.role != TurnRole::System)
            .map(|t| format!("{}: {}", t.role.as_str().to_uppercase(), t.content))
            .collect();
        Ok(lines.join("\n"))
    }

    /// Counts user/assistant turn pairs in a session.
    pub fn count_turns(&self, session_id: &str) -> Result<usize> {
        let turns = self.conversations.get_by_session(session_id, 1_000)?;
        let speech = turns
            .iter()
            .filter(|t| matches!(t.role, TurnRole::User | TurnRole::Assistant))
            .count();
        Ok(speech / 2)
    }

    /// Deletes all turns of a session, returning the number removed.
    pub fn clear_session(&self, session_id: &str) -> Result<usize> {
        self.conversations.delete_session(session_id)
    }

    /// Removes facts below the configured confidence floor.
    pub fn sweep_facts(&self, workspace_id: &str) -> Result<usize> {
        self.facts
            .sweep_below(workspace_id, self.config.min_fact_confidence)
    }

    /// One-line non-LLM session summary.
    fn summarize(turns: &[ConversationTurn]) -> Option<String> {
        let first = turns.first()?;
        let speech = turns
            .iter()
            .filter(|t| matches!(t.role, TurnRole::User | TurnRole::Assistant))
            .count();
        let mut opening = first.content.clone();
        opening.truncate(50);
        Some(format!(
            "{} turns, {} messages. Started with: {opening}...",
            speech / 2,
            turns.len()
        ))
    }
}
