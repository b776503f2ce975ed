//! LLM-backed fact extraction from Q&A pairs.
//!
//! The extractor asks the model for a line-oriented format rather than
//! JSON; partial or malformed blocks degrade to fewer facts instead of
//! a parse failure.

use tracing::debug;

use crate::core::KnowledgeType;
use crate::error::LlmError;
use crate::llm::LlmHandle;

/// Maximum facts extracted from one Q&A pair.
pub const MAX_FACTS_PER_PAIR: usize = 5;

/// A fact parsed from model output, before storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFact {
    /// Fact category.
    pub knowledge_type: KnowledgeType,
    /// Main subject/topic (the fact key).
    pub entity: String,
    /// The factual content (the fact value).
    pub content: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

/// Extracts durable facts from Q&A pairs via the LLM.
#[derive(Clone)]
pub struct FactExtractor {
    llm: LlmHandle,
}

impl std::fmt::Debug for FactExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactExtractor").finish()
    }
}

impl FactExtractor {
    /// Creates an extractor over the given LLM handle.
    #[must_use]
    pub const fn new(llm: LlmHandle) -> Self {
        Self { llm }
    }

    /// Builds the extraction prompt for a Q&A pair.
    #[must_use]
    pub fn build_prompt(question: &str, answer: &str) -> String {
        format!(
            "Extract key facts from this Q&A pair that should be remembered long-term.\n\n\
             QUESTION:\n{question}\n\n\
             ANSWER:\n{answer}\n\n\
             Extract facts in this format (one per line):\n\
             TYPE: <definition|concept|example|procedure|entity>\n\
             ENTITY: <main subject/topic>\n\
             CONTENT: <the factual information>\n\
             CONFIDENCE: <0.0-1.0>\n\n\
             Rules:\n\
             - Only extract factual, verifiable information\n\
             - Skip conversational filler or opinions\n\
             - Focus on definitions, concepts, examples, procedures\n\
             - Use confidence score: 1.0 for direct facts, 0.7-0.9 for inferred facts\n\
             - Extract 1-5 facts maximum\n\n\
             FACTS:"
        )
    }

    /// Calls the LLM and parses 0..=5 facts from its output.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on provider failure; unparseable output
    /// yields an empty list, not an error.
    pub async fn extract(
        &self,
        question: &str,
        answer: &str,
    ) -> Result<Vec<ExtractedFact>, LlmError> {
        let prompt = Self::build_prompt(question, answer);
        let content = self.llm.generate_simple(None, &prompt).await?;
        let facts = Self::parse_facts(&content);
        debug!(count = facts.len(), "facts extracted");
        Ok(facts)
    }

    /// Parses the line-oriented fact format.
    ///
    /// A fact is finalized once its ENTITY and CONTENT lines were both
    /// seen; blocks missing either are dropped.
    #[must_use]
    pub fn parse_facts(text: &str) -> Vec<ExtractedFact> {
        let mut facts = Vec::new();
        let mut knowledge_type = KnowledgeType::General;
        let mut entity: Option<String> = None;
        let mut content: Option<String> = None;
        let mut confidence = 0.8;

        let mut flush =
            |kt: KnowledgeType, ent: &mut Option<String>, cont: &mut Option<String>, conf: f64| {
                if let (Some(e), Some(c)) = (ent.take(), cont.take())
                    && !e.is_empty()
                    && !c.is_empty()
                {
                    facts.push(ExtractedFact {
                        knowledge_type: kt,
                        entity: e,
                        content: c,
                        confidence: conf.clamp(0.0, 1.0),
                    });
                }
            };

        for line in text.lines() {
            let line = line.trim();
            if let Some(value) = line.strip_prefix("TYPE:") {
                // A new TYPE line starts a new block.
                flush(knowledge_type, &mut entity, &mut content, confidence);
                knowledge_type = KnowledgeType::parse(value);
                confidence = 0.8;
            } else if let Some(value) = line.strip_prefix("ENTITY:") {
                entity = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("CONTENT:") {
                content = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("CONFIDENCE:") {
                confidence = value.trim().parse().unwrap_or(0.8);
            }
        }
        flush(knowledge_type, &mut entity, &mut content, confidence);

        facts.truncate(MAX_FACTS_PER_PAIR);
        facts
    }
}
