//! Small-talk short-circuit.
//!
//! Greetings and similar queries are answered from a fixed lexicon
//! without planning or agent calls. The mapping is pure: the same
//! input always yields the same canned output.

/// Maximum query length for partial lexicon matches.
const PARTIAL_MATCH_MAX_LEN: usize = 20;

/// Canned responses keyed by lowercased query.
const LEXICON: &[(&str, &str)] = &[
    (
        "hello",
        "Hello! I'm your Workspace Assistant. I can help you manage tasks, find documents, or visualize your project progress. How can I help you today?",
    ),
    ("hi", "Hi there! Ready to help with your project. What do you need?"),
    ("hey", "Hey! How can I assist you with your workspace today?"),
    (
        "how are you",
        "I'm functioning perfectly and ready to assist! How can I help you with your work?",
    ),
    ("thanks", "You're welcome! Let me know if you need anything else."),
    ("thank you", "Happy to help! Is there anything else you need?"),
    ("bye", "Goodbye! Have a productive day."),
    (
        "what can you do",
        "I'm your project assistant. I can:\n- **Analyze Tasks:** Show overdue items, risks, or workload.\n- **Search Documents:** Answer questions from your uploaded files.\n- **Visualize Data:** Create Kanban boards, Gantt charts, and flowcharts.\n\nJust ask!",
    ),
];

/// Generic clarification for unmatched small talk.
pub const CLARIFICATION: &str = "I'm not sure I understood that. I can help with tasks, documents, and visualizations. Could you rephrase your request?";

/// Resolves a small-talk query to its canned response.
///
/// Exact lexicon matches win; short queries containing a lexicon key
/// use that key's response; everything else gets the generic
/// clarification.
#[must_use]
pub fn respond(query: &str) -> String {
    let query = query.to_lowercase();
    let query = query.trim();

    if let Some((_, response)) = LEXICON.iter().find(|(key, _)| *key == query) {
        return (*response).to_string();
    }

    if query.len() < PARTIAL_MATCH_MAX_LEN {
        for (key, response) in LEXICON {
            if query.contains(key) {
                return (*response).to_string();
            }
        }
    }

    CLARIFICATION.to_string()
}
