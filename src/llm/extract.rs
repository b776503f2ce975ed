//! Tolerant extraction of structured data from model output.
//!
//! Models frequently wrap JSON in markdown fences or surround it with
//! prose. These helpers strip fences and locate the first balanced
//! object so every parse path can degrade gracefully.

/// Strips a leading/trailing markdown code fence if present.
///
/// Handles both ` ```json ` and bare ` ``` ` fences, including
/// responses where the closing fence was truncated.
#[must_use]
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }

    let body = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```sql")
        .trim_start_matches("```");
    body.trim_end_matches("```").trim()
}

/// Extracts the first balanced `{...}` object from the content.
///
/// Returns `None` when no opening brace exists or the braces never
/// balance. Brace counting ignores braces inside JSON string literals.
#[must_use]
pub fn first_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strips fences and extracts the first balanced JSON object.
///
/// The standard preprocessing step for intent, plan, and board
/// responses before handing the text to `serde_json`.
#[must_use]
pub fn extract_json_object(content: &str) -> Option<&str> {
    first_json_object(strip_code_fences(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("{\"a\": 1}", "{\"a\": 1}"; "bare object")]
    #[test_case("```json\n{\"a\": 1}\n```", "{\"a\": 1}"; "json fence")]
    #[test_case("```\n{\"a\": 1}\n```", "{\"a\": 1}"; "plain fence")]
    #[test_case("```json\n{\"a\": 1}", "{\"a\": 1}"; "unterminated fence")]
    fn test_strip_code_fences(input: &str, expected: &str) {
        assert_eq!(strip_code_fences(input), expected);
    }

    #[test]
    fn test_first_json_object_with_prose() {
        let content = "Here is the result: {\"type\": \"task_query\"} hope it helps";
        assert_eq!(
            first_json_object(content),
            Some("{\"type\": \"task_query\"}")
        );
    }

    #[test]
    fn test_first_json_object_nested() {
        let content = "{\"a\": {\"b\": 2}} trailing";
        assert_eq!(first_json_object(content), Some("{\"a\": {\"b\": 2}}"));
    }

    #[test]
    fn test_first_json_object_braces_in_strings() {
        let content = r#"{"a": "curly } brace", "b": 1}"#;
        assert_eq!(first_json_object(content), Some(content));
    }

    #[test]
    fn test_first_json_object_unbalanced() {
        assert!(first_json_object("{\"a\": 1").is_none());
        assert!(first_json_object("no json here").is_none());
    }

    #[test]
    fn test_extract_json_object_full_path() {
        let content = "```json\nSure! {\"ok\": true}\n```";
        assert_eq!(extract_json_object(content), Some("{\"ok\": true}"));
    }

    #[test]
    fn test_extract_json_escaped_quote() {
        let content = r#"{"a": "escaped \" quote }"}"#;
        assert_eq!(first_json_object(content), Some(content));
    }
}
