//!
//! Parser for Mistral's native inline tool-call syntax.
//!
//! Even with tool schemas supplied, Mistral-family models sometimes emit tool
//! calls inline as text: `[TOOL_CALLS]Name{"arg":"v"}[TOOL_CALLS]Other{...}`.
//! This module recovers structured calls from such text with a balanced-brace
//! scan that understands string literals and escapes.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde_json::Value;

/* --- types ----------------------------------------------------------------------------------- */

///
/// One tool call recovered from inline text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    /** tool name as emitted by the model */
    pub name: String,
    /** parsed JSON arguments */
    pub arguments: Value,
}

/* --- constants ------------------------------------------------------------------------------ */

/** The literal marker Mistral models prefix inline tool calls with */
pub const TOOL_CALLS_MARKER: &str = "[TOOL_CALLS]";

/* --- start of code -------------------------------------------------------------------------- */

///
/// Check whether text contains the inline tool-call marker.
///
/// # Arguments
///  * `text` - accumulated model output
///
/// # Returns
///  * `true` if `[TOOL_CALLS]` appears anywhere in the text
pub fn contains_marker(text: &str) -> bool {
    text.contains(TOOL_CALLS_MARKER)
}

///
/// Parse every inline tool call out of a text blob.
///
/// Scans for each occurrence of the marker; after it, matches a name from
/// `[A-Za-z0-9_]+` which must be immediately followed by `{`, then extracts a
/// balanced-brace JSON object. Calls whose JSON fails to parse are skipped;
/// scanning continues with the next marker.
///
/// # Arguments
///  * `text` - accumulated model output
///
/// # Returns
///  * All successfully parsed tool calls, empty when the marker never appears
pub fn parse_tool_calls(text: &str) -> Vec<ParsedToolCall> {
    let mut calls = Vec::new();
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find(TOOL_CALLS_MARKER) {
        let name_start = cursor + found + TOOL_CALLS_MARKER.len();
        let name_len = text[name_start..]
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
            .count();

        if name_len == 0 {
            cursor = name_start;
            continue;
        }

        let json_start = name_start + name_len;
        if !text[json_start..].starts_with('{') {
            cursor = json_start;
            continue;
        }

        match extract_balanced_object(&text[json_start..]) {
            Some(object) => {
                let end = json_start + object.len();
                if let Ok(arguments) = serde_json::from_str::<Value>(object) {
                    calls.push(ParsedToolCall {
                        name: text[name_start..json_start].to_string(),
                        arguments,
                    });
                }
                cursor = end;
            }
            // unbalanced braces: stop scanning this candidate, move past it
            None => {
                cursor = json_start + 1;
            }
        }
    }

    calls
}

///
/// Extract a balanced-brace JSON object from the start of the input.
///
/// Braces inside string literals are not counted; backslash escapes inside
/// strings are honored so `"\""` does not end a literal.
///
/// # Arguments
///  * `text` - input beginning with `{`
///
/// # Returns
///  * The object substring including both braces, or None when unbalanced
fn extract_balanced_object(text: &str) -> Option<&str> {
    debug_assert!(text.starts_with('{'));

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (pos, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..pos + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_marker_yields_nothing() {
        assert!(parse_tool_calls("plain assistant text").is_empty());
    }

    #[test]
    fn test_single_call() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]search{"q":"x"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments, json!({"q": "x"}));
    }

    #[test]
    fn test_multiple_calls() {
        let calls =
            parse_tool_calls(r#"[TOOL_CALLS]read_file{"path":"a"}[TOOL_CALLS]bash{"cmd":"ls"}"#);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[1].name, "bash");
        assert_eq!(calls[1].arguments, json!({"cmd": "ls"}));
    }

    #[test]
    fn test_nested_braces() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]edit{"change":{"from":"{","to":"}"}}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["change"]["from"], "{");
    }

    #[test]
    fn test_braces_inside_strings_not_counted() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]write{"body":"fn main() { }"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["body"], "fn main() { }");
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]say{"text":"she said \"{\" loudly"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["text"], "she said \"{\" loudly");
    }

    #[test]
    fn test_name_without_brace_is_skipped() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]broken [TOOL_CALLS]good{"a":1}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "good");
    }

    #[test]
    fn test_unbalanced_braces_do_not_abort_parse() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]bad{"a": [TOOL_CALLS]"#);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_invalid_json_is_skipped() {
        let calls = parse_tool_calls(r#"[TOOL_CALLS]bad{not json}[TOOL_CALLS]ok{"k":"v"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ok");
    }

    #[test]
    fn test_marker_mid_text() {
        let calls = parse_tool_calls(r#"Let me check. [TOOL_CALLS]ls{"path":"."}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ls");
    }

    #[test]
    fn test_empty_arguments_object() {
        let calls = parse_tool_calls("[TOOL_CALLS]noop{}");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({}));
    }
}
