//!
//! Token counting for the count_tokens endpoint and stream estimates.
//!
//! Uses the GPT-4 BPE encoding via tiktoken; the encoder is expensive to
//! build, so it is cached globally and shared across requests. When the
//! encoder cannot be constructed the count degrades to ceil(chars/4).
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::sync::OnceLock;

use serde_json::Value;
use tiktoken_rs::CoreBPE;

use crate::types::openai::{OpenAiContent, OpenAiRequest};

/* --- start of code -------------------------------------------------------------------------- */

/** Lazily built GPT-4 encoder, shared across all requests */
static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn encoder() -> Option<&'static CoreBPE> {
    ENCODER.get_or_init(|| tiktoken_rs::cl100k_base().ok()).as_ref()
}

///
/// Count tokens in a piece of text.
///
/// # Arguments
///  * `text` - text to count
///
/// # Returns
///  * BPE token count, or ceil(chars/4) when the encoder is unavailable
pub fn count_text(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u32,
        None => (text.chars().count() as u32).div_ceil(4),
    }
}

///
/// Count the input tokens of a count_tokens request payload.
///
/// Works on the raw JSON because clients commonly send reduced shapes here
/// (no model, messages without roles). Sums over each message's text parts
/// and JSON-encoded tool inputs and results, the system prompt text, and
/// each tool's name, description, and JSON-encoded input schema.
///
/// # Arguments
///  * `payload` - request payload to count
///
/// # Returns
///  * Deterministic token count for the payload
pub fn count_request_payload(payload: &Value) -> u32 {
    let mut total = 0;

    if let Some(messages) = payload.get("messages").and_then(Value::as_array) {
        for message in messages {
            match message.get("content") {
                Some(Value::String(text)) => total += count_text(text),
                Some(Value::Array(blocks)) => {
                    for block in blocks {
                        total += count_block(block);
                    }
                }
                _ => {}
            }
        }
    }

    match payload.get("system") {
        Some(Value::String(text)) => total += count_text(text),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    total += count_text(text);
                }
            }
        }
        _ => {}
    }

    if let Some(tools) = payload.get("tools").and_then(Value::as_array) {
        for tool in tools {
            if let Some(name) = tool.get("name").and_then(Value::as_str) {
                total += count_text(name);
            }
            if let Some(description) = tool.get("description").and_then(Value::as_str) {
                total += count_text(description);
            }
            if let Some(schema) = tool.get("input_schema") {
                total += count_text(&schema.to_string());
            }
        }
    }

    total
}

///
/// Estimate the input tokens of an outbound OpenAI request.
///
/// Used for the `message_start` usage stub before the upstream reports its
/// own prompt count.
///
/// # Arguments
///  * `request` - outbound OpenAI request
///
/// # Returns
///  * Token estimate over messages, tool calls, and tool definitions
pub fn estimate_openai_request(request: &OpenAiRequest) -> u32 {
    let mut total = 0;

    for message in &request.messages {
        if let Some(ref content) = message.content {
            total += match content {
                OpenAiContent::Text(text) => count_text(text),
                OpenAiContent::Parts(_) => count_text(&content.to_text()),
            };
        }
        if let Some(ref tool_calls) = message.tool_calls {
            for call in tool_calls {
                total += count_text(&call.function.name);
                total += count_text(&call.function.arguments);
            }
        }
    }

    if let Some(ref tools) = request.tools {
        for tool in tools {
            total += count_text(&tool.function.name);
            if let Some(ref description) = tool.function.description {
                total += count_text(description);
            }
            total += count_text(&tool.function.parameters.to_string());
        }
    }

    total
}

fn count_block(block: &Value) -> u32 {
    match block.get("type").and_then(Value::as_str) {
        Some("text") => {
            block.get("text").and_then(Value::as_str).map(count_text).unwrap_or(0)
        }
        Some("tool_use") => {
            let name = block.get("name").and_then(Value::as_str).map(count_text).unwrap_or(0);
            let input =
                block.get("input").map(|input| count_text(&input.to_string())).unwrap_or(0);
            name + input
        }
        Some("tool_result") => match block.get("content") {
            Some(Value::String(text)) => count_text(text),
            Some(content) => count_text(&content.to_string()),
            None => 0,
        },
        // images are not text-countable; the vision backend prices them itself
        Some("image") => 0,
        _ => count_text(&block.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_count_text_nonzero_and_deterministic() {
        let a = count_text("hello world");
        assert!(a > 0);
        assert_eq!(a, count_text("hello world"));
        assert_eq!(count_text(""), 0);
    }

    #[test]
    fn test_count_request_covers_all_parts() {
        let bare = json!({
            "model": "claude-3",
            "messages": [{"role": "user", "content": "hello"}]
        });
        let with_tools = json!({
            "model": "claude-3",
            "messages": [{"role": "user", "content": "hello"}],
            "system": "be brief",
            "tools": [{"name": "t", "description": "d", "input_schema": {"k": "v"}}]
        });

        let bare_count = count_request_payload(&bare);
        let full_count = count_request_payload(&with_tools);
        assert!(bare_count > 0);
        assert!(full_count > bare_count, "system and tools must add tokens");
    }

    #[test]
    fn test_count_reduced_shape_without_roles() {
        // clients send reduced shapes to count_tokens: no model, no roles
        let payload = json!({
            "messages": [{"content": "hello"}],
            "tools": [{"name": "t", "description": "d", "input_schema": {"k": "v"}}]
        });
        let count = count_request_payload(&payload);
        assert!(count > 0);
        assert_eq!(count, count_request_payload(&payload));
    }

    #[test]
    fn test_count_request_includes_tool_blocks() {
        let with_use = json!({
            "model": "claude-3",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "abc123def", "name": "bash", "input": {"cmd": "ls -la"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "abc123def", "content": "a.txt b.txt"}
                ]}
            ]
        });
        assert!(count_request_payload(&with_use) > 0);
    }

    #[test]
    fn test_estimate_openai_request() {
        let openai: OpenAiRequest = serde_json::from_value(json!({
            "model": "devstral",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hello there"}
            ],
            "tools": [{"type": "function", "function": {"name": "t", "description": "d", "parameters": {}}}]
        }))
        .unwrap();
        let estimate = estimate_openai_request(&openai);
        assert!(estimate > 0);
        assert_eq!(estimate, estimate_openai_request(&openai));
    }
}
