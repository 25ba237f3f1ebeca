//!
//! Tool-call identifier normalization for Mistral-family tokenizers.
//!
//! Mistral tokenizers reject tool_call IDs longer than 9 characters or
//! containing non-alphanumerics, while Anthropic clients commonly emit IDs
//! like `toolu_01ABCDEF...`. Rewriting must preserve referential integrity
//! between a tool call and its matching result, so normalization is applied
//! through a request-scoped map built in a collect sweep and applied in a
//! rewrite sweep.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::HashMap;

use crate::types::openai::OpenAiRequest;

/* --- constants ------------------------------------------------------------------------------ */

/** Alphabet the 9-character IDs are projected into */
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/** Required tool ID length */
const ID_LENGTH: usize = 9;

/** FNV-1a 64-bit offset basis */
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;

/** FNV-1a 64-bit prime */
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/** Maximum sanitized tool name length */
const MAX_TOOL_NAME_LEN: usize = 64;

/* --- start of code -------------------------------------------------------------------------- */

///
/// Check whether an ID already satisfies the 9-alphanumeric contract.
///
/// # Arguments
///  * `id` - tool call identifier to check
///
/// # Returns
///  * `true` if the ID is exactly 9 characters from `[a-zA-Z0-9]`
pub fn is_valid_tool_id(id: &str) -> bool {
    id.len() == ID_LENGTH && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

///
/// Normalize a tool call identifier to the 9-alphanumeric form.
///
/// Valid IDs are returned verbatim, which makes the function idempotent:
/// `normalize_tool_id(normalize_tool_id(id)) == normalize_tool_id(id)`.
/// Invalid IDs get a deterministic derived replacement.
///
/// # Arguments
///  * `id` - tool call identifier from the client
///
/// # Returns
///  * An identifier matching `^[a-zA-Z0-9]{9}$`
pub fn normalize_tool_id(id: &str) -> String {
    if is_valid_tool_id(id) {
        return id.to_string();
    }
    derive_tool_id(id)
}

///
/// Derive a 9-alphanumeric identifier from arbitrary input.
///
/// Mixes the UTF-8 code units with an FNV-1a style hash, then projects the
/// evolving state into the 62-character alphabet nine times. The same input
/// always yields the same output.
///
/// # Arguments
///  * `seed` - arbitrary input string
///
/// # Returns
///  * A 9-character `[a-zA-Z0-9]` identifier
pub fn derive_tool_id(seed: &str) -> String {
    let mut state = FNV_OFFSET;
    for byte in seed.as_bytes() {
        state ^= u64::from(*byte);
        state = state.wrapping_mul(FNV_PRIME);
    }

    let mut id = String::with_capacity(ID_LENGTH);
    for _ in 0..ID_LENGTH {
        // keep mixing so short inputs still spread over all nine positions
        state ^= state >> 33;
        state = state.wrapping_mul(FNV_PRIME);
        let index = (state % ID_ALPHABET.len() as u64) as usize;
        id.push(ID_ALPHABET[index] as char);
    }
    id
}

///
/// Sanitize a tool name for the backend tokenizer.
///
/// Trims surrounding whitespace, replaces every character outside
/// `[a-zA-Z0-9_-]` with `_`, trims leading/trailing underscores, truncates to
/// 64 characters, and falls back to `unknown_tool` when nothing remains.
///
/// # Arguments
///  * `name` - tool name as sent by the client
///
/// # Returns
///  * A backend-safe tool name
pub fn sanitize_tool_name(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();

    let trimmed = replaced.trim_matches('_');
    let truncated: String = trimmed.chars().take(MAX_TOOL_NAME_LEN).collect();

    if truncated.is_empty() { "unknown_tool".to_string() } else { truncated }
}

///
/// Request-scoped bijection from original tool IDs to normalized IDs.
///
/// Built during the collect sweep over tool calls; consulted during the
/// rewrite sweep over tool results. IDs seen only on a result without a
/// matching call are left alone, so the backend rejects them, which is the
/// correct failure.
#[derive(Debug, Default)]
pub struct ToolIdMap {
    /** original id -> normalized id */
    map: HashMap<String, String>,
}

impl ToolIdMap {
    ///
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    ///
    /// Record a tool call ID and return its normalized form.
    ///
    /// The same original ID always maps to the same normalized ID within
    /// one request.
    ///
    /// # Arguments
    ///  * `id` - original tool call identifier
    ///
    /// # Returns
    ///  * The normalized identifier
    pub fn record(&mut self, id: &str) -> String {
        self.map.entry(id.to_string()).or_insert_with(|| normalize_tool_id(id)).clone()
    }

    ///
    /// Resolve a referenced ID against recorded tool calls.
    ///
    /// Unknown references are returned unchanged.
    ///
    /// # Arguments
    ///  * `id` - identifier referenced by a tool result
    ///
    /// # Returns
    ///  * The normalized identifier, or the original for orphan references
    pub fn resolve(&self, id: &str) -> String {
        self.map.get(id).cloned().unwrap_or_else(|| id.to_string())
    }
}

///
/// Normalize every tool-call ID in an OpenAI-form request.
///
/// Two linear sweeps: first collect every ID appearing on an assistant
/// message's `tool_calls`, then rewrite those IDs wherever they occur,
/// including `tool_call_id` references on tool messages.
///
/// # Arguments
///  * `request` - OpenAI request to normalize
///
/// # Returns
///  * A new request with all tool IDs in 9-alphanumeric form
pub fn normalize_request_tool_ids(mut request: OpenAiRequest) -> OpenAiRequest {
    let mut ids = ToolIdMap::new();

    for message in &request.messages {
        if let Some(ref tool_calls) = message.tool_calls {
            for call in tool_calls {
                ids.record(&call.id);
            }
        }
    }

    for message in &mut request.messages {
        if let Some(ref mut tool_calls) = message.tool_calls {
            for call in tool_calls.iter_mut() {
                call.id = ids.resolve(&call.id);
            }
        }
        if let Some(ref mut tool_call_id) = message.tool_call_id {
            *tool_call_id = ids.resolve(tool_call_id);
        }
    }

    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::openai::{OpenAiContent, OpenAiFunctionCall, OpenAiMessage, OpenAiToolCall};

    fn request_with_messages(messages: Vec<OpenAiMessage>) -> OpenAiRequest {
        OpenAiRequest {
            model: Some("devstral".to_string()),
            messages,
            max_tokens: None,
            temperature: None,
            stream: None,
            stream_options: None,
            tools: None,
            tool_choice: None,
            extra: Default::default(),
        }
    }

    fn tool_call(id: &str) -> OpenAiToolCall {
        OpenAiToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: OpenAiFunctionCall {
                name: "bash".to_string(),
                arguments: "{}".to_string(),
            },
        }
    }

    #[test]
    fn test_valid_id_returned_verbatim() {
        assert_eq!(normalize_tool_id("abc123XYZ"), "abc123XYZ");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_tool_id("toolu_01ABCDEFGH");
        let twice = normalize_tool_id(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        assert_eq!(normalize_tool_id("toolu_01ABCDEFGH"), normalize_tool_id("toolu_01ABCDEFGH"));
    }

    #[test]
    fn test_derived_id_shape() {
        for seed in ["", "x", "toolu_01ABCDEFGH", "call-with-hyphens-and-🎉"] {
            let id = derive_tool_id(seed);
            assert_eq!(id.len(), 9, "seed {seed:?}");
            assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()), "seed {seed:?} -> {id}");
        }
    }

    #[test]
    fn test_distinct_seeds_diverge() {
        assert_ne!(derive_tool_id("toolu_01A"), derive_tool_id("toolu_01B"));
    }

    #[test]
    fn test_request_sweep_keeps_references_consistent() {
        let request = request_with_messages(vec![
            OpenAiMessage {
                role: "assistant".to_string(),
                content: None,
                tool_calls: Some(vec![tool_call("toolu_01ABCDEFGH")]),
                tool_call_id: None,
            },
            OpenAiMessage {
                role: "tool".to_string(),
                content: Some(OpenAiContent::Text("a.txt".to_string())),
                tool_calls: None,
                tool_call_id: Some("toolu_01ABCDEFGH".to_string()),
            },
        ]);

        let normalized = normalize_request_tool_ids(request);
        let call_id = &normalized.messages[0].tool_calls.as_ref().unwrap()[0].id;
        let result_id = normalized.messages[1].tool_call_id.as_ref().unwrap();
        assert!(is_valid_tool_id(call_id));
        assert_eq!(call_id, result_id);
    }

    #[test]
    fn test_orphan_result_left_unchanged() {
        let request = request_with_messages(vec![OpenAiMessage {
            role: "tool".to_string(),
            content: Some(OpenAiContent::Text("out".to_string())),
            tool_calls: None,
            tool_call_id: Some("toolu_orphan_reference".to_string()),
        }]);

        let normalized = normalize_request_tool_ids(request);
        assert_eq!(
            normalized.messages[0].tool_call_id.as_deref(),
            Some("toolu_orphan_reference")
        );
    }

    #[test]
    fn test_sanitize_tool_name() {
        assert_eq!(sanitize_tool_name("bash"), "bash");
        assert_eq!(sanitize_tool_name("  my.tool  "), "my_tool");
        assert_eq!(sanitize_tool_name("__wrapped__"), "wrapped");
        assert_eq!(sanitize_tool_name("???"), "unknown_tool");
        assert_eq!(sanitize_tool_name(""), "unknown_tool");
        let long = "a".repeat(100);
        assert_eq!(sanitize_tool_name(&long).len(), 64);
    }
}
