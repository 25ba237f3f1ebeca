//!
//! OpenAI to Anthropic format converter for API response translation.
//!
//! Rebuilds the Anthropic response shape from an OpenAI chat completion.
//! Mistral backends sometimes emit tool calls inline in the text body using
//! the `[TOOL_CALLS]` marker instead of structured tool_calls; those are
//! recovered here so clients always receive proper tool_use blocks.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde_json::json;

use crate::config::LogLevel;
use crate::converter::mistral::{self, TOOL_CALLS_MARKER};
use crate::converter::tool_id::derive_tool_id;
use crate::types::anthropic::{AnthropicContentBlock, AnthropicResponse, AnthropicUsage};
use crate::types::openai::{OpenAiResponse, OpenAiToolCall};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Converter from OpenAI response format to Anthropic response format.
pub struct OpenAiToAnthropicConverter {
    /** logging level for debug output */
    log_level: LogLevel,
}

/* --- start of code -------------------------------------------------------------------------- */

///
/// Map an OpenAI finish_reason onto an Anthropic stop_reason.
///
/// Known values translate; anything else passes through verbatim.
///
/// # Arguments
///  * `finish_reason` - OpenAI finish reason string
///
/// # Returns
///  * Anthropic stop reason string
pub fn map_stop_reason(finish_reason: &str) -> String {
    match finish_reason {
        "stop" => "end_turn".to_string(),
        "tool_calls" => "tool_use".to_string(),
        "length" => "max_tokens".to_string(),
        other => other.to_string(),
    }
}

impl OpenAiToAnthropicConverter {
    ///
    /// Create a new OpenAI to Anthropic converter.
    ///
    /// # Arguments
    ///  * `log_level` - logging level for debug output
    ///
    /// # Returns
    ///  * New converter instance
    pub fn new(log_level: LogLevel) -> Self {
        Self { log_level }
    }

    ///
    /// Convert an OpenAI response to Anthropic response format.
    ///
    /// The reported `model` is the declared output model, not whatever the
    /// upstream believes it is serving.
    ///
    /// # Arguments
    ///  * `response` - OpenAI response from the backend
    ///  * `output_model` - model name to declare to the client
    ///
    /// # Returns
    ///  * Converted Anthropic response
    pub fn convert(&self, response: OpenAiResponse, output_model: &str) -> AnthropicResponse {
        let mut content: Vec<AnthropicContentBlock> = Vec::new();
        let mut inline_tool_calls = false;
        let mut finish_reason: Option<String> = None;

        if let Some(choice) = response.choices.into_iter().next() {
            finish_reason = choice.finish_reason;

            if let Some(text) = choice.message.content {
                if text.contains(TOOL_CALLS_MARKER) {
                    inline_tool_calls = self.recover_inline_tool_calls(&text, &mut content);
                } else if !text.is_empty() {
                    content.push(AnthropicContentBlock::Text { text });
                }
            }

            if let Some(tool_calls) = choice.message.tool_calls {
                self.debug(&format!(
                    "Response carries {} structured tool call(s)",
                    tool_calls.len()
                ));
                for call in tool_calls {
                    content.push(tool_use_block(call));
                }
            }
        }

        if content.is_empty() {
            content.push(AnthropicContentBlock::Text { text: String::new() });
        }

        let stop_reason = if inline_tool_calls {
            Some("tool_use".to_string())
        } else {
            finish_reason.map(|r| map_stop_reason(&r))
        };

        let usage = response.usage.unwrap_or_default();

        AnthropicResponse {
            id: if response.id.is_empty() {
                format!("msg_{}", chrono::Utc::now().timestamp_millis())
            } else {
                response.id
            },
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content,
            model: output_model.to_string(),
            stop_reason,
            stop_sequence: None,
            usage: AnthropicUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        }
    }

    ///
    /// Recover tool_use blocks from inline `[TOOL_CALLS]` text.
    ///
    /// Text preceding the first marker is kept as a text block; each parsed
    /// call gets a synthesized 9-alphanumeric ID.
    ///
    /// # Arguments
    ///  * `text` - content text containing the marker
    ///  * `content` - output block list
    ///
    /// # Returns
    ///  * `true` when at least one call was recovered
    fn recover_inline_tool_calls(
        &self,
        text: &str,
        content: &mut Vec<AnthropicContentBlock>,
    ) -> bool {
        let prefix = text.split(TOOL_CALLS_MARKER).next().unwrap_or("");
        if !prefix.trim().is_empty() {
            content.push(AnthropicContentBlock::Text { text: prefix.to_string() });
        }

        let calls = mistral::parse_tool_calls(text);
        if calls.is_empty() {
            self.debug("Marker present but no parsable inline tool calls");
            return false;
        }

        self.debug(&format!("Recovered {} inline tool call(s) from text", calls.len()));
        for (index, call) in calls.into_iter().enumerate() {
            content.push(AnthropicContentBlock::ToolUse {
                id: derive_tool_id(&format!("{}:{}", call.name, index)),
                name: call.name,
                input: call.arguments,
            });
        }
        true
    }

    ///
    /// Log debug message if trace logging is enabled.
    ///
    /// # Arguments
    ///  * `msg` - debug message to log
    pub(crate) fn debug(&self, msg: &str) {
        if self.log_level.is_trace_enabled() {
            tracing::debug!("[TRACE] {}", msg);
        }
    }
}

///
/// Build a tool_use block from a structured OpenAI tool call.
///
/// Arguments that fail to parse as JSON are preserved under a `raw` key
/// instead of being discarded.
fn tool_use_block(call: OpenAiToolCall) -> AnthropicContentBlock {
    let input = serde_json::from_str(&call.function.arguments)
        .unwrap_or_else(|_| json!({ "raw": call.function.arguments }));
    AnthropicContentBlock::ToolUse { id: call.id, name: call.function.name, input }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::openai::{
        OpenAiChoice, OpenAiFunctionCall, OpenAiResponseMessage, OpenAiUsage,
    };

    fn converter() -> OpenAiToAnthropicConverter {
        OpenAiToAnthropicConverter::new(LogLevel::Error)
    }

    fn response(message: OpenAiResponseMessage, finish_reason: &str) -> OpenAiResponse {
        OpenAiResponse {
            id: "c1".to_string(),
            object: Some("chat.completion".to_string()),
            created: Some(0),
            model: Some("devstral-small".to_string()),
            choices: vec![OpenAiChoice {
                index: 0,
                message,
                finish_reason: Some(finish_reason.to_string()),
            }],
            usage: Some(OpenAiUsage { prompt_tokens: 5, completion_tokens: 2, total_tokens: 7 }),
        }
    }

    #[test]
    fn test_simple_text_response() {
        let out = converter().convert(
            response(
                OpenAiResponseMessage {
                    role: "assistant".to_string(),
                    content: Some("Hello".to_string()),
                    tool_calls: None,
                },
                "stop",
            ),
            "claude-3",
        );

        assert_eq!(out.id, "c1");
        assert_eq!(out.response_type, "message");
        assert_eq!(out.role, "assistant");
        assert_eq!(out.model, "claude-3");
        assert_eq!(out.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(out.usage.input_tokens, 5);
        assert_eq!(out.usage.output_tokens, 2);
        assert!(matches!(
            &out.content[0],
            AnthropicContentBlock::Text { text } if text == "Hello"
        ));
    }

    #[test]
    fn test_structured_tool_calls_become_tool_use() {
        let out = converter().convert(
            response(
                OpenAiResponseMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: Some(vec![OpenAiToolCall {
                        id: "abc123def".to_string(),
                        call_type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: "bash".to_string(),
                            arguments: "{\"cmd\":\"ls\"}".to_string(),
                        },
                    }]),
                },
                "tool_calls",
            ),
            "claude-3",
        );

        assert_eq!(out.stop_reason.as_deref(), Some("tool_use"));
        match &out.content[0] {
            AnthropicContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "abc123def");
                assert_eq!(name, "bash");
                assert_eq!(input["cmd"], "ls");
            }
            _ => panic!("expected tool_use"),
        }
    }

    #[test]
    fn test_unparsable_arguments_kept_raw() {
        let out = converter().convert(
            response(
                OpenAiResponseMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: Some(vec![OpenAiToolCall {
                        id: "abc123def".to_string(),
                        call_type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: "bash".to_string(),
                            arguments: "not json".to_string(),
                        },
                    }]),
                },
                "tool_calls",
            ),
            "claude-3",
        );

        match &out.content[0] {
            AnthropicContentBlock::ToolUse { input, .. } => {
                assert_eq!(input["raw"], "not json");
            }
            _ => panic!("expected tool_use"),
        }
    }

    #[test]
    fn test_inline_tool_calls_recovered() {
        let out = converter().convert(
            response(
                OpenAiResponseMessage {
                    role: "assistant".to_string(),
                    content: Some("Let me search. [TOOL_CALLS]search{\"q\":\"rust\"}".to_string()),
                    tool_calls: None,
                },
                "stop",
            ),
            "claude-3",
        );

        assert_eq!(out.stop_reason.as_deref(), Some("tool_use"));
        assert!(matches!(
            &out.content[0],
            AnthropicContentBlock::Text { text } if text.starts_with("Let me search.")
        ));
        match &out.content[1] {
            AnthropicContentBlock::ToolUse { id, name, input } => {
                assert_eq!(name, "search");
                assert_eq!(input["q"], "rust");
                assert_eq!(id.len(), 9);
                assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));
            }
            _ => panic!("expected tool_use"),
        }
    }

    #[test]
    fn test_empty_content_gets_empty_text_block() {
        let out = converter().convert(
            response(
                OpenAiResponseMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: None,
                },
                "stop",
            ),
            "claude-3",
        );
        assert_eq!(out.content.len(), 1);
        assert!(matches!(
            &out.content[0],
            AnthropicContentBlock::Text { text } if text.is_empty()
        ));
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(map_stop_reason("stop"), "end_turn");
        assert_eq!(map_stop_reason("tool_calls"), "tool_use");
        assert_eq!(map_stop_reason("length"), "max_tokens");
        assert_eq!(map_stop_reason("content_filter"), "content_filter");
    }

    #[test]
    fn test_missing_choices_yield_empty_message() {
        let out = converter().convert(
            OpenAiResponse {
                id: String::new(),
                object: None,
                created: None,
                model: None,
                choices: Vec::new(),
                usage: None,
            },
            "claude-3",
        );
        assert!(out.id.starts_with("msg_"));
        assert!(out.stop_reason.is_none());
        assert_eq!(out.usage.input_tokens, 0);
    }
}
