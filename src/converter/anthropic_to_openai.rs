//!
//! Anthropic to OpenAI format converter for API request translation.
//!
//! Converts Anthropic Messages API requests into OpenAI chat completion
//! requests acceptable to a Mistral-family backend. Beyond the structural
//! mapping this enforces Mistral's sequence rules: normalized 9-alphanumeric
//! tool IDs, no user message between a tool message and the next assistant
//! turn, and a `user: "Continue."` sentinel when the conversation would
//! otherwise end on a bare assistant message.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde_json::Value;

use crate::config::LogLevel;
use crate::converter::pipeline::ensure_legal_tail;
use crate::converter::tool_id::{ToolIdMap, sanitize_tool_name};
use crate::error::{ProxyError, Result};
use crate::types::anthropic::{
    AnthropicContentBlock, AnthropicMessage, AnthropicRequest, MessageContent, SystemPrompt,
    ToolResultContent,
};
use crate::types::openai::{
    OpenAiContent, OpenAiContentPart, OpenAiFunctionCall, OpenAiImageUrl, OpenAiMessage,
    OpenAiRequest, OpenAiTool, OpenAiToolCall, OpenAiToolFunction, StreamOptions,
};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Converter from Anthropic request format to OpenAI request format.
///
/// Handles only this conversion direction; the response direction lives in
/// [crate::converter::openai_to_anthropic].
pub struct AnthropicToOpenAiConverter {
    /** logging level for debug output */
    log_level: LogLevel,
}

/* --- constants ------------------------------------------------------------------------------ */

/** Default maximum tokens when the client omits max_tokens */
const DEFAULT_MAX_TOKENS: u32 = 8192;

/** System instruction prepended when the vision backend is selected */
const VISION_SYSTEM_PROMPT: &str =
    "You can see and analyze images. Describe what you observe precisely and answer questions \
     about image content directly.";

/* --- start of code -------------------------------------------------------------------------- */

impl AnthropicToOpenAiConverter {
    ///
    /// Create a new Anthropic to OpenAI converter.
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
    /// Convert an Anthropic request to OpenAI request format.
    ///
    /// The returned payload targets `target_model` (the backend's model name,
    /// not the client's). When `vision` is set, a fixed vision instruction is
    /// prepended before the client's own system prompt.
    ///
    /// # Arguments
    ///  * `request` - Anthropic request to convert
    ///  * `target_model` - backend model identifier for the outbound payload
    ///  * `vision` - whether the vision backend was selected
    ///
    /// # Returns
    ///  * Converted OpenAI request
    ///  * `ProxyError::Validation` on roles the Anthropic dialect does not allow
    pub fn convert(
        &self,
        request: AnthropicRequest,
        target_model: &str,
        vision: bool,
    ) -> Result<OpenAiRequest> {
        self.debug(&format!(
            "Converting {} message(s) from Anthropic to OpenAI format",
            request.messages.len()
        ));

        let mut messages = Vec::new();
        self.push_system_messages(&mut messages, request.system.as_ref(), vision);

        let ids = self.collect_tool_ids(&request.messages);
        for message in &request.messages {
            self.convert_message(message, &ids, &mut messages)?;
        }

        ensure_legal_tail(&mut messages);

        let streaming = request.stream.unwrap_or(false);
        let tools = self.convert_tools(request.tools);
        let tool_choice = request.tool_choice.and_then(convert_tool_choice);

        let outbound = OpenAiRequest {
            model: Some(target_model.to_string()),
            messages,
            max_tokens: Some(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
            temperature: request.temperature,
            stream: if streaming { Some(true) } else { None },
            stream_options: if streaming { Some(StreamOptions { include_usage: true }) } else { None },
            tools,
            tool_choice,
            extra: Default::default(),
        };

        self.debug(&format!(
            "Converted OpenAI request with {} messages",
            outbound.messages.len()
        ));

        Ok(outbound)
    }

    ///
    /// Emit leading system messages.
    ///
    /// The vision instruction (when requested) comes first, then the client's
    /// system prompt: strings pass through, block lists are newline-joined.
    ///
    /// # Arguments
    ///  * `messages` - output OpenAI messages
    ///  * `system` - the client's system prompt, if any
    ///  * `vision` - whether to prepend the vision instruction
    fn push_system_messages(
        &self,
        messages: &mut Vec<OpenAiMessage>,
        system: Option<&SystemPrompt>,
        vision: bool,
    ) {
        if vision {
            messages.push(text_message("system", VISION_SYSTEM_PROMPT.to_string()));
        }

        let text = match system {
            Some(SystemPrompt::Text(text)) => Some(text.clone()),
            Some(SystemPrompt::Blocks(blocks)) => {
                Some(blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join("\n"))
            }
            None => None,
        };

        if let Some(text) = text {
            if !text.is_empty() {
                messages.push(text_message("system", text));
            }
        }
    }

    ///
    /// First sweep: record every tool_use ID in the conversation.
    ///
    /// # Arguments
    ///  * `messages` - Anthropic messages to scan
    ///
    /// # Returns
    ///  * Request-scoped ID map used while rewriting tool_result references
    fn collect_tool_ids(&self, messages: &[AnthropicMessage]) -> ToolIdMap {
        let mut ids = ToolIdMap::new();
        for message in messages {
            if let MessageContent::Blocks(blocks) = &message.content {
                for block in blocks {
                    if let AnthropicContentBlock::ToolUse { id, .. } = block {
                        ids.record(id);
                    }
                }
            }
        }
        ids
    }

    ///
    /// Convert one Anthropic message, appending the resulting OpenAI messages.
    ///
    /// A single Anthropic message may expand into several OpenAI messages
    /// (one `tool` message per tool_result block).
    ///
    /// # Arguments
    ///  * `message` - Anthropic message to convert
    ///  * `ids` - request-scoped tool ID map
    ///  * `messages` - output OpenAI messages
    ///
    /// # Returns
    ///  * `Ok(())` on success
    ///  * `ProxyError::Validation` on an unknown role
    fn convert_message(
        &self,
        message: &AnthropicMessage,
        ids: &ToolIdMap,
        messages: &mut Vec<OpenAiMessage>,
    ) -> Result<()> {
        match (message.role.as_str(), &message.content) {
            ("user" | "assistant", MessageContent::Text(text)) => {
                messages.push(text_message(&message.role, text.clone()));
            }
            ("assistant", MessageContent::Blocks(blocks)) => {
                messages.push(self.convert_assistant_blocks(blocks, ids));
            }
            ("user", MessageContent::Blocks(blocks)) => {
                self.convert_user_blocks(blocks, ids, messages);
            }
            (role, _) => {
                return Err(ProxyError::Validation(format!("Unknown message role: {}", role)));
            }
        }
        Ok(())
    }

    ///
    /// Convert an assistant block list into one OpenAI assistant message.
    ///
    /// Text blocks merge into a single body (null when absent); tool_use
    /// blocks become `tool_calls` entries with normalized IDs and sanitized
    /// names. Unknown blocks join the text body as their JSON serialization.
    ///
    /// # Arguments
    ///  * `blocks` - assistant content blocks
    ///  * `ids` - request-scoped tool ID map
    ///
    /// # Returns
    ///  * The converted assistant message
    fn convert_assistant_blocks(
        &self,
        blocks: &[AnthropicContentBlock],
        ids: &ToolIdMap,
    ) -> OpenAiMessage {
        let mut text_parts: Vec<String> = Vec::new();
        let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();

        for block in blocks {
            match block {
                AnthropicContentBlock::Text { text } => {
                    if !text.is_empty() {
                        text_parts.push(text.clone());
                    }
                }
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    let arguments = if input.is_null() {
                        "{}".to_string()
                    } else {
                        serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string())
                    };
                    tool_calls.push(OpenAiToolCall {
                        id: ids.resolve(id),
                        call_type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: sanitize_tool_name(name),
                            arguments,
                        },
                    });
                }
                other => {
                    if let Ok(json) = serde_json::to_string(other) {
                        text_parts.push(json);
                    }
                }
            }
        }

        if !tool_calls.is_empty() {
            self.debug(&format!("Assistant message carries {} tool call(s)", tool_calls.len()));
        }

        OpenAiMessage {
            role: "assistant".to_string(),
            content: if text_parts.is_empty() {
                None
            } else {
                Some(OpenAiContent::Text(text_parts.join("\n")))
            },
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id: None,
        }
    }

    ///
    /// Convert a user block list, appending the resulting messages.
    ///
    /// When the message carries tool_result blocks, each becomes its own
    /// `tool` message and every other block is dropped: a `user` message may
    /// not appear between a `tool` message and the next assistant turn under
    /// Mistral's sequence rules. Otherwise text, image, and unknown blocks
    /// form one user message.
    ///
    /// # Arguments
    ///  * `blocks` - user content blocks
    ///  * `ids` - request-scoped tool ID map
    ///  * `messages` - output OpenAI messages
    fn convert_user_blocks(
        &self,
        blocks: &[AnthropicContentBlock],
        ids: &ToolIdMap,
        messages: &mut Vec<OpenAiMessage>,
    ) {
        let has_tool_results =
            blocks.iter().any(|b| matches!(b, AnthropicContentBlock::ToolResult { .. }));

        if has_tool_results {
            for block in blocks {
                if let AnthropicContentBlock::ToolResult { tool_use_id, content, .. } = block {
                    messages.push(OpenAiMessage {
                        role: "tool".to_string(),
                        content: Some(OpenAiContent::Text(tool_result_text(content))),
                        tool_calls: None,
                        tool_call_id: Some(ids.resolve(tool_use_id)),
                    });
                }
            }
            return;
        }

        let mut parts: Vec<OpenAiContentPart> = Vec::new();
        let mut all_text = true;

        for block in blocks {
            match block {
                AnthropicContentBlock::Text { text } => {
                    parts.push(OpenAiContentPart::Text { text: text.clone() });
                }
                AnthropicContentBlock::Image { source } => {
                    if let Some(url) = image_to_url(source) {
                        parts.push(OpenAiContentPart::ImageUrl {
                            image_url: OpenAiImageUrl { url },
                        });
                        all_text = false;
                    }
                }
                other => {
                    if let Ok(json) = serde_json::to_string(other) {
                        parts.push(OpenAiContentPart::Text { text: json });
                    }
                }
            }
        }

        let content = if all_text {
            let text = parts
                .iter()
                .filter_map(|p| match p {
                    OpenAiContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            OpenAiContent::Text(text)
        } else {
            OpenAiContent::Parts(parts)
        };

        messages.push(OpenAiMessage {
            role: "user".to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    ///
    /// Convert Anthropic tools to OpenAI tool definitions.
    ///
    /// # Arguments
    ///  * `tools` - optional Anthropic tools to convert
    ///
    /// # Returns
    ///  * Converted OpenAI tools, None when absent or empty
    fn convert_tools(
        &self,
        tools: Option<Vec<crate::types::anthropic::AnthropicTool>>,
    ) -> Option<Vec<OpenAiTool>> {
        let tools = tools?;
        if tools.is_empty() {
            return None;
        }

        self.debug(&format!("Converting {} tool(s) to OpenAI format", tools.len()));
        Some(
            tools
                .into_iter()
                .map(|tool| OpenAiTool {
                    tool_type: "function".to_string(),
                    function: OpenAiToolFunction {
                        name: sanitize_tool_name(&tool.name),
                        description: tool.description,
                        parameters: tool.input_schema,
                    },
                })
                .collect(),
        )
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
/// Build a plain text message for a role.
fn text_message(role: &str, text: String) -> OpenAiMessage {
    OpenAiMessage {
        role: role.to_string(),
        content: Some(OpenAiContent::Text(text)),
        tool_calls: None,
        tool_call_id: None,
    }
}

///
/// Flatten a tool result into the string body of a `tool` message.
///
/// Strings pass through; structured content is JSON-encoded.
fn tool_result_text(content: &Option<ToolResultContent>) -> String {
    match content {
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => {
            serde_json::to_string(blocks).unwrap_or_default()
        }
        None => String::new(),
    }
}

///
/// Turn an Anthropic image source into an OpenAI image URL.
///
/// Base64 sources become `data:<media_type>;base64,<data>` URLs; url-type
/// sources pass their URL through. Sources missing the needed fields yield
/// None and are dropped.
fn image_to_url(source: &crate::types::anthropic::ImageSource) -> Option<String> {
    if source.source_type == "url" {
        return source.url.clone();
    }
    let media_type = source.media_type.as_deref()?;
    let data = source.data.as_deref()?;
    Some(format!("data:{};base64,{}", media_type, data))
}

///
/// Map the Anthropic tool_choice directive to OpenAI form.
///
/// `auto` maps to `"auto"`, `any` to `"required"`, a named tool to the
/// function object form; anything else is omitted.
fn convert_tool_choice(choice: Value) -> Option<Value> {
    let choice_type = choice.get("type").and_then(Value::as_str)?;
    match choice_type {
        "auto" => Some(Value::String("auto".to_string())),
        "any" => Some(Value::String("required".to_string())),
        "tool" => {
            let name = choice.get("name").and_then(Value::as_str)?;
            Some(serde_json::json!({
                "type": "function",
                "function": { "name": name }
            }))
        }
        _ => None,
    }
}
