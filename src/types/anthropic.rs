//!
//! Anthropic Messages API wire types.
//!
//! Request, response, and stream-event structures for the Anthropic dialect.
//! Content blocks are a tagged union with an untagged fallback so unknown
//! block types survive deserialization and can be wrapped as text downstream.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde::{Deserialize, Serialize};
use serde_json::Value;

/* --- request types --------------------------------------------------------------------------- */

///
/// Anthropic Messages API request structure.
///
/// Represents an incoming request in Anthropic's messages format. Contains
/// the conversation, optional system prompt, and optional tool definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    /** the model identifier requested by the client */
    pub model: String,
    /** maximum number of tokens to generate */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /** conversation messages array */
    pub messages: Vec<AnthropicMessage>,
    /** system prompt, either a string or a list of text parts */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    /** sampling temperature */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /** available tools for function calling */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    /** tool choice directive */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /** whether to stream the response */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

///
/// System prompt union type.
///
/// Anthropic clients send either a plain string or a list of text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    /** plain string system prompt */
    Text(String),
    /** list of text parts, joined with newlines on conversion */
    Blocks(Vec<SystemBlock>),
}

///
/// One text part of a block-style system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    /** the text content */
    pub text: String,
}

///
/// Anthropic message structure within a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /** message role: user or assistant */
    pub role: String,
    /** message content, either a string or structured blocks */
    pub content: MessageContent,
}

///
/// Message content union type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /** simple string content */
    Text(String),
    /** structured content blocks array */
    Blocks(Vec<AnthropicContentBlock>),
}

///
/// Anthropic content block union.
///
/// Tagged on `type`; the trailing untagged variant keeps unknown block types
/// as raw JSON so the request transformer can wrap them as text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    /** text content block */
    Text {
        /** the text content */
        text: String,
    },
    /** image content block */
    Image {
        /** image source information */
        source: ImageSource,
    },
    /** tool usage block for function calls */
    ToolUse {
        /** tool call identifier */
        id: String,
        /** function name */
        name: String,
        /** function input arguments */
        #[serde(default)]
        input: Value,
    },
    /** tool result block for function responses */
    ToolResult {
        /** corresponding tool use identifier */
        tool_use_id: String,
        /** tool execution result */
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultContent>,
        /** whether the tool reported an error */
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /** any block type this proxy does not model */
    #[serde(untagged)]
    Unknown(Value),
}

///
/// Tool result content union type.
///
/// Results arrive either as a plain string or a nested block list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /** simple string result */
    Text(String),
    /** structured block list result */
    Blocks(Vec<Value>),
}

///
/// Image source information for Anthropic image blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    /** source type identifier, e.g. base64 */
    #[serde(rename = "type")]
    pub source_type: String,
    /** image media type, e.g. image/png */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /** base64-encoded image bytes */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /** image URL for url-type sources */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

///
/// Anthropic tool definition for function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    /** function name */
    pub name: String,
    /** function description */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /** function input schema */
    #[serde(default)]
    pub input_schema: Value,
}

/* --- response types -------------------------------------------------------------------------- */

///
/// Token usage record in Anthropic form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnthropicUsage {
    /** tokens consumed by the prompt */
    pub input_tokens: u32,
    /** tokens generated in the completion */
    pub output_tokens: u32,
}

///
/// Anthropic Messages API response structure.
///
/// Also doubles as the `message` stub inside `message_start` stream events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicResponse {
    /** response identifier */
    pub id: String,
    /** object type, always "message" */
    #[serde(rename = "type")]
    pub response_type: String,
    /** responder role, always "assistant" */
    pub role: String,
    /** response content blocks */
    pub content: Vec<AnthropicContentBlock>,
    /** the declared output model name */
    pub model: String,
    /** why generation stopped */
    pub stop_reason: Option<String>,
    /** matched stop sequence, if any */
    pub stop_sequence: Option<String>,
    /** token usage */
    pub usage: AnthropicUsage,
}

/* --- stream event types ---------------------------------------------------------------------- */

///
/// Delta payload of a `message_delta` stream event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDelta {
    /** final stop reason */
    pub stop_reason: Option<String>,
    /** matched stop sequence, if any */
    pub stop_sequence: Option<String>,
}

///
/// Content delta union for `content_block_delta` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /** incremental text */
    TextDelta {
        /** the text fragment */
        text: String,
    },
    /** incremental tool input JSON */
    InputJsonDelta {
        /** the partial JSON fragment */
        partial_json: String,
    },
}

///
/// Error body carried by an SSE `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicErrorBody {
    /** error type discriminator, e.g. api_error */
    #[serde(rename = "type")]
    pub error_type: String,
    /** human-readable message */
    pub message: String,
}

///
/// Anthropic SSE stream event union.
///
/// The tagged form matches the `data:` JSON of each frame; the SSE `event:`
/// line uses [AnthropicStreamEvent::event_name].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    /** initial event carrying the usage stub */
    MessageStart {
        /** message stub with estimated input tokens */
        message: AnthropicResponse,
    },
    /** opens a content block at an index */
    ContentBlockStart {
        /** block index */
        index: usize,
        /** the opened block (empty text or tool_use header) */
        content_block: AnthropicContentBlock,
    },
    /** incremental content for an open block */
    ContentBlockDelta {
        /** block index */
        index: usize,
        /** the delta payload */
        delta: ContentDelta,
    },
    /** closes a content block at an index */
    ContentBlockStop {
        /** block index */
        index: usize,
    },
    /** final stop reason and cumulative usage */
    MessageDelta {
        /** stop reason delta */
        delta: MessageDelta,
        /** cumulative usage */
        usage: AnthropicUsage,
    },
    /** terminal event */
    MessageStop,
    /** keepalive */
    Ping,
    /** mid-stream error */
    Error {
        /** structured error body */
        error: AnthropicErrorBody,
    },
}

/* --- start of code -------------------------------------------------------------------------- */

impl AnthropicStreamEvent {
    ///
    /// SSE `event:` line name for this event.
    ///
    /// # Returns
    ///  * Static event type string matching the `type` tag
    pub fn event_name(&self) -> &'static str {
        match self {
            AnthropicStreamEvent::MessageStart { .. } => "message_start",
            AnthropicStreamEvent::ContentBlockStart { .. } => "content_block_start",
            AnthropicStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            AnthropicStreamEvent::ContentBlockStop { .. } => "content_block_stop",
            AnthropicStreamEvent::MessageDelta { .. } => "message_delta",
            AnthropicStreamEvent::MessageStop => "message_stop",
            AnthropicStreamEvent::Ping => "ping",
            AnthropicStreamEvent::Error { .. } => "error",
        }
    }
}

impl AnthropicResponse {
    ///
    /// Build the empty message stub used by `message_start`.
    ///
    /// # Arguments
    ///  * `id` - message identifier
    ///  * `model` - declared output model name
    ///  * `input_tokens` - estimated prompt token count
    ///
    /// # Returns
    ///  * Message stub with zero output tokens and no content
    pub fn stream_stub(id: String, model: String, input_tokens: u32) -> Self {
        Self {
            id,
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content: Vec::new(),
            model,
            stop_reason: None,
            stop_sequence: None,
            usage: AnthropicUsage { input_tokens, output_tokens: 0 },
        }
    }
}
