//!
//! OpenAI Chat Completions wire types.
//!
//! Request, response, and stream-chunk structures for the OpenAI dialect, as
//! consumed from clients and produced for the vLLM backend. Unknown request
//! fields (top_p, presence_penalty, ...) are preserved through a flattened
//! map so sampling parameters pass straight through to the backend.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/* --- request types --------------------------------------------------------------------------- */

///
/// OpenAI chat completion request structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiRequest {
    /** the model identifier to use for completion */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /** conversation messages array */
    pub messages: Vec<OpenAiMessage>,
    /** maximum number of tokens to generate */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /** sampling temperature for response generation */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /** whether to stream the response */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /** stream options, set when streaming to request usage in the final chunk */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    /** available tools for function calling */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAiTool>>,
    /** tool choice configuration, passed through verbatim */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /** any remaining request fields, forwarded untouched */
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

///
/// Stream options attached to streaming requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    /** ask the backend to append a usage-bearing final chunk */
    pub include_usage: bool,
}

///
/// OpenAI message structure within a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    /** message role: system, user, assistant, or tool */
    pub role: String,
    /** message content, string or structured parts */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<OpenAiContent>,
    /** tool calls made by the assistant */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    /** tool call ID for tool response messages */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

///
/// OpenAI content union type for flexible message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    /** simple string content */
    Text(String),
    /** structured content parts array */
    Parts(Vec<OpenAiContentPart>),
}

///
/// OpenAI structured content part for multimodal messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiContentPart {
    /** text part */
    Text {
        /** the text content */
        text: String,
    },
    /** image reference part */
    ImageUrl {
        /** the image URL payload */
        image_url: OpenAiImageUrl,
    },
    /** any part type this proxy does not model */
    #[serde(untagged)]
    Unknown(Value),
}

///
/// Image URL payload for image parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiImageUrl {
    /** the image URL, usually a data: URL */
    pub url: String,
}

///
/// OpenAI tool call structure for function invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    /** unique identifier for this tool call */
    pub id: String,
    /** tool call type, typically "function" */
    #[serde(rename = "type")]
    pub call_type: String,
    /** function call details */
    pub function: OpenAiFunctionCall,
}

///
/// OpenAI function call details within a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    /** function name to call */
    pub name: String,
    /** function arguments as JSON text */
    pub arguments: String,
}

///
/// OpenAI tool definition for available functions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiTool {
    /** tool type, typically "function" */
    #[serde(rename = "type")]
    pub tool_type: String,
    /** function definition and schema */
    pub function: OpenAiToolFunction,
}

///
/// OpenAI function definition within a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolFunction {
    /** function name */
    pub name: String,
    /** function description */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /** JSON schema for function parameters */
    #[serde(default)]
    pub parameters: Value,
}

/* --- response types -------------------------------------------------------------------------- */

///
/// Token usage record in OpenAI form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiUsage {
    /** tokens consumed by the prompt */
    #[serde(default)]
    pub prompt_tokens: u32,
    /** tokens generated in the completion */
    #[serde(default)]
    pub completion_tokens: u32,
    /** prompt + completion */
    #[serde(default)]
    pub total_tokens: u32,
}

///
/// OpenAI chat completion response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiResponse {
    /** response identifier */
    #[serde(default)]
    pub id: String,
    /** object type, chat.completion */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    /** creation timestamp */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    /** upstream model identifier */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /** response choices; the proxy only consumes the first */
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
    /** token usage */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<OpenAiUsage>,
}

///
/// One choice of a chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChoice {
    /** choice index */
    #[serde(default)]
    pub index: u32,
    /** the completion message */
    pub message: OpenAiResponseMessage,
    /** why generation stopped */
    #[serde(default)]
    pub finish_reason: Option<String>,
}

///
/// The assistant message of a completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiResponseMessage {
    /** responder role */
    #[serde(default = "default_assistant_role")]
    pub role: String,
    /** text content, possibly null */
    #[serde(default)]
    pub content: Option<String>,
    /** structured tool calls */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
}

/* --- stream chunk types ---------------------------------------------------------------------- */

///
/// One SSE chunk of a streaming chat completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiStreamChunk {
    /** chunk identifier */
    #[serde(default)]
    pub id: String,
    /** delta choices; empty on the usage-only final chunk */
    #[serde(default)]
    pub choices: Vec<OpenAiStreamChoice>,
    /** usage, present on the final chunk when include_usage was requested */
    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

///
/// One choice of a stream chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiStreamChoice {
    /** choice index */
    #[serde(default)]
    pub index: u32,
    /** the incremental delta */
    #[serde(default)]
    pub delta: OpenAiStreamDelta,
    /** why generation stopped, on the closing chunk */
    #[serde(default)]
    pub finish_reason: Option<String>,
}

///
/// Incremental delta within a stream choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiStreamDelta {
    /** responder role, present on the first chunk */
    #[serde(default)]
    pub role: Option<String>,
    /** incremental text content */
    #[serde(default)]
    pub content: Option<String>,
    /** incremental tool call fragments */
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

///
/// Incremental tool call fragment; `index` identifies the slot successive
/// `arguments` fragments append to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiStreamToolCall {
    /** tool call slot */
    #[serde(default)]
    pub index: usize,
    /** tool call identifier, present on the first fragment of a slot */
    #[serde(default)]
    pub id: Option<String>,
    /** tool call type */
    #[serde(rename = "type", default)]
    pub call_type: Option<String>,
    /** function fragment */
    #[serde(default)]
    pub function: Option<OpenAiStreamFunction>,
}

///
/// Function fragment of a streamed tool call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiStreamFunction {
    /** function name, present on the first fragment of a slot */
    #[serde(default)]
    pub name: Option<String>,
    /** incremental arguments JSON text */
    #[serde(default)]
    pub arguments: Option<String>,
}

/* --- start of code -------------------------------------------------------------------------- */

fn default_assistant_role() -> String {
    "assistant".to_string()
}

impl OpenAiContent {
    ///
    /// Flatten content to plain text where possible.
    ///
    /// Joins text parts with newlines; image and unknown parts are skipped.
    ///
    /// # Returns
    ///  * Concatenated text of the content
    pub fn to_text(&self) -> String {
        match self {
            OpenAiContent::Text(text) => text.clone(),
            OpenAiContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    OpenAiContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}
