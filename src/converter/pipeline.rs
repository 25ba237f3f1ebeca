//!
//! Request pipeline for straight OpenAI traffic.
//!
//! Clients speaking the OpenAI dialect still need Mistral compatibility
//! fixes: 9-alphanumeric tool IDs, a legal trailing message, usage reporting
//! on streams, and image handling when no vision backend is available. Each
//! fix is a pure payload-in/payload-out function; [Pipeline] composes them.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::converter::mistral::{self, TOOL_CALLS_MARKER};
use crate::converter::tool_id::{derive_tool_id, normalize_request_tool_ids};
use crate::types::openai::{
    OpenAiContent, OpenAiContentPart, OpenAiFunctionCall, OpenAiMessage, OpenAiRequest,
    OpenAiResponse, OpenAiToolCall, StreamOptions,
};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Composition of pure request-normalization steps.
///
/// `Pipeline::new().step(f).step(g).run(payload)` applies `g(f(payload))`.
/// Every step takes the payload by value and returns a new one; nothing is
/// mutated in place.
pub struct Pipeline {
    /** the composed steps, applied in insertion order */
    steps: Vec<Box<dyn Fn(OpenAiRequest) -> OpenAiRequest + Send + Sync>>,
}

/* --- constants ------------------------------------------------------------------------------ */

/** Sentinel user message appended when the conversation ends on a bare assistant message */
pub const CONTINUE_SENTINEL: &str = "Continue.";

/* --- start of code -------------------------------------------------------------------------- */

impl Pipeline {
    ///
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    ///
    /// Append a step.
    ///
    /// # Arguments
    ///  * `step` - pure payload transformation
    ///
    /// # Returns
    ///  * The pipeline with the step appended
    pub fn step(
        mut self,
        step: impl Fn(OpenAiRequest) -> OpenAiRequest + Send + Sync + 'static,
    ) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    ///
    /// Run the payload through every step in order.
    ///
    /// # Arguments
    ///  * `request` - payload to transform
    ///
    /// # Returns
    ///  * The fully normalized payload
    pub fn run(&self, request: OpenAiRequest) -> OpenAiRequest {
        self.steps.iter().fold(request, |payload, step| step(payload))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

///
/// Build the standard Mistral-compatibility pipeline for OpenAI traffic.
///
/// # Arguments
///  * `target_model` - backend model name the outbound payload declares
///  * `strip_images` - whether image parts must be replaced (no vision backend)
///
/// # Returns
///  * The composed pipeline
pub fn mistral_request_pipeline(target_model: String, strip_images: bool) -> Pipeline {
    let mut pipeline = Pipeline::new()
        .step(normalize_request_tool_ids)
        .step(enforce_message_tail)
        .step(request_stream_usage)
        .step(move |mut request| {
            request.model = Some(target_model.clone());
            request
        });
    if strip_images {
        pipeline = pipeline.step(strip_image_parts);
    }
    pipeline
}

///
/// Enforce the trailing-message rule on a message list.
///
/// Mistral rejects a conversation ending on a bare assistant message; a
/// trailing `tool` message is a legal terminator, so nothing is appended
/// after one.
///
/// # Arguments
///  * `messages` - outbound OpenAI messages
pub fn ensure_legal_tail(messages: &mut Vec<OpenAiMessage>) {
    let needs_sentinel = matches!(
        messages.last(),
        Some(last) if last.role == "assistant"
            && last.tool_calls.as_ref().is_none_or(|calls| calls.is_empty())
    );

    if needs_sentinel {
        messages.push(OpenAiMessage {
            role: "user".to_string(),
            content: Some(OpenAiContent::Text(CONTINUE_SENTINEL.to_string())),
            tool_calls: None,
            tool_call_id: None,
        });
    }
}

///
/// Pipeline step: apply the trailing-message rule.
pub fn enforce_message_tail(mut request: OpenAiRequest) -> OpenAiRequest {
    ensure_legal_tail(&mut request.messages);
    request
}

///
/// Pipeline step: request usage reporting on streaming completions.
///
/// vLLM only appends the usage-bearing final chunk when asked.
pub fn request_stream_usage(mut request: OpenAiRequest) -> OpenAiRequest {
    if request.stream == Some(true) {
        request.stream_options = Some(StreamOptions { include_usage: true });
    }
    request
}

///
/// Pipeline step: replace image parts with textual placeholders.
///
/// Used when images are present but no vision backend is configured. Images
/// in conversation history become `[Image N - previously analyzed]`; images
/// in the last user message, which have no out-of-band description source,
/// become a bare `[Image N]`. No URL is ever fetched.
pub fn strip_image_parts(mut request: OpenAiRequest) -> OpenAiRequest {
    let last_user_index = request
        .messages
        .iter()
        .rposition(|m| m.role == "user")
        .unwrap_or(usize::MAX);

    let mut image_counter = 0usize;
    for (index, message) in request.messages.iter_mut().enumerate() {
        let Some(OpenAiContent::Parts(parts)) = &mut message.content else {
            continue;
        };

        let is_last_user = index == last_user_index;
        for part in parts.iter_mut() {
            if matches!(part, OpenAiContentPart::ImageUrl { .. }) {
                image_counter += 1;
                let placeholder = if is_last_user {
                    format!("[Image {}]", image_counter)
                } else {
                    format!("[Image {} - previously analyzed]", image_counter)
                };
                *part = OpenAiContentPart::Text { text: placeholder };
            }
        }
    }

    request
}

///
/// Fix a unary backend response for OpenAI clients.
///
/// When the backend emitted its tool calls inline as `[TOOL_CALLS]` text
/// rather than structured `tool_calls`, recover them: parsed calls move into
/// `tool_calls` with derived IDs, the content shrinks to the text preceding
/// the marker, and `finish_reason` becomes `tool_calls`.
///
/// # Arguments
///  * `response` - backend response
///
/// # Returns
///  * The response with inline tool calls structured
pub fn fix_inline_tool_calls(mut response: OpenAiResponse) -> OpenAiResponse {
    let Some(choice) = response.choices.first_mut() else {
        return response;
    };
    if choice.message.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty()) {
        return response;
    }
    let Some(content) = choice.message.content.as_ref() else {
        return response;
    };
    if !content.contains(TOOL_CALLS_MARKER) {
        return response;
    }

    let calls = mistral::parse_tool_calls(content);
    if calls.is_empty() {
        return response;
    }

    let prefix = content.split(TOOL_CALLS_MARKER).next().unwrap_or("").to_string();
    choice.message.content = if prefix.trim().is_empty() { None } else { Some(prefix) };
    choice.message.tool_calls = Some(
        calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| OpenAiToolCall {
                id: derive_tool_id(&format!("{}:{}", call.name, index)),
                call_type: "function".to_string(),
                function: OpenAiFunctionCall {
                    name: call.name,
                    arguments: call.arguments.to_string(),
                },
            })
            .collect(),
    );
    choice.finish_reason = Some("tool_calls".to_string());

    response
}
