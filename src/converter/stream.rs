//!
//! Incremental stream translator: OpenAI SSE in, Anthropic SSE out.
//!
//! A pure state machine driven by `start()` / `feed(chunk)` / `finish()`,
//! which makes it unit-testable with synthetic input traces. It reassembles
//! SSE lines from raw text chunks, converts each OpenAI delta into Anthropic
//! events with correct framing, and - for Mistral-family backends - buffers
//! just enough text to detect inline `[TOOL_CALLS]` sequences before any of
//! that text reaches the client.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::BTreeMap;

use serde_json::Value;

use crate::converter::mistral::{self, TOOL_CALLS_MARKER};
use crate::converter::openai_to_anthropic::map_stop_reason;
use crate::converter::tool_id::derive_tool_id;
use crate::types::anthropic::{
    AnthropicContentBlock, AnthropicErrorBody, AnthropicResponse, AnthropicStreamEvent,
    AnthropicUsage, ContentDelta, MessageDelta,
};
use crate::types::openai::{OpenAiStreamChunk, OpenAiStreamToolCall, OpenAiUsage};

/* --- types ----------------------------------------------------------------------------------- */

///
/// State machine translating an OpenAI SSE stream into Anthropic SSE events.
///
/// One translator serves exactly one request. The caller writes events in
/// the order they are returned; the translator guarantees the emitted
/// sequence is a well-formed Anthropic message stream: one `message_start`,
/// balanced `content_block_start`/`stop` pairs per index, one `message_delta`
/// and one `message_stop` at the end.
pub struct StreamTranslator {
    /** declared output model for the message stub */
    model: String,
    /** message identifier for the stub */
    message_id: String,
    /** estimated input tokens, reported in message_start */
    input_tokens_estimate: u32,
    /** whether the backend model warrants inline tool-call detection */
    mistral_mode: bool,

    /** partial SSE line held across feed() calls */
    line_buffer: String,
    /** next unassigned content block index */
    next_index: usize,
    /** index of the currently open text block */
    text_index: Option<usize>,
    /** upstream tool slot -> anthropic block index */
    tool_blocks: BTreeMap<usize, usize>,
    /** base index assigned to tool slot 0 */
    tool_base_index: Option<usize>,

    /** sliding text window for inline tool-call detection */
    text_window: String,
    /** set once the marker has been seen in the window */
    mistral_inline: bool,

    /** locally counted output tokens (one per text delta) */
    local_output_tokens: u32,
    /** usage from the usage-bearing upstream chunk */
    usage: Option<OpenAiUsage>,
    /** final stop reason, fixed when finish_reason is observed */
    stop_reason: Option<String>,
    /** finish_reason was observed and all blocks are closed */
    blocks_closed: bool,
    /** message_delta + message_stop have been emitted */
    final_emitted: bool,
    /** an upstream error frame was seen; no further output */
    errored: bool,
}

/* --- constants ------------------------------------------------------------------------------ */

/** Characters of text retained while watching for the inline marker.
Must be at least the marker length so a split marker is never emitted. */
const SAFE_TEXT_WINDOW: usize = 20;

/** Model name substrings that enable inline tool-call detection */
const MISTRAL_MODEL_HINTS: [&str; 3] = ["mistral", "devstral", "codestral"];

/* --- start of code -------------------------------------------------------------------------- */

const _: () = assert!(SAFE_TEXT_WINDOW >= TOOL_CALLS_MARKER.len());

impl StreamTranslator {
    ///
    /// Create a translator for one streaming request.
    ///
    /// # Arguments
    ///  * `message_id` - identifier for the client-facing message
    ///  * `model` - declared output model name
    ///  * `backend_model` - backend model name, checked for Mistral hints
    ///  * `input_tokens_estimate` - precomputed prompt token estimate
    ///
    /// # Returns
    ///  * New translator in its initial state
    pub fn new(
        message_id: String,
        model: String,
        backend_model: &str,
        input_tokens_estimate: u32,
    ) -> Self {
        let lowered = backend_model.to_lowercase();
        let mistral_mode = MISTRAL_MODEL_HINTS.iter().any(|hint| lowered.contains(hint));

        Self {
            model,
            message_id,
            input_tokens_estimate,
            mistral_mode,
            line_buffer: String::new(),
            next_index: 0,
            text_index: None,
            tool_blocks: BTreeMap::new(),
            tool_base_index: None,
            text_window: String::new(),
            mistral_inline: false,
            local_output_tokens: 0,
            usage: None,
            stop_reason: None,
            blocks_closed: false,
            final_emitted: false,
            errored: false,
        }
    }

    ///
    /// Emit the opening `message_start` event.
    ///
    /// Called once, before any upstream data is fed.
    ///
    /// # Returns
    ///  * The message_start event carrying the input token estimate
    pub fn start(&self) -> AnthropicStreamEvent {
        AnthropicStreamEvent::MessageStart {
            message: AnthropicResponse::stream_stub(
                self.message_id.clone(),
                self.model.clone(),
                self.input_tokens_estimate,
            ),
        }
    }

    ///
    /// Feed a raw upstream chunk, returning the translated events.
    ///
    /// Chunks are arbitrary UTF-8 slices of the SSE byte stream; incomplete
    /// lines are held until completed by a later chunk. Lines that are not
    /// `data: ` lines, the `[DONE]` sentinel, and malformed JSON all produce
    /// no output.
    ///
    /// # Arguments
    ///  * `chunk` - decoded upstream bytes
    ///
    /// # Returns
    ///  * Zero or more Anthropic events, in emission order
    pub fn feed(&mut self, chunk: &str) -> Vec<AnthropicStreamEvent> {
        let mut events = Vec::new();
        if self.errored || self.final_emitted {
            return events;
        }

        self.line_buffer.push_str(chunk);
        for line in take_complete_lines(&mut self.line_buffer) {
            self.process_line(&line, &mut events);
            if self.errored {
                break;
            }
        }
        events
    }

    ///
    /// Close the stream, returning any trailing events.
    ///
    /// Handles streams that end without a usage chunk (or without any
    /// finish_reason at all): remaining buffered text is flushed, open
    /// blocks are closed, and the final `message_delta` + `message_stop`
    /// pair is emitted exactly once.
    ///
    /// # Returns
    ///  * Trailing Anthropic events
    pub fn finish(&mut self) -> Vec<AnthropicStreamEvent> {
        let mut events = Vec::new();
        if self.errored || self.final_emitted {
            return events;
        }

        if !self.blocks_closed {
            self.close_content(&mut events);
            if self.stop_reason.is_none() {
                self.stop_reason = Some("end_turn".to_string());
            }
        }
        self.emit_final(&mut events);
        events
    }

    ///
    /// Process one complete SSE line.
    fn process_line(&mut self, line: &str, events: &mut Vec<AnthropicStreamEvent>) {
        if self.final_emitted {
            return;
        }
        let Some(data) = line.strip_prefix("data: ") else {
            return;
        };
        let data = data.trim_end_matches('\r');
        if data == "[DONE]" {
            return;
        }

        // malformed data lines are skipped, never fatal
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            return;
        };

        if let Some(error) = value.get("error") {
            self.errored = true;
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            events.push(AnthropicStreamEvent::Error {
                error: AnthropicErrorBody { error_type: "api_error".to_string(), message },
            });
            return;
        }

        let Ok(chunk) = serde_json::from_value::<OpenAiStreamChunk>(value) else {
            return;
        };
        self.process_chunk(chunk, events);
    }

    ///
    /// Translate one parsed upstream chunk.
    fn process_chunk(&mut self, chunk: OpenAiStreamChunk, events: &mut Vec<AnthropicStreamEvent>) {
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(text) = choice.delta.content {
                if !text.is_empty() {
                    self.handle_text(&text, events);
                }
            }

            if let Some(tool_calls) = choice.delta.tool_calls {
                for call in &tool_calls {
                    self.handle_tool_delta(call, events);
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.handle_finish(&reason, events);
            }
        }

        if self.blocks_closed && self.usage.is_some() {
            self.emit_final(events);
        }
    }

    ///
    /// Handle an incremental text delta.
    ///
    /// In Mistral mode text is routed through the sliding window so the
    /// inline marker can be detected before anything is emitted; otherwise
    /// it streams straight through.
    fn handle_text(&mut self, text: &str, events: &mut Vec<AnthropicStreamEvent>) {
        self.local_output_tokens += 1;

        if !self.mistral_mode {
            self.emit_text(text, events);
            return;
        }
        if self.mistral_inline {
            self.text_window.push_str(text);
            return;
        }

        self.text_window.push_str(text);
        if self.text_window.contains(TOOL_CALLS_MARKER) {
            self.mistral_inline = true;
            return;
        }

        let window_chars = self.text_window.chars().count();
        if window_chars > SAFE_TEXT_WINDOW {
            let split = nth_char_boundary_from_end(&self.text_window, SAFE_TEXT_WINDOW);
            let tail = self.text_window.split_off(split);
            let prefix = std::mem::replace(&mut self.text_window, tail);
            self.emit_text(&prefix, events);
        }
    }

    ///
    /// Emit a text delta, opening the text block first when needed.
    fn emit_text(&mut self, text: &str, events: &mut Vec<AnthropicStreamEvent>) {
        let index = match self.text_index {
            Some(index) => index,
            None => {
                let index = self.next_index;
                self.next_index += 1;
                self.text_index = Some(index);
                events.push(AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: AnthropicContentBlock::Text { text: String::new() },
                });
                index
            }
        };
        events.push(AnthropicStreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta { text: text.to_string() },
        });
    }

    ///
    /// Handle a structured tool-call delta fragment.
    ///
    /// The first fragment of a slot opens its block; later fragments only
    /// append arguments JSON.
    fn handle_tool_delta(
        &mut self,
        call: &OpenAiStreamToolCall,
        events: &mut Vec<AnthropicStreamEvent>,
    ) {
        let slot = call.index;

        if !self.tool_blocks.contains_key(&slot) {
            // text that was buffered for marker detection is real text
            if !self.mistral_inline && !self.text_window.is_empty() {
                let pending = std::mem::take(&mut self.text_window);
                self.emit_text(&pending, events);
            }
            self.close_text_block(events);

            let base = *self.tool_base_index.get_or_insert(self.next_index);
            let index = base + slot;
            self.next_index = self.next_index.max(index + 1);
            self.tool_blocks.insert(slot, index);

            let name = call
                .function
                .as_ref()
                .and_then(|f| f.name.clone())
                .unwrap_or_default();
            let id = call
                .id
                .clone()
                .unwrap_or_else(|| derive_tool_id(&format!("{}:{}", name, slot)));

            events.push(AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block: AnthropicContentBlock::ToolUse {
                    id,
                    name,
                    input: Value::Object(serde_json::Map::new()),
                },
            });
        }

        if let Some(arguments) = call.function.as_ref().and_then(|f| f.arguments.as_ref()) {
            if !arguments.is_empty() {
                let index = self.tool_blocks[&slot];
                events.push(AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::InputJsonDelta { partial_json: arguments.clone() },
                });
            }
        }
    }

    ///
    /// Handle the upstream finish_reason.
    ///
    /// Closes content and fixes the final stop reason; the terminal event
    /// pair waits for the usage-bearing chunk (or stream end).
    fn handle_finish(&mut self, reason: &str, events: &mut Vec<AnthropicStreamEvent>) {
        if self.blocks_closed {
            return;
        }
        self.close_content(events);

        if self.stop_reason.is_none() {
            self.stop_reason = Some(map_stop_reason(reason));
        }
    }

    ///
    /// Flush buffers and close every open content block.
    ///
    /// When the inline marker was detected, the buffered text is parsed and
    /// re-emitted as tool_use blocks instead of text; the stop reason then
    /// becomes `tool_use` regardless of what the upstream reported.
    fn close_content(&mut self, events: &mut Vec<AnthropicStreamEvent>) {
        if self.mistral_inline {
            let buffered = std::mem::take(&mut self.text_window);
            let calls = mistral::parse_tool_calls(&buffered);
            if calls.is_empty() {
                // marker without a parsable call: surface the raw text
                self.emit_text(&buffered, events);
            } else {
                let prefix = buffered.split(TOOL_CALLS_MARKER).next().unwrap_or("");
                if !prefix.is_empty() {
                    self.emit_text(prefix, events);
                }
                self.close_text_block(events);
                for (position, call) in calls.into_iter().enumerate() {
                    let index = self.next_index;
                    self.next_index += 1;
                    events.push(AnthropicStreamEvent::ContentBlockStart {
                        index,
                        content_block: AnthropicContentBlock::ToolUse {
                            id: derive_tool_id(&format!("{}:{}", call.name, position)),
                            name: call.name,
                            input: call.arguments,
                        },
                    });
                    events.push(AnthropicStreamEvent::ContentBlockStop { index });
                }
                self.stop_reason = Some("tool_use".to_string());
            }
        } else if !self.text_window.is_empty() {
            let pending = std::mem::take(&mut self.text_window);
            self.emit_text(&pending, events);
        }

        self.close_text_block(events);
        for index in std::mem::take(&mut self.tool_blocks).into_values() {
            events.push(AnthropicStreamEvent::ContentBlockStop { index });
        }
        self.blocks_closed = true;
    }

    ///
    /// Close the text block if one is open.
    fn close_text_block(&mut self, events: &mut Vec<AnthropicStreamEvent>) {
        if let Some(index) = self.text_index.take() {
            events.push(AnthropicStreamEvent::ContentBlockStop { index });
        }
    }

    ///
    /// Emit the terminal `message_delta` + `message_stop` pair once.
    ///
    /// Upstream completion counts are sometimes incomplete in streaming
    /// mode, so output_tokens is the larger of the local counter and the
    /// upstream figure.
    fn emit_final(&mut self, events: &mut Vec<AnthropicStreamEvent>) {
        if self.final_emitted {
            return;
        }
        self.final_emitted = true;

        let upstream = self.usage.clone().unwrap_or_default();
        let input_tokens = if upstream.prompt_tokens > 0 {
            upstream.prompt_tokens
        } else {
            self.input_tokens_estimate
        };
        let output_tokens = self.local_output_tokens.max(upstream.completion_tokens);

        events.push(AnthropicStreamEvent::MessageDelta {
            delta: MessageDelta { stop_reason: self.stop_reason.clone(), stop_sequence: None },
            usage: AnthropicUsage { input_tokens, output_tokens },
        });
        events.push(AnthropicStreamEvent::MessageStop);
    }
}

///
/// Pull every completed line out of the buffer, leaving a trailing partial.
///
/// # Arguments
///  * `buffer` - accumulated stream text
///
/// # Returns
///  * Complete lines without their newline terminators
fn take_complete_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(newline) = buffer.find('\n') {
        let rest = buffer.split_off(newline + 1);
        let mut line = std::mem::replace(buffer, rest);
        line.truncate(line.len() - 1);
        lines.push(line);
    }
    lines
}

///
/// Byte index of the boundary `n` characters from the end of the string.
///
/// Returns 0 when the string has `n` or fewer characters.
fn nth_char_boundary_from_end(text: &str, n: usize) -> usize {
    text.char_indices().rev().nth(n.saturating_sub(1)).map(|(idx, _)| idx).unwrap_or(0)
}
