//!
//! Format conversion modules for Anthropic and OpenAI API compatibility.
//!
//! The translation pipeline lives here: request conversion from the
//! Anthropic dialect, response conversion back to it, the OpenAI-to-OpenAI
//! normalization pipeline for straight OpenAI traffic, the incremental SSE
//! stream translator, and the tool-call helpers both directions share.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod anthropic_to_openai;
pub mod mistral;
pub mod openai_to_anthropic;
pub mod pipeline;
pub mod stream;
pub mod tool_id;

/* --- start of code -------------------------------------------------------------------------- */

pub use anthropic_to_openai::AnthropicToOpenAiConverter;
pub use openai_to_anthropic::OpenAiToAnthropicConverter;
pub use stream::StreamTranslator;
