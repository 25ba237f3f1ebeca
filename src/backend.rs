//!
//! Backend client and backend selection.
//!
//! Two wire operations against an OpenAI-compatible inference server: a JSON
//! POST and a raw streaming POST that yields UTF-8 chunks with partial code
//! points held across chunk boundaries. Auth composition distinguishes
//! trusted in-cluster backends from external ones, and the selector routes
//! image-bearing requests to the vision backend when one is configured.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::Value;

use crate::config::{BackendConfig, Config};
use crate::error::{ProxyError, Result};
use crate::types::anthropic::{AnthropicContentBlock, AnthropicRequest, MessageContent};
use crate::types::openai::{OpenAiContent, OpenAiContentPart, OpenAiRequest};

/* --- types ----------------------------------------------------------------------------------- */

///
/// HTTP client for upstream inference backends.
pub struct BackendClient {
    /** shared HTTP client */
    http: Client,
}

///
/// Decoded text stream from a streaming backend response.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

///
/// UTF-8 decoder that holds partial code points across chunk boundaries.
///
/// Network chunking can split a multi-byte character; a plain lossy decode
/// per chunk would corrupt it. Incomplete trailing bytes are retained until
/// the next chunk completes them; genuinely invalid sequences decode to the
/// replacement character.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    /** bytes held from the previous chunk */
    pending: Vec<u8>,
}

/* --- constants ------------------------------------------------------------------------------ */

/** HTTP client timeout in seconds */
const HTTP_CLIENT_TIMEOUT_SECS: u64 = 300;

/** Startup health probe deadline in seconds */
const PROBE_TIMEOUT_SECS: u64 = 5;

/** Host suffix marking a trusted in-cluster backend */
const INTERNAL_HOST_SUFFIX: &str = ".cluster.local";

/** Bearer token prefix */
const BEARER_PREFIX: &str = "Bearer ";

/** Maximum characters of upstream error body kept in diagnostics */
const ERROR_PREVIEW_CHARS: usize = 500;

/* --- start of code -------------------------------------------------------------------------- */

impl Utf8StreamDecoder {
    ///
    /// Create a fresh decoder.
    pub fn new() -> Self {
        Self::default()
    }

    ///
    /// Decode a byte chunk, holding any trailing partial code point.
    ///
    /// # Arguments
    ///  * `chunk` - raw bytes from the wire
    ///
    /// # Returns
    ///  * All completely decodable text, possibly empty
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(error) => {
                    let valid = error.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match error.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        // incomplete trailing code point: hold for the next chunk
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

impl BackendClient {
    ///
    /// Create a backend client with appropriate timeouts.
    ///
    /// # Returns
    ///  * Configured client
    ///  * `ProxyError::Http` if client creation fails
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProxyError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    ///
    /// POST a JSON body and return the parsed JSON response.
    ///
    /// # Arguments
    ///  * `url` - full upstream URL
    ///  * `body` - JSON payload
    ///  * `auth` - composed Authorization value, if any
    ///
    /// # Returns
    ///  * Parsed response body
    ///  * `ProxyError::Backend` on a non-2xx upstream status
    pub async fn call(&self, url: &str, body: &Value, auth: Option<&str>) -> Result<Value> {
        let response = self.post(url, body, auth).await?;
        response.json().await.map_err(ProxyError::Request)
    }

    ///
    /// POST a JSON body and return a lazy decoded text stream.
    ///
    /// The stream is single-consumer; dropping it releases the underlying
    /// connection, which is the cancellation path when a client disconnects
    /// mid-stream.
    ///
    /// # Arguments
    ///  * `url` - full upstream URL
    ///  * `body` - JSON payload
    ///  * `auth` - composed Authorization value, if any
    ///
    /// # Returns
    ///  * UTF-8 text chunks decoded with held partial code points
    ///  * `ProxyError::Backend` on a non-2xx upstream status
    pub async fn stream(&self, url: &str, body: &Value, auth: Option<&str>) -> Result<TextStream> {
        let response = self.post(url, body, auth).await?;

        let mut decoder = Utf8StreamDecoder::new();
        let stream = response.bytes_stream().map(move |chunk| match chunk {
            Ok(bytes) => Ok(decoder.decode(&bytes)),
            Err(e) => Err(ProxyError::Request(e)),
        });
        Ok(Box::pin(stream))
    }

    ///
    /// Probe a backend's model listing with the startup deadline.
    ///
    /// # Arguments
    ///  * `backend` - backend to probe
    ///
    /// # Returns
    ///  * `Ok(())` when the backend answered 2xx within the deadline
    pub async fn probe(&self, backend: &BackendConfig) -> Result<()> {
        let mut request = self
            .http
            .get(backend.models_url())
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS));
        if let Some(auth) = compose_auth(backend, None) {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await.map_err(ProxyError::Request)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::backend(status, &body));
        }
        Ok(())
    }

    ///
    /// Shared POST with status validation and structured diagnostics.
    async fn post(&self, url: &str, body: &Value, auth: Option<&str>) -> Result<reqwest::Response> {
        let mut request = self.http.post(url).header("Content-Type", "application/json");
        if let Some(auth) = auth {
            request = request.header("Authorization", ensure_bearer(auth));
        }

        let response = request.json(body).send().await.map_err(ProxyError::Request)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            let preview: String = text.chars().take(ERROR_PREVIEW_CHARS).collect();

            tracing::error!(
                upstream_url = url,
                status,
                model = body.get("model").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
                message_count = body
                    .get("messages")
                    .and_then(serde_json::Value::as_array)
                    .map(Vec::len)
                    .unwrap_or(0),
                last_message_role = last_message_role(body),
                has_tool_calls = has_tool_calls(body),
                body_preview = %preview,
                "Backend request failed"
            );
            return Err(ProxyError::Backend { status, preview });
        }
        Ok(response)
    }
}

///
/// Compose the Authorization value for a backend request.
///
/// Backends whose host ends in the internal cluster suffix are trusted and
/// always use their configured key. External backends prefer their
/// configured key and fall back to the client's inbound Authorization.
/// The `Bearer ` prefix is added when missing.
///
/// # Arguments
///  * `backend` - target backend
///  * `inbound` - the client's Authorization header, if any
///
/// # Returns
///  * The Authorization value to send, or None for anonymous backends
pub fn compose_auth(backend: &BackendConfig, inbound: Option<&str>) -> Option<String> {
    let raw = if is_internal_url(&backend.url) {
        backend.api_key.clone()
    } else {
        backend.api_key.clone().or_else(|| inbound.map(str::to_string))
    };
    raw.map(|token| ensure_bearer(&token))
}

///
/// Pick the backend for a request.
///
/// # Arguments
///  * `config` - application configuration
///  * `has_image` - whether any message carries an image block
///
/// # Returns
///  * The chosen backend and whether it is the vision backend
pub fn select_backend(config: &Config, has_image: bool) -> (&BackendConfig, bool) {
    match (&config.vision, has_image) {
        (Some(vision), true) => (vision, true),
        _ => (&config.backend, false),
    }
}

///
/// Check whether any message of an Anthropic request carries an image block.
pub fn anthropic_has_image(request: &AnthropicRequest) -> bool {
    request.messages.iter().any(|message| match &message.content {
        MessageContent::Blocks(blocks) => {
            blocks.iter().any(|block| matches!(block, AnthropicContentBlock::Image { .. }))
        }
        MessageContent::Text(_) => false,
    })
}

///
/// Check whether any message of an OpenAI request carries an image part.
pub fn openai_has_image(request: &OpenAiRequest) -> bool {
    request.messages.iter().any(|message| match &message.content {
        Some(OpenAiContent::Parts(parts)) => {
            parts.iter().any(|part| matches!(part, OpenAiContentPart::ImageUrl { .. }))
        }
        _ => false,
    })
}

///
/// Check whether the backend URL points inside the cluster.
fn is_internal_url(url: &str) -> bool {
    host_of(url).is_some_and(|host| host.ends_with(INTERNAL_HOST_SUFFIX))
}

///
/// Extract the host portion of an HTTP(S) URL.
fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let authority = rest.split(['/', '?']).next()?;
    // strip a port; IPv6 literals are bracketed so this stays correct
    if let Some(end) = authority.rfind(':') {
        if !authority[end + 1..].is_empty() && authority[end + 1..].bytes().all(|b| b.is_ascii_digit())
        {
            return Some(&authority[..end]);
        }
    }
    Some(authority)
}

///
/// Add the Bearer prefix when the token lacks one.
fn ensure_bearer(token: &str) -> String {
    if token.starts_with(BEARER_PREFIX) {
        token.to_string()
    } else {
        format!("{}{}", BEARER_PREFIX, token)
    }
}

///
/// Role of the last message in a JSON request body.
fn last_message_role(body: &Value) -> &str {
    body.get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| messages.last())
        .and_then(|message| message.get("role"))
        .and_then(Value::as_str)
        .unwrap_or("none")
}

///
/// Whether any message in a JSON request body carries tool_calls.
fn has_tool_calls(body: &Value) -> bool {
    body.get("messages")
        .and_then(Value::as_array)
        .is_some_and(|messages| messages.iter().any(|m| m.get("tool_calls").is_some()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str, api_key: Option<&str>) -> BackendConfig {
        BackendConfig {
            url: url.to_string(),
            api_key: api_key.map(str::to_string),
            model: "devstral".to_string(),
        }
    }

    #[test]
    fn test_decoder_passes_ascii_through() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(b"hello"), "hello");
        assert_eq!(decoder.decode(b" world"), " world");
    }

    #[test]
    fn test_decoder_holds_split_code_point() {
        let mut decoder = Utf8StreamDecoder::new();
        let emoji = "😀".as_bytes();
        assert_eq!(decoder.decode(&emoji[..2]), "");
        assert_eq!(decoder.decode(&emoji[2..]), "😀");
    }

    #[test]
    fn test_decoder_split_two_byte_char_mid_text() {
        let mut decoder = Utf8StreamDecoder::new();
        let text = "héllo".as_bytes();
        // split in the middle of the two-byte é
        assert_eq!(decoder.decode(&text[..2]), "h");
        assert_eq!(decoder.decode(&text[2..]), "éllo");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8StreamDecoder::new();
        let out = decoder.decode(&[b'a', 0xFF, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn test_internal_backend_uses_own_key_only() {
        let internal = backend("http://vllm.ml.svc.cluster.local:8000", Some("backend-key"));
        let auth = compose_auth(&internal, Some("Bearer client-key"));
        assert_eq!(auth.as_deref(), Some("Bearer backend-key"));

        let keyless = backend("http://vllm.ml.svc.cluster.local:8000", None);
        assert_eq!(compose_auth(&keyless, Some("Bearer client-key")), None);
    }

    #[test]
    fn test_external_backend_falls_back_to_inbound() {
        let external = backend("https://api.example.com", None);
        let auth = compose_auth(&external, Some("Bearer client-key"));
        assert_eq!(auth.as_deref(), Some("Bearer client-key"));

        let keyed = backend("https://api.example.com", Some("backend-key"));
        let auth = compose_auth(&keyed, Some("Bearer client-key"));
        assert_eq!(auth.as_deref(), Some("Bearer backend-key"));
    }

    #[test]
    fn test_bearer_prefix_added_when_missing() {
        let external = backend("https://api.example.com", Some("raw-token"));
        assert_eq!(compose_auth(&external, None).as_deref(), Some("Bearer raw-token"));
    }

    #[test]
    fn test_host_extraction() {
        assert_eq!(host_of("http://vllm.ml.svc.cluster.local:8000/v1"), Some("vllm.ml.svc.cluster.local"));
        assert_eq!(host_of("https://api.example.com"), Some("api.example.com"));
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_select_backend_vision_routing() {
        let config = Config {
            host: "0.0.0.0".to_string(),
            port: 3456,
            api_key: None,
            backend: backend("http://default:8000", None),
            vision: Some(backend("http://vision:8000", None)),
            telemetry: crate::config::TelemetryConfig { enabled: true, endpoint: None },
            log_level: crate::config::LogLevel::Info,
        };

        let (chosen, is_vision) = select_backend(&config, true);
        assert!(is_vision);
        assert_eq!(chosen.url, "http://vision:8000");

        let (chosen, is_vision) = select_backend(&config, false);
        assert!(!is_vision);
        assert_eq!(chosen.url, "http://default:8000");
    }

    #[test]
    fn test_select_backend_without_vision_config() {
        let config = Config {
            host: "0.0.0.0".to_string(),
            port: 3456,
            api_key: None,
            backend: backend("http://default:8000", None),
            vision: None,
            telemetry: crate::config::TelemetryConfig { enabled: true, endpoint: None },
            log_level: crate::config::LogLevel::Info,
        };
        let (chosen, is_vision) = select_backend(&config, true);
        assert!(!is_vision);
        assert_eq!(chosen.url, "http://default:8000");
    }

    #[test]
    fn test_image_predicates() {
        let anthropic: AnthropicRequest = serde_json::from_value(serde_json::json!({
            "model": "claude-3",
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AA"}}
            ]}]
        }))
        .unwrap();
        assert!(anthropic_has_image(&anthropic));

        let openai: OpenAiRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": [
                {"type": "image_url", "image_url": {"url": "https://example.com/x.png"}}
            ]}]
        }))
        .unwrap();
        assert!(openai_has_image(&openai));

        let plain: OpenAiRequest = serde_json::from_value(serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(!openai_has_image(&plain));
    }
}
