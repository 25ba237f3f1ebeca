//!
//! HTTP server implementation for the MistralMux translating proxy.
//!
//! Handles incoming Anthropic Messages and OpenAI Chat Completions requests,
//! routes them to the selected backend, and returns translated responses.
//! Implements both streaming and non-streaming paths with proper error
//! handling, metrics, and telemetry.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::auth;
use crate::backend::{
    BackendClient, TextStream, anthropic_has_image, compose_auth, openai_has_image, select_backend,
};
use crate::config::Config;
use crate::converter::pipeline::{fix_inline_tool_calls, mistral_request_pipeline};
use crate::converter::{AnthropicToOpenAiConverter, OpenAiToAnthropicConverter, StreamTranslator};
use crate::error::{ProxyError, Result};
use crate::metrics::AppMetrics;
use crate::telemetry::{TelemetryStore, UsageRecord};
use crate::tokens;
use crate::types::anthropic::{
    AnthropicErrorBody, AnthropicRequest, AnthropicStreamEvent, AnthropicUsage,
};
use crate::types::openai::{OpenAiRequest, OpenAiResponse};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application state containing all dependencies.
///
/// Built once at startup and shared across handlers via Arc. The metrics
/// registry and telemetry store are the only process-wide state.
pub struct AppState {
    /** application configuration */
    pub config: Config,
    /** HTTP client for inference backends */
    pub backend: BackendClient,
    /** converter for Anthropic requests */
    pub anthropic_to_openai: AnthropicToOpenAiConverter,
    /** converter for backend responses */
    pub openai_to_anthropic: OpenAiToAnthropicConverter,
    /** Prometheus metrics */
    pub metrics: AppMetrics,
    /** usage telemetry */
    pub telemetry: TelemetryStore,
    /** process start time, reported as model creation time */
    started_at: i64,
}

///
/// Wire shape used for error bodies, matching the endpoint's dialect.
#[derive(Debug, Clone, Copy)]
enum ErrorShape {
    Anthropic,
    OpenAi,
}

///
/// Per-request observation context.
#[derive(Clone)]
struct Scope {
    /** hashed user label */
    user: String,
    /** declared model name */
    model: String,
    /** endpoint path */
    endpoint: &'static str,
    /** request arrival time */
    started: Instant,
}

///
/// Drop guard that records a passthrough stream when its body is released,
/// whether by normal completion or client disconnect.
struct StreamObservation {
    /** shared state for recording */
    state: Arc<AppState>,
    /** observation context */
    scope: Scope,
}

/* --- constants ------------------------------------------------------------------------------ */

/** Channel buffer size for streaming responses */
const STREAMING_CHANNEL_BUFFER: usize = 100;

const ENDPOINT_MESSAGES: &str = "/v1/messages";
const ENDPOINT_CHAT: &str = "/v1/chat/completions";
const ENDPOINT_COMPLETIONS: &str = "/v1/completions";

/* --- start of code -------------------------------------------------------------------------- */

impl AppState {
    ///
    /// Create new application state with all dependencies.
    ///
    /// # Arguments
    ///  * `config` - application configuration
    ///
    /// # Returns
    ///  * Application state with initialized dependencies
    ///  * `ProxyError` if initialization fails
    pub fn new(config: Config) -> Result<Self> {
        let backend = BackendClient::new()?;
        let anthropic_to_openai = AnthropicToOpenAiConverter::new(config.log_level);
        let openai_to_anthropic = OpenAiToAnthropicConverter::new(config.log_level);
        let metrics = AppMetrics::new();
        let telemetry = TelemetryStore::new(&config.telemetry);
        let started_at = chrono::Utc::now().timestamp();

        Ok(Self {
            config,
            backend,
            anthropic_to_openai,
            openai_to_anthropic,
            metrics,
            telemetry,
            started_at,
        })
    }
}

impl Drop for StreamObservation {
    fn drop(&mut self) {
        observe(&self.state, &self.scope, "ok", 0, 0);
    }
}

///
/// Record one finished request into metrics and telemetry.
///
/// # Arguments
///  * `state` - shared application state
///  * `scope` - observation context
///  * `status` - terminal status
///  * `input_tokens` - prompt tokens, 0 when unknown
///  * `output_tokens` - completion tokens, 0 when unknown
fn observe(state: &AppState, scope: &Scope, status: &str, input_tokens: u64, output_tokens: u64) {
    let seconds = scope.started.elapsed().as_secs_f64();
    state.metrics.record_request(&scope.user, &scope.model, scope.endpoint, status);
    state.metrics.record_duration(&scope.user, &scope.model, scope.endpoint, seconds);
    if input_tokens > 0 || output_tokens > 0 {
        state.metrics.record_tokens(&scope.user, &scope.model, input_tokens, output_tokens);
    }
    state.telemetry.record(UsageRecord {
        timestamp: chrono::Utc::now(),
        endpoint: scope.endpoint.to_string(),
        model: scope.model.clone(),
        user: scope.user.clone(),
        input_tokens,
        output_tokens,
        duration_ms: (seconds * 1000.0) as u64,
        status: status.to_string(),
    });
}

///
/// Record an error and produce its client-facing response.
fn observe_error(
    state: &AppState,
    scope: &Scope,
    error: &ProxyError,
    shape: ErrorShape,
) -> Response {
    tracing::error!(
        endpoint = scope.endpoint,
        model = %scope.model,
        user = %scope.user,
        error = %error,
        "Request failed"
    );
    observe(state, scope, "error", 0, 0);
    error_response(error, shape)
}

/* --- anthropic messages endpoint ------------------------------------------------------------- */

///
/// Handle the Anthropic Messages endpoint.
///
/// Validates auth, converts the request to OpenAI form, dispatches to the
/// selected backend, and translates the response back - incrementally for
/// streams, in one piece otherwise.
///
/// # Arguments
///  * `state` - shared application state
///  * `headers` - incoming request headers
///  * `payload` - raw JSON request body
///
/// # Returns
///  * Anthropic-dialect response or structured error
pub async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let mut scope = Scope {
        user: auth::user_label(&headers),
        model: "unknown".to_string(),
        endpoint: ENDPOINT_MESSAGES,
        started: Instant::now(),
    };

    if let Err(e) = auth::validate_gateway_key(&headers, state.config.api_key.as_deref()) {
        return observe_error(&state, &scope, &e, ErrorShape::Anthropic);
    }

    let request: AnthropicRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => {
            let error = ProxyError::Validation(format!("Invalid request body: {}", e));
            return observe_error(&state, &scope, &error, ErrorShape::Anthropic);
        }
    };
    scope.model = request.model.clone();

    match process_messages(state.clone(), &headers, request, scope.clone()).await {
        Ok(response) => response,
        Err(e) => observe_error(&state, &scope, &e, ErrorShape::Anthropic),
    }
}

///
/// Process a parsed Anthropic request end-to-end.
async fn process_messages(
    state: Arc<AppState>,
    headers: &HeaderMap,
    request: AnthropicRequest,
    scope: Scope,
) -> Result<Response> {
    let streaming = request.stream.unwrap_or(false);
    let has_image = anthropic_has_image(&request);
    let (backend, is_vision) = select_backend(&state.config, has_image);

    let mut openai_request =
        state.anthropic_to_openai.convert(request, &backend.model, is_vision)?;
    if has_image && !is_vision {
        openai_request = crate::converter::pipeline::strip_image_parts(openai_request);
    }

    let input_estimate = tokens::estimate_openai_request(&openai_request);
    let body = serde_json::to_value(&openai_request)?;
    let url = backend.chat_completions_url();
    let auth_value = compose_auth(backend, auth::inbound_authorization(headers).as_deref());

    if streaming {
        // the upstream connection is opened first so failures are still
        // reported with a proper HTTP status instead of a broken SSE
        let upstream = state.backend.stream(&url, &body, auth_value.as_deref()).await?;

        let translator = StreamTranslator::new(
            format!("msg_{}", chrono::Utc::now().timestamp_millis()),
            scope.model.clone(),
            &backend.model,
            input_estimate,
        );

        let (tx, rx) = mpsc::channel::<Result<Event>>(STREAMING_CHANNEL_BUFFER);
        tokio::spawn(pump_anthropic_stream(state, scope, upstream, translator, tx));

        let mut response = Sse::new(ReceiverStream::new(rx)).into_response();
        insert_sse_headers(response.headers_mut());
        Ok(response)
    } else {
        let value = state.backend.call(&url, &body, auth_value.as_deref()).await?;
        let openai_response: OpenAiResponse = serde_json::from_value(value)
            .map_err(|e| ProxyError::Translation(format!("Invalid backend response: {}", e)))?;

        let anthropic = state.openai_to_anthropic.convert(openai_response, &scope.model);
        observe(
            &state,
            &scope,
            "ok",
            u64::from(anthropic.usage.input_tokens),
            u64::from(anthropic.usage.output_tokens),
        );
        Ok(Json(anthropic).into_response())
    }
}

///
/// Drive the upstream SSE stream through the translator into the client
/// channel.
///
/// Sending on a closed channel means the client disconnected: the loop stops
/// and dropping the upstream stream cancels the backend request. An upstream
/// failure after SSE start is appended as an SSE error event and the
/// response ends normally.
async fn pump_anthropic_stream(
    state: Arc<AppState>,
    scope: Scope,
    mut upstream: TextStream,
    mut translator: StreamTranslator,
    tx: mpsc::Sender<Result<Event>>,
) {
    let mut status = "ok";
    let mut usage = AnthropicUsage::default();

    let mut connected = send_event(&tx, &translator.start(), &mut usage).await;

    while connected {
        match upstream.next().await {
            Some(Ok(chunk)) => {
                let events = translator.feed(&chunk);
                if events.iter().any(|e| matches!(e, AnthropicStreamEvent::Error { .. })) {
                    status = "error";
                }
                connected = send_events(&tx, &events, &mut usage).await;
            }
            Some(Err(e)) => {
                status = "error";
                tracing::error!("Upstream stream failed mid-response: {}", e);
                let event = AnthropicStreamEvent::Error {
                    error: AnthropicErrorBody {
                        error_type: "api_error".to_string(),
                        message: e.to_string(),
                    },
                };
                let _ = send_event(&tx, &event, &mut usage).await;
                break;
            }
            None => break,
        }
    }

    if !connected {
        status = "canceled";
        tracing::debug!("Client disconnected mid-stream; upstream canceled");
    } else if status == "ok" {
        let events = translator.finish();
        send_events(&tx, &events, &mut usage).await;
    }

    observe(
        &state,
        &scope,
        status,
        u64::from(usage.input_tokens),
        u64::from(usage.output_tokens),
    );
}

///
/// Send translated events, harvesting the final usage as it passes by.
///
/// # Returns
///  * `false` once the client has disconnected
async fn send_events(
    tx: &mpsc::Sender<Result<Event>>,
    events: &[AnthropicStreamEvent],
    usage: &mut AnthropicUsage,
) -> bool {
    for event in events {
        if !send_event(tx, event, usage).await {
            return false;
        }
    }
    true
}

async fn send_event(
    tx: &mpsc::Sender<Result<Event>>,
    event: &AnthropicStreamEvent,
    usage: &mut AnthropicUsage,
) -> bool {
    if let AnthropicStreamEvent::MessageDelta { usage: final_usage, .. } = event {
        *usage = final_usage.clone();
    }

    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to serialize stream event: {}", e);
            return true;
        }
    };
    tx.send(Ok(Event::default().event(event.event_name()).data(payload))).await.is_ok()
}

/* --- openai chat completions endpoint -------------------------------------------------------- */

///
/// Handle the OpenAI Chat Completions endpoint with Mistral fixes.
///
/// Requests pass through the normalization pipeline; unary responses get
/// inline tool calls structured; streaming responses are piped through
/// verbatim since the client already speaks the backend's dialect.
///
/// # Arguments
///  * `state` - shared application state
///  * `headers` - incoming request headers
///  * `payload` - raw JSON request body
///
/// # Returns
///  * OpenAI-dialect response or structured error
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let mut scope = Scope {
        user: auth::user_label(&headers),
        model: "unknown".to_string(),
        endpoint: ENDPOINT_CHAT,
        started: Instant::now(),
    };

    if let Err(e) = auth::validate_gateway_key(&headers, state.config.api_key.as_deref()) {
        return observe_error(&state, &scope, &e, ErrorShape::OpenAi);
    }

    let request: OpenAiRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => {
            let error = ProxyError::Validation(format!("Invalid request body: {}", e));
            return observe_error(&state, &scope, &error, ErrorShape::OpenAi);
        }
    };
    scope.model =
        request.model.clone().unwrap_or_else(|| state.config.backend.model.clone());

    match process_chat_completion(state.clone(), &headers, request, scope.clone()).await {
        Ok(response) => response,
        Err(e) => observe_error(&state, &scope, &e, ErrorShape::OpenAi),
    }
}

///
/// Process a parsed OpenAI request end-to-end.
async fn process_chat_completion(
    state: Arc<AppState>,
    headers: &HeaderMap,
    request: OpenAiRequest,
    scope: Scope,
) -> Result<Response> {
    let streaming = request.stream.unwrap_or(false);
    let has_image = openai_has_image(&request);
    let (backend, is_vision) = select_backend(&state.config, has_image);

    let pipeline =
        mistral_request_pipeline(backend.model.clone(), has_image && !is_vision);
    let outbound = pipeline.run(request);

    let body = serde_json::to_value(&outbound)?;
    let url = backend.chat_completions_url();
    let auth_value = compose_auth(backend, auth::inbound_authorization(headers).as_deref());

    if streaming {
        let upstream = state.backend.stream(&url, &body, auth_value.as_deref()).await?;
        Ok(passthrough_sse_response(state, scope, upstream))
    } else {
        let value = state.backend.call(&url, &body, auth_value.as_deref()).await?;
        let response: OpenAiResponse = serde_json::from_value(value)
            .map_err(|e| ProxyError::Translation(format!("Invalid backend response: {}", e)))?;
        let fixed = fix_inline_tool_calls(response);

        let usage = fixed.usage.clone().unwrap_or_default();
        observe(
            &state,
            &scope,
            "ok",
            u64::from(usage.prompt_tokens),
            u64::from(usage.completion_tokens),
        );
        Ok(Json(fixed).into_response())
    }
}

/* --- legacy completions passthrough ---------------------------------------------------------- */

///
/// Handle the legacy completions endpoints as a passthrough.
///
/// The body is forwarded verbatim with composed auth; JSON and raw SSE
/// responses are returned as-is.
///
/// # Arguments
///  * `state` - shared application state
///  * `headers` - incoming request headers
///  * `payload` - raw JSON request body
///
/// # Returns
///  * The backend's response, untranslated
pub async fn completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let scope = Scope {
        user: auth::user_label(&headers),
        model: payload
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        endpoint: ENDPOINT_COMPLETIONS,
        started: Instant::now(),
    };

    if let Err(e) = auth::validate_gateway_key(&headers, state.config.api_key.as_deref()) {
        return observe_error(&state, &scope, &e, ErrorShape::OpenAi);
    }

    let streaming = payload.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let backend = &state.config.backend;
    let url = backend.completions_url();
    let auth_value = compose_auth(backend, auth::inbound_authorization(&headers).as_deref());

    if streaming {
        match state.backend.stream(&url, &payload, auth_value.as_deref()).await {
            Ok(upstream) => passthrough_sse_response(state.clone(), scope, upstream),
            Err(e) => observe_error(&state, &scope, &e, ErrorShape::OpenAi),
        }
    } else {
        match state.backend.call(&url, &payload, auth_value.as_deref()).await {
            Ok(value) => {
                observe(&state, &scope, "ok", 0, 0);
                Json(value).into_response()
            }
            Err(e) => observe_error(&state, &scope, &e, ErrorShape::OpenAi),
        }
    }
}

///
/// Build a raw SSE passthrough response.
///
/// The observation guard rides inside the body stream: it records the
/// request when the body is dropped, on completion or client disconnect
/// alike, which also releases the upstream connection.
fn passthrough_sse_response(state: Arc<AppState>, scope: Scope, upstream: TextStream) -> Response {
    let guard = StreamObservation { state, scope };
    let body = Body::from_stream(upstream.map(move |chunk| {
        let _ = &guard;
        chunk.map(bytes::Bytes::from)
    }));

    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    insert_sse_headers(response.headers_mut());
    response
}

/* --- utility endpoints ------------------------------------------------------------------------ */

///
/// Handle the token counting endpoint.
///
/// Counts the raw payload rather than the full typed request: clients send
/// reduced shapes here (no model, messages without roles).
///
/// # Arguments
///  * `state` - shared application state
///  * `headers` - incoming request headers
///  * `payload` - raw JSON request body
///
/// # Returns
///  * `{"input_tokens": N}` for the given request shape
pub async fn count_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    if let Err(e) = auth::validate_gateway_key(&headers, state.config.api_key.as_deref()) {
        return error_response(&e, ErrorShape::Anthropic);
    }

    if !payload.get("messages").is_some_and(Value::is_array) {
        let error = ProxyError::Validation("messages must be an array".to_string());
        return error_response(&error, ErrorShape::Anthropic);
    }

    let input_tokens = tokens::count_request_payload(&payload);
    Json(json!({ "input_tokens": input_tokens })).into_response()
}

///
/// Handle models listing endpoint for OpenAI compatibility.
///
/// Returns the single configured model.
///
/// # Arguments
///  * `state` - shared application state
///
/// # Returns
///  * JSON response with the model list
pub async fn models(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
      "object": "list",
      "data": [{
        "id": state.config.backend.model,
        "object": "model",
        "created": state.started_at,
        "owned_by": "vllm"
      }]
    }))
}

///
/// Handle health check endpoint.
///
/// # Returns
///  * JSON response with health status
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

///
/// Handle the telemetry snapshot endpoint.
///
/// # Arguments
///  * `state` - shared application state
///
/// # Returns
///  * JSON snapshot of counts, totals, averages, and recent usage
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.telemetry.snapshot())
}

///
/// Handle the Prometheus exposition endpoint.
///
/// # Arguments
///  * `state` - shared application state
///
/// # Returns
///  * Text exposition of all registered metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => error_response(&e, ErrorShape::OpenAi),
    }
}

/* --- error responses -------------------------------------------------------------------------- */

///
/// Create an error response in the endpoint's wire shape.
///
/// # Arguments
///  * `error` - error to convert
///  * `shape` - dialect of the calling endpoint
///
/// # Returns
///  * HTTP error response with a structured JSON body
fn error_response(error: &ProxyError, shape: ErrorShape) -> Response {
    let status = match error {
        ProxyError::Auth(_) => StatusCode::UNAUTHORIZED,
        ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let error_type = match (shape, error) {
        (_, ProxyError::Auth(_)) => "authentication_error",
        (ErrorShape::OpenAi, ProxyError::Validation(_)) => "invalid_request_error",
        (ErrorShape::OpenAi, _) => "api_error",
        (ErrorShape::Anthropic, _) => "api_error",
    };

    let body = json!({
        "error": {
            "type": error_type,
            "message": error.to_string(),
        }
    });
    (status, Json(body)).into_response()
}

///
/// Attach the SSE contract headers.
fn insert_sse_headers(headers: &mut HeaderMap) {
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
}
