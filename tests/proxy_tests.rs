//! End-to-end proxy tests against a stub backend
//!
//! Spins up a local OpenAI-compatible stub, points the proxy at it, and
//! drives full request/response cycles: unary translation, tool round
//! trips, sentinel injection, image stripping, and streaming translation
//! with inline tool-call recovery.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::util::ServiceExt;

use mistralmux::config::{BackendConfig, Config, LogLevel, TelemetryConfig};
use mistralmux::create_app;

/// Capture slot for the body the stub backend received.
type Captured = Arc<Mutex<Option<Value>>>;

/// Start a stub backend answering /v1/chat/completions with a fixed JSON
/// response, recording the request body it received.
async fn spawn_json_backend(response: Value) -> (String, Captured) {
    let captured: Captured = Arc::new(Mutex::new(None));
    let capture_slot = captured.clone();

    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |Json(body): Json<Value>| {
            let capture_slot = capture_slot.clone();
            let response = response.clone();
            async move {
                *capture_slot.lock().unwrap() = Some(body);
                Json(response)
            }
        }),
    );

    (serve(app).await, captured)
}

/// Start a stub backend answering /v1/chat/completions with a fixed SSE body.
async fn spawn_sse_backend(sse_body: String) -> String {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let sse_body = sse_body.clone();
            async move { ([(header::CONTENT_TYPE, "text/event-stream")], sse_body) }
        }),
    );
    serve(app).await
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn proxy_config(backend_url: &str) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        api_key: None,
        backend: BackendConfig {
            url: backend_url.to_string(),
            api_key: None,
            model: "devstral-small".to_string(),
        },
        vision: None,
        telemetry: TelemetryConfig { enabled: true, endpoint: None },
        log_level: LogLevel::Error,
    }
}

async fn post_to_proxy(backend_url: &str, path: &str, body: Value) -> (StatusCode, String) {
    let app = create_app(proxy_config(backend_url)).unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

/// Parse an Anthropic SSE body into (event name, data JSON) pairs.
fn parse_sse(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .filter_map(|frame| {
            let mut event = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(name) = line.strip_prefix("event: ") {
                    event = Some(name.to_string());
                } else if let Some(payload) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(payload).ok();
                }
            }
            Some((event?, data?))
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_simple_text_echo_non_streaming() {
    let (backend_url, _) = spawn_json_backend(json!({
        "id": "c1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
    }))
    .await;

    let (status, body) = post_to_proxy(
        &backend_url,
        "/v1/messages",
        json!({"model": "claude-3", "messages": [{"role": "user", "content": "Hi"}], "max_tokens": 10}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let response: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(response["id"], "c1");
    assert_eq!(response["type"], "message");
    assert_eq!(response["role"], "assistant");
    assert_eq!(response["model"], "claude-3");
    assert_eq!(response["stop_reason"], "end_turn");
    assert_eq!(response["content"][0]["type"], "text");
    assert_eq!(response["content"][0]["text"], "Hello");
    assert_eq!(response["usage"]["input_tokens"], 5);
    assert_eq!(response["usage"]["output_tokens"], 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tool_use_round_trip_outbound_shape() {
    let (backend_url, captured) = spawn_json_backend(json!({
        "id": "c2",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "done"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
    }))
    .await;

    let (status, _) = post_to_proxy(
        &backend_url,
        "/v1/messages",
        json!({
            "model": "claude-3",
            "max_tokens": 100,
            "messages": [
                {"role": "user", "content": "list files"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_01ABCDEFGH", "name": "bash", "input": {"cmd": "ls"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_01ABCDEFGH", "content": "a.txt"}
                ]}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let outbound = captured.lock().unwrap().clone().expect("backend saw the request");
    let messages = outbound["messages"].as_array().unwrap();

    let assistant = &messages[1];
    assert_eq!(assistant["role"], "assistant");
    let call = &assistant["tool_calls"][0];
    let call_id = call["id"].as_str().unwrap();
    assert_eq!(call_id.len(), 9);
    assert!(call_id.bytes().all(|b| b.is_ascii_alphanumeric()));
    assert_eq!(call["type"], "function");
    assert_eq!(call["function"]["name"], "bash");
    assert_eq!(call["function"]["arguments"], "{\"cmd\":\"ls\"}");

    let tool = &messages[2];
    assert_eq!(tool["role"], "tool");
    assert_eq!(tool["tool_call_id"], call_id);
    assert_eq!(tool["content"], "a.txt");

    // tool-terminal is legal: no sentinel appended
    assert_eq!(messages.last().unwrap()["role"], "tool");
    assert_eq!(outbound["model"], "devstral-small");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sentinel_injection_after_trailing_assistant() {
    let (backend_url, captured) = spawn_json_backend(json!({
        "id": "c3",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
    }))
    .await;

    let (status, _) = post_to_proxy(
        &backend_url,
        "/v1/messages",
        json!({
            "model": "claude-3",
            "max_tokens": 10,
            "messages": [
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hi"}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let outbound = captured.lock().unwrap().clone().unwrap();
    let last = outbound["messages"].as_array().unwrap().last().unwrap().clone();
    assert_eq!(last["role"], "user");
    assert_eq!(last["content"], "Continue.");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streaming_inline_tool_call_translation() {
    let sse_body = [
        r#"data: {"id":"c4","choices":[{"index":0,"delta":{"role":"assistant","content":"[TOOL_"}}]}"#,
        r#"data: {"id":"c4","choices":[{"index":0,"delta":{"content":"CALLS]search"}}]}"#,
        r#"data: {"id":"c4","choices":[{"index":0,"delta":{"content":"{\"q\":\"x\"}"}}]}"#,
        r#"data: {"id":"c4","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        r#"data: {"id":"c4","choices":[],"usage":{"prompt_tokens":7,"completion_tokens":9,"total_tokens":16}}"#,
        "data: [DONE]",
        "",
    ]
    .join("\n\n");
    let backend_url = spawn_sse_backend(sse_body).await;

    let (status, body) = post_to_proxy(
        &backend_url,
        "/v1/messages",
        json!({
            "model": "devstral-small",
            "max_tokens": 50,
            "stream": true,
            "messages": [{"role": "user", "content": "find x"}]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let events = parse_sse(&body);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_stop",
            "message_delta",
            "message_stop"
        ]
    );

    let (_, start) = &events[1];
    assert_eq!(start["content_block"]["type"], "tool_use");
    assert_eq!(start["content_block"]["name"], "search");
    assert_eq!(start["content_block"]["input"]["q"], "x");

    let (_, delta) = &events[3];
    assert_eq!(delta["delta"]["stop_reason"], "tool_use");
    assert_eq!(delta["usage"]["input_tokens"], 7);
    assert_eq!(delta["usage"]["output_tokens"], 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streaming_plain_text_preserved() {
    let sse_body = [
        r#"data: {"id":"c5","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"}}]}"#,
        r#"data: {"id":"c5","choices":[{"index":0,"delta":{"content":"lo there"}}]}"#,
        r#"data: {"id":"c5","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        r#"data: {"id":"c5","choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        "data: [DONE]",
        "",
    ]
    .join("\n\n");
    let backend_url = spawn_sse_backend(sse_body).await;

    let (status, body) = post_to_proxy(
        &backend_url,
        "/v1/messages",
        json!({
            "model": "claude-3",
            "max_tokens": 50,
            "stream": true,
            "messages": [{"role": "user", "content": "greet me"}]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let events = parse_sse(&body);
    let text: String = events
        .iter()
        .filter(|(name, _)| name == "content_block_delta")
        .filter_map(|(_, data)| data["delta"]["text"].as_str().map(str::to_string))
        .collect();
    assert_eq!(text, "Hello there");

    assert_eq!(events.first().unwrap().0, "message_start");
    assert_eq!(events.last().unwrap().0, "message_stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_openai_image_stripped_without_vision_backend() {
    let (backend_url, captured) = spawn_json_backend(json!({
        "id": "c6",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "a cat"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
    }))
    .await;

    let (status, _) = post_to_proxy(
        &backend_url,
        "/v1/chat/completions",
        json!({
            "model": "devstral",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "what is in this image"},
                {"type": "image_url", "image_url": {"url": "https://example.com/x.png"}}
            ]}]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let outbound = captured.lock().unwrap().clone().unwrap();
    let parts = outbound["messages"][0]["content"].as_array().unwrap();
    assert_eq!(parts[0]["type"], "text");
    assert_eq!(parts[1]["type"], "text");
    let placeholder = parts[1]["text"].as_str().unwrap();
    assert!(placeholder.starts_with("[Image 1"), "got placeholder {placeholder:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chat_completions_inline_tool_calls_fixed() {
    let (backend_url, _) = spawn_json_backend(json!({
        "id": "c7",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "[TOOL_CALLS]bash{\"cmd\":\"ls\"}"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 2, "completion_tokens": 8, "total_tokens": 10}
    }))
    .await;

    let (status, body) = post_to_proxy(
        &backend_url,
        "/v1/chat/completions",
        json!({"model": "devstral", "messages": [{"role": "user", "content": "list"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response: Value = serde_json::from_str(&body).unwrap();
    let choice = &response["choices"][0];
    assert_eq!(choice["finish_reason"], "tool_calls");
    assert_eq!(choice["message"]["tool_calls"][0]["function"]["name"], "bash");
    assert!(choice["message"].get("content").is_none() || choice["message"]["content"].is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upstream_error_reported_before_sse_starts() {
    // backend that always answers 503
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "model loading") }),
    );
    let backend_url = serve(app).await;

    let (status, body) = post_to_proxy(
        &backend_url,
        "/v1/messages",
        json!({
            "model": "claude-3",
            "max_tokens": 10,
            "stream": true,
            "messages": [{"role": "user", "content": "Hi"}]
        }),
    )
    .await;

    // failure surfaces as a proper HTTP error, not a broken SSE stream
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let response: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(response["error"]["type"], "api_error");
    assert!(response["error"]["message"].as_str().unwrap().contains("503"));
}
